use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::models::{Message, Transcript};
use crate::stream::decoder::StreamEvent;

/// How a reconciled turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream ended; the accumulated reply was marked complete.
    Completed,
    /// A final transcript replaced the whole conversation.
    Replaced,
    /// The caller cancelled; the reply keeps what was folded and stays incomplete.
    Cancelled,
}

/// Whether more events should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Folds decoded events into a session transcript, one turn at a time.
///
/// Holding the transcript mutably for the whole turn makes the reconciler the
/// only writer while a reply is streaming.
pub struct Reconciler<'a> {
    transcript: &'a mut Transcript,
}

impl<'a> Reconciler<'a> {
    pub fn new(transcript: &'a mut Transcript) -> Self {
        Self { transcript }
    }

    pub fn transcript(&self) -> &Transcript {
        &*self.transcript
    }

    /// Opens an empty, incomplete assistant message.
    pub fn begin(&mut self) {
        self.transcript.push(Message::open_assistant());
    }

    /// Applies one event. Returns [`Flow::Stop`] once the turn is over.
    pub fn apply(&mut self, event: StreamEvent) -> Flow {
        match event {
            StreamEvent::ContentDelta { text } => {
                if !self.transcript.append_to_open(&text) {
                    warn!("Dropping content delta with no open assistant message");
                }
                Flow::Continue
            }
            StreamEvent::FinalTranscript { messages } => {
                debug!("Final transcript received with {} messages", messages.len());
                self.transcript.replace(messages);
                Flow::Stop
            }
            StreamEvent::Malformed => Flow::Continue,
        }
    }

    /// Ends the turn after the stream closed without a final transcript.
    pub fn finish(&mut self) {
        self.transcript.complete_last();
    }

    /// Drives `events` to the end of the turn.
    ///
    /// `observer` sees the transcript after every mutation, in event order.
    /// Cancellation is checked before each read; the event stream is dropped
    /// on return whatever the outcome, which releases the underlying
    /// connection. A transport error leaves the partial reply incomplete.
    pub async fn run<S, F>(
        &mut self,
        events: S,
        cancel: &CancellationToken,
        mut observer: F,
    ) -> Result<TurnOutcome, AppError>
    where
        S: Stream<Item = Result<StreamEvent, AppError>>,
        F: FnMut(&Transcript),
    {
        let mut events = std::pin::pin!(events);
        self.begin();
        observer(&*self.transcript);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Turn cancelled after {} bytes of reply", self.open_len());
                    return Ok(TurnOutcome::Cancelled);
                }
                next = events.next() => next,
            };

            match next {
                Some(Ok(StreamEvent::Malformed)) => continue,
                Some(Ok(event)) => {
                    let flow = self.apply(event);
                    observer(&*self.transcript);
                    if flow == Flow::Stop {
                        return Ok(TurnOutcome::Replaced);
                    }
                }
                Some(Err(e)) => {
                    warn!("Reply stream failed: {e}");
                    return Err(e);
                }
                None => {
                    self.finish();
                    observer(&*self.transcript);
                    return Ok(TurnOutcome::Completed);
                }
            }
        }
    }

    fn open_len(&self) -> usize {
        self.transcript.last().map_or(0, |m| m.content.len())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use tokio::sync::mpsc;

    use super::*;
    use crate::models::Role;
    use crate::stream::decoder::decode_stream;

    fn delta(text: &str) -> Result<StreamEvent, AppError> {
        Ok(StreamEvent::ContentDelta { text: text.to_string() })
    }

    fn history() -> Transcript {
        let mut t = Transcript::new();
        t.push(Message::user("ctx"));
        t.push(Message::user("hello?"));
        t
    }

    #[tokio::test]
    async fn deltas_then_end_complete_the_reply() {
        let mut transcript = history();
        let events = stream::iter(vec![delta("Hi"), Ok(StreamEvent::Malformed), delta(" there")]);
        let mut seen = Vec::new();

        let outcome = Reconciler::new(&mut transcript)
            .run(events, &CancellationToken::new(), |t| {
                seen.push(t.last().map(|m| (m.content.clone(), m.is_complete)));
            })
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(transcript.len(), 3);
        let reply = transcript.last().unwrap();
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "Hi there");
        assert!(reply.is_complete);
        assert_eq!(
            seen,
            vec![
                Some((String::new(), false)),
                Some(("Hi".to_string(), false)),
                Some(("Hi there".to_string(), false)),
                Some(("Hi there".to_string(), true)),
            ]
        );
    }

    #[test]
    fn split_chunk_scenario_leaves_reply_open_until_end() {
        let mut transcript = Transcript::new();
        let mut reconciler = Reconciler::new(&mut transcript);
        reconciler.begin();

        let mut decoder = crate::stream::decoder::StreamDecoder::new();
        for chunk in [b"data: {\"content\":\"Hel".as_slice(), b"lo\"}\n".as_slice()] {
            for event in decoder.feed(chunk) {
                reconciler.apply(event);
            }
        }

        let reply = reconciler.transcript().last().unwrap();
        assert_eq!(reply.content, "Hello");
        assert!(!reply.is_complete);
    }

    #[tokio::test]
    async fn final_transcript_replaces_everything() {
        let mut transcript = history();
        let final_messages = vec![Message::user("q"), Message::assistant("authoritative")];
        let events = stream::iter(vec![
            delta("partial"),
            Ok(StreamEvent::FinalTranscript { messages: final_messages.clone() }),
            delta("ignored"),
        ]);

        let outcome = Reconciler::new(&mut transcript)
            .run(events, &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Replaced);
        assert_eq!(transcript.messages(), final_messages.as_slice());
        assert!(transcript.messages().iter().all(|m| m.is_complete));
    }

    #[tokio::test]
    async fn transport_error_keeps_partial_reply_incomplete() {
        let mut transcript = history();
        let bytes: Vec<Result<&[u8], String>> =
            vec![Ok(b"data: {\"content\":\"half\"}\n".as_slice()), Err("reset".into())];

        let err = Reconciler::new(&mut transcript)
            .run(decode_stream(stream::iter(bytes)), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::StreamUnavailable { .. }));
        let reply = transcript.last().unwrap();
        assert_eq!(reply.content, "half");
        assert!(transcript.is_interrupted());
    }

    #[tokio::test]
    async fn cancellation_keeps_folded_content_and_leaves_it_open() {
        let mut transcript = history();
        let (tx, rx) = mpsc::unbounded_channel::<Result<StreamEvent, AppError>>();
        let events = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|e| (e, rx)) });
        let cancel = CancellationToken::new();

        tx.send(delta("Hi")).unwrap();
        tx.send(delta(" the")).unwrap();

        let trigger = cancel.clone();
        let mut folded = 0;
        let outcome = Reconciler::new(&mut transcript)
            .run(events, &cancel, |t| {
                folded += 1;
                // Cancel once both queued deltas have been applied.
                if t.last().is_some_and(|m| m.content == "Hi the") {
                    trigger.cancel();
                    let _ = tx.send(delta("re"));
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(folded, 3);
        assert_eq!(transcript.len(), 3);
        let reply = transcript.last().unwrap();
        assert_eq!(reply.content, "Hi the");
        assert!(!reply.is_complete);
    }

    #[tokio::test]
    async fn already_cancelled_token_stops_before_reading() {
        let mut transcript = history();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = Reconciler::new(&mut transcript)
            .run(stream::iter(vec![delta("never")]), &cancel, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(transcript.last().unwrap().content, "");
        assert!(transcript.is_interrupted());
    }
}
