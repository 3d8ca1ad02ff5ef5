//! Incremental decoder for the `data: <json>` line framing of a chat reply.
//!
//! Bytes arrive with arbitrary boundaries. The decoder keeps the unterminated
//! tail of the last chunk and only interprets complete lines, so the events it
//! yields do not depend on how the input was split.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use futures_util::{Stream, StreamExt, stream};
use serde::Deserialize;
use tracing::debug;

use crate::errors::AppError;
use crate::models::{Message, WireMessage};

const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Fragment to append to the open assistant message.
    ContentDelta { text: String },
    /// Authoritative conversation state superseding all deltas so far.
    FinalTranscript { messages: Vec<Message> },
    /// A `data:` line whose payload could not be parsed.
    Malformed,
}

impl StreamEvent {
    pub fn is_final(&self) -> bool {
        matches!(self, StreamEvent::FinalTranscript { .. })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    conversation_history: Option<Vec<WireMessage>>,
}

#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a final transcript has been decoded or the input was flushed.
    /// Further input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds one chunk and returns the events completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.extend_from_slice(chunk);

        let mut consumed = 0;
        while let Some(pos) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let line_end = consumed + pos;
            let event = decode_line(&self.buffer[consumed..line_end]);
            consumed = line_end + 1;

            if let Some(event) = event {
                let is_final = event.is_final();
                events.push(event);
                if is_final {
                    self.finished = true;
                    self.buffer.clear();
                    return events;
                }
            }
        }
        self.buffer.drain(..consumed);
        events
    }

    /// Signals end of input. A trailing line without a newline is still
    /// interpreted so a producer that omits the last terminator loses nothing.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest).into_iter().collect()
    }
}

fn decode_line(line: &[u8]) -> Option<StreamEvent> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = String::from_utf8_lossy(line);
    // Comments, keepalives and other framing lines are not events.
    let payload = text.strip_prefix(DATA_PREFIX)?;

    match serde_json::from_str::<EventPayload>(payload) {
        Ok(EventPayload { content: Some(text), .. }) if !text.is_empty() => {
            Some(StreamEvent::ContentDelta { text })
        }
        Ok(EventPayload { conversation_history: Some(history), .. }) => {
            Some(StreamEvent::FinalTranscript {
                messages: history.into_iter().map(Message::from).collect(),
            })
        }
        Ok(_) => None,
        Err(e) => {
            debug!("Dropping malformed event line: {e}");
            Some(StreamEvent::Malformed)
        }
    }
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    decoder: StreamDecoder,
    pending: VecDeque<StreamEvent>,
    done: bool,
}

/// Adapts a byte stream into decoded events.
///
/// Reading stops as soon as a final transcript is decoded. A transport error
/// is yielded once as [`AppError::StreamUnavailable`] and ends the stream.
pub fn decode_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<StreamEvent, AppError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let state = DecodeState {
        inner: Box::pin(bytes),
        decoder: StreamDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.done {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.feed(chunk.as_ref());
                    st.pending.extend(events);
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(AppError::stream_unavailable(e.to_string())), st));
                }
                None => {
                    let events = st.decoder.finish();
                    st.pending.extend(events);
                }
            }
            if st.decoder.is_finished() {
                st.done = true;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::ContentDelta { text: text.to_string() }
    }

    fn decode_chunks(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut decoder = StreamDecoder::new();
        let mut events: Vec<_> = chunks.iter().flat_map(|c| decoder.feed(c)).collect();
        events.extend(decoder.finish());
        events
    }

    const SAMPLE: &str = concat!(
        ": keepalive\n",
        "data: {\"content\":\"Hi\"}\n",
        "\n",
        "data: {not json}\n",
        "data: {\"content\":\" th\\u00e9re \u{1F600}\"}\r\n",
        "event: ping\n",
        "data: {\"conversationHistory\":[{\"role\":\"user\",\"content\":\"q\"},{\"role\":\"assistant\",\"content\":\"Hi there\"}]}\n",
        "data: {\"content\":\"after final\"}\n",
    );

    #[test]
    fn split_delta_is_reassembled() {
        let events = decode_chunks(&[b"data: {\"content\":\"Hel".as_slice(), b"lo\"}\n".as_slice()]);
        assert_eq!(events, vec![delta("Hello")]);
    }

    #[test]
    fn one_chunk_with_many_lines() {
        let events = decode_chunks(&[b"data: {\"content\":\"Hi\"}\ndata: {\"content\":\" there\"}\n".as_slice()]);
        assert_eq!(events, vec![delta("Hi"), delta(" there")]);
    }

    #[test]
    fn chunk_boundaries_do_not_change_events() {
        let bytes = SAMPLE.as_bytes();
        let whole = decode_chunks(&[bytes]);
        assert_eq!(whole.len(), 4);
        assert_eq!(whole[0], delta("Hi"));
        assert_eq!(whole[1], StreamEvent::Malformed);
        assert_eq!(whole[2], delta(" th\u{e9}re \u{1F600}"));
        assert!(whole[3].is_final());

        // Every split point, including ones inside multi-byte characters.
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_chunks(&[a, b]), whole, "split at {split}");
        }
        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_chunks(&singles), whole);
        let sevens: Vec<&[u8]> = bytes.chunks(7).collect();
        assert_eq!(decode_chunks(&sevens), whole);
    }

    #[test]
    fn malformed_line_does_not_stop_decoding() {
        let events = decode_chunks(&[b"data: oops\ndata: {\"content\":\"ok\"}\n".as_slice()]);
        assert_eq!(events, vec![StreamEvent::Malformed, delta("ok")]);
    }

    #[test]
    fn non_data_lines_and_empty_payloads_are_skipped() {
        let events = decode_chunks(&[b"id: 1\ndata:{\"content\":\"x\"}\ndata: {\"content\":\"\"}\ndata: {}\n".as_slice()]);
        assert!(events.is_empty());
    }

    #[test]
    fn final_transcript_stops_decoding() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(
            b"data: {\"conversationHistory\":[{\"role\":\"assistant\",\"content\":\"done\"}]}\ndata: {\"content\":\"late\"}\n",
        );
        assert_eq!(events.len(), 1);
        let StreamEvent::FinalTranscript { messages } = &events[0] else {
            panic!("expected final transcript");
        };
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].content, "done");
        assert!(decoder.is_finished());
        assert!(decoder.feed(b"data: {\"content\":\"more\"}\n").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn unterminated_tail_is_flushed_on_finish() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.feed(b"data: {\"content\":\"tail\"}").is_empty());
        assert_eq!(decoder.finish(), vec![delta("tail")]);
    }

    #[tokio::test]
    async fn stream_adapter_surfaces_transport_errors() {
        let chunks: Vec<Result<&[u8], String>> = vec![
            Ok(b"data: {\"content\":\"par".as_slice()),
            Ok(b"tial\"}\n".as_slice()),
            Err("connection reset".to_string()),
            Ok(b"data: {\"content\":\"never\"}\n".as_slice()),
        ];
        let out: Vec<_> = decode_stream(stream::iter(chunks)).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().ok(), Some(&delta("partial")));
        assert!(matches!(out[1], Err(AppError::StreamUnavailable { .. })));
    }

    #[tokio::test]
    async fn stream_adapter_stops_reading_after_final() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"conversationHistory\":[]}\n".to_vec()),
            Err("must not be read".to_string()),
        ];
        let out: Vec<_> = decode_stream(stream::iter(chunks)).collect().await;
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], Ok(StreamEvent::FinalTranscript { messages }) if messages.is_empty()));
    }
}
