//! Re-binds image parts from a flat key-value transport to the messages they
//! belong to. Keys follow `image_<messageIndex>_<imageIndex>`.

use std::collections::BTreeMap;

use crate::models::{Attachment, Message};

const IMAGE_KEY_PREFIX: &str = "image_";

/// Parses `image_<m>_<i>` into `(m, i)`. Anything else yields `None`.
pub fn parse_image_key(key: &str) -> Option<(usize, usize)> {
    let rest = key.strip_prefix(IMAGE_KEY_PREFIX)?;
    let (msg, img) = rest.split_once('_')?;
    if !is_decimal(msg) || !is_decimal(img) {
        return None;
    }
    Some((msg.parse().ok()?, img.parse().ok()?))
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Builds the key a client uses for the `image_index`-th image of message `message_index`.
pub fn image_key(message_index: usize, image_index: usize) -> String {
    format!("{IMAGE_KEY_PREFIX}{message_index}_{image_index}")
}

/// Returns `messages` with each message's `images` replaced by exactly the parts
/// keyed to its position, in ascending image index. Unrecognised keys are
/// ignored and a repeated key keeps the last part seen.
pub fn bind_attachments<I>(messages: Vec<Message>, parts: I) -> Vec<Message>
where
    I: IntoIterator<Item = (String, Attachment)>,
{
    let mut by_message: BTreeMap<usize, BTreeMap<usize, Attachment>> = BTreeMap::new();
    for (key, attachment) in parts {
        let Some((msg_index, img_index)) = parse_image_key(&key) else {
            continue;
        };
        by_message.entry(msg_index).or_default().insert(img_index, attachment);
    }

    messages
        .into_iter()
        .enumerate()
        .map(|(index, message)| {
            let images = by_message
                .remove(&index)
                .map(|imgs| imgs.into_values().collect())
                .unwrap_or_default();
            message.with_images(images)
        })
        .collect()
}

/// Flattens every message's images back into keyed parts, the inverse of
/// [`bind_attachments`].
pub fn keyed_parts(messages: &[Message]) -> Vec<(String, Attachment)> {
    messages
        .iter()
        .enumerate()
        .flat_map(|(m, message)| {
            message
                .images
                .iter()
                .enumerate()
                .map(move |(i, img)| (image_key(m, i), img.clone()))
        })
        .collect()
}
