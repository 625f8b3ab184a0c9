//! Topic validation.
//!
//! Topics are opaque UTF-8 names. The broker matches them exactly; wildcard
//! characters are reserved so no client can subscribe to more than it names.

use crate::errors::{ProtocolError, Result};

/// Maximum topic length in bytes.
pub const MAX_TOPIC_LEN: usize = 256;

/// Characters reserved for wildcard matching.
const WILDCARDS: [char; 2] = ['#', '+'];

/// Check that `topic` can be subscribed to or published on.
///
/// # Errors
///
/// `ProtocolError::InvalidTopic` if the topic is empty, longer than
/// [`MAX_TOPIC_LEN`] bytes, or contains a wildcard character.
pub fn validate_topic(topic: &str) -> Result<()> {
    let reason = if topic.is_empty() {
        "empty"
    } else if topic.len() > MAX_TOPIC_LEN {
        "too long"
    } else if topic.contains(WILDCARDS) {
        "wildcards are not supported"
    } else {
        return Ok(());
    };

    Err(ProtocolError::InvalidTopic { topic: truncate(topic), reason })
}

fn truncate(topic: &str) -> String {
    topic.chars().take(64).collect()
}
