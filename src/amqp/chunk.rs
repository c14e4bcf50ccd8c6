//! Splitting of oversized text messages.
//!
//! A message longer than the chunk size is cut on whitespace into the largest
//! pieces that fit, and every piece is tagged with ` eid=<id>` so a consumer
//! can put the fragments back together. Double-quoted values such as
//! `name="T Cort"` are never split, and a single token larger than the chunk
//! size is emitted whole.

/// Splits `message` into chunks of at most `chunk_size` bytes (before the tag).
///
/// Messages that already fit are returned unchanged and untagged.
pub fn chunkify(message: &str, eid: &str, chunk_size: usize) -> Vec<String> {
    if message.len() <= chunk_size {
        return vec![message.to_string()];
    }

    let spans = tokens(message);
    if spans.is_empty() {
        return vec![format!("{message} eid={eid}")];
    }

    // Each chunk runs from its first token to its last one, keeping the
    // original spacing in between. The first and last chunks also keep the
    // message's leading and trailing whitespace.
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (token_start, token_end) in spans {
        if end > start && token_end - start > chunk_size {
            chunks.push(&message[start..end]);
            start = token_start;
        }
        end = token_end;
    }
    chunks.push(&message[start..]);

    chunks
        .into_iter()
        .map(|chunk| format!("{chunk} eid={eid}"))
        .collect()
}

/// Byte spans of the whitespace separated tokens, treating a double-quoted run
/// as part of its token.
fn tokens(message: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut quoted = false;

    for (i, c) in message.char_indices() {
        if c == '"' {
            quoted = !quoted;
        }
        if c.is_whitespace() && !quoted {
            if let Some(s) = start.take() {
                out.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push((s, message.len()));
    }
    out
}

/// A short id for correlating the chunks of one event.
pub fn short_eid() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

#[cfg(test)]
mod chunk_tests {
    use super::*;

    #[test]
    fn test_preserves_messages_within_chunk_size() {
        assert_eq!(chunkify("Hello, World!", "testcase", 16), vec!["Hello, World!"]);
        assert_eq!(chunkify("Hi, name=\"TC\"!", "testcase", 16), vec!["Hi, name=\"TC\"!"]);
    }

    #[test]
    fn test_splits_on_whitespace() {
        assert_eq!(
            chunkify("Hello, World!", "testcase", 8),
            vec!["Hello, eid=testcase", "World! eid=testcase"]
        );
    }

    #[test]
    fn test_never_splits_quoted_values() {
        assert_eq!(
            chunkify("Hi, name=\"T Cort\"", "testcase", 16),
            vec!["Hi, eid=testcase", "name=\"T Cort\" eid=testcase"]
        );
    }

    #[test]
    fn test_oversized_token_is_kept_whole() {
        assert_eq!(
            chunkify("0123456789abcdef", "testcase", 8),
            vec!["0123456789abcdef eid=testcase"]
        );
    }

    #[test]
    fn test_packs_tokens_greedily() {
        assert_eq!(
            chunkify("a b c d e f", "x", 5),
            vec!["a b c eid=x", "d e f eid=x"]
        );
    }

    #[test]
    fn test_keeps_spacing_between_tokens() {
        assert_eq!(
            chunkify("a   b       c", "x", 8),
            vec!["a   b eid=x", "c eid=x"]
        );
    }

    #[test]
    fn test_whitespace_only_message_is_one_chunk() {
        assert_eq!(chunkify("          ", "x", 4), vec!["           eid=x"]);
    }

    #[test]
    fn test_short_eid_length() {
        let eid = short_eid();
        assert_eq!(eid.len(), 8);
        assert!(eid.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
