//! Topic message framing on top of an RMP payload, and the prefix-matching
//! algebra that decides whether a subscriber should see a given message.
//!
//! Wire layout: `[u64 readerGen][u8 postToDescendants][channel\0][payload]`.

/// Bytes a message for `channel` with `data_len` bytes of payload will
/// occupy once serialized, including the header and the channel's NUL
/// terminator.
pub fn serialized_size(channel: &str, data_len: usize) -> usize {
    8 + 1 + (channel.len() + 1) + data_len
}

/// Appends the wire encoding of one topic message to `out`.
pub fn serialize(reader_gen: u64, post_to_descendants: bool, channel: &str, data: &[u8], out: &mut Vec<u8>) {
    out.reserve(serialized_size(channel, data.len()));
    out.extend_from_slice(&reader_gen.to_le_bytes());
    out.push(post_to_descendants as u8);
    out.extend_from_slice(channel.as_bytes());
    out.push(0);
    out.extend_from_slice(data);
}

/// A topic message as decoded straight out of the ring's payload bytes, with
/// no copying beyond what the caller already did to extract the frame.
#[derive(Debug, Clone, Copy)]
pub struct Decoded<'a> {
    pub reader_gen: u64,
    pub post_to_descendants: bool,
    pub channel: &'a str,
    pub data: &'a [u8],
}

/// Parses a topic message out of raw RMP payload bytes. Fails only on a
/// malformed frame (truncated header, missing NUL, non-UTF8 channel name) —
/// never on a generation or topic mismatch, which `deserialize_and_filter`
/// handles separately.
pub fn decode(bytes: &[u8]) -> Option<Decoded<'_>> {
    if bytes.len() < 9 {
        return None;
    }
    let reader_gen = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
    let post_to_descendants = bytes[8] != 0;
    let rest = &bytes[9..];
    let nul = rest.iter().position(|&b| b == 0)?;
    let channel = std::str::from_utf8(&rest[..nul]).ok()?;
    let data = &rest[nul + 1..];
    Some(Decoded { reader_gen, post_to_descendants, channel, data })
}

/// `true` iff a subscriber on `reader_channel` should receive a message
/// posted to `writer_channel`. Three ways to match:
///
/// - exact: the channel names are identical.
/// - the writer opted in to descendants and the reader's channel is a
///   (plain string) prefix extension of the writer's.
/// - the reader opted in to descendants and the writer's channel is a
///   (plain string) prefix extension of the reader's.
pub fn topic_matches(
    reader_channel: &str,
    reader_handles_descendants: bool,
    writer_channel: &str,
    writer_posts_to_descendants: bool,
) -> bool {
    if reader_channel == writer_channel {
        return true;
    }
    if writer_posts_to_descendants && is_descendant(reader_channel, writer_channel) {
        return true;
    }
    if reader_handles_descendants && is_descendant(writer_channel, reader_channel) {
        return true;
    }
    false
}

/// `true` iff `candidate` is a strict extension of `ancestor`, i.e. `ancestor`
/// is a proper prefix of `candidate`. No separator is required between them —
/// `"ch"` is a descendant of `"c"`.
fn is_descendant(candidate: &str, ancestor: &str) -> bool {
    candidate.len() > ancestor.len() && candidate.starts_with(ancestor)
}

/// Decodes a message and, if it passes both the generation gate and the
/// topic match, returns its payload. `subscriber_gen` is the generation a
/// subscriber captured when it was created: any message stamped with an
/// older generation predates the subscription and is dropped.
pub fn deserialize_and_filter<'a>(
    bytes: &'a [u8],
    subscriber_gen: u64,
    subscriber_channel: &str,
    subscriber_handles_descendants: bool,
) -> Option<Decoded<'a>> {
    let decoded = decode(bytes)?;
    if decoded.reader_gen < subscriber_gen {
        return None;
    }
    if !topic_matches(
        subscriber_channel,
        subscriber_handles_descendants,
        decoded.channel,
        decoded.post_to_descendants,
    ) {
        return None;
    }
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_message() {
        let mut buf = Vec::new();
        serialize(7, true, "orders.fx", b"hello", &mut buf);
        assert_eq!(buf.len(), serialized_size("orders.fx", 5));

        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.reader_gen, 7);
        assert!(decoded.post_to_descendants);
        assert_eq!(decoded.channel, "orders.fx");
        assert_eq!(decoded.data, b"hello");
    }

    #[test]
    fn rejects_truncated_and_non_utf8_frames() {
        assert!(decode(&[1, 2, 3]).is_none());
        let mut buf = Vec::new();
        serialize(0, false, "c", b"", &mut buf);
        buf.truncate(buf.len() - 1); // drop the payload, header still intact
        assert!(decode(&buf).is_some());
        buf.truncate(8); // drop everything past the generation
        assert!(decode(&buf).is_none());
    }

    #[test]
    fn topic_matches_exact_only_without_descendant_flags() {
        assert!(topic_matches("orders", false, "orders", false));
        assert!(!topic_matches("orders", false, "orders.fx", false));
        assert!(!topic_matches("orders.fx", false, "orders", false));
    }

    #[test]
    fn topic_matches_writer_offered_descendants() {
        assert!(topic_matches("orders.fx", false, "orders", true));
        assert!(topic_matches("orders.fxrate", false, "orders", true));
        // no separator required: any proper prefix extension counts
        assert!(topic_matches("ordersx", false, "orders", true));
        assert!(!topic_matches("order", false, "orders", true));
    }

    #[test]
    fn topic_matches_reader_handles_descendants() {
        assert!(topic_matches("orders", true, "orders.fx", false));
        assert!(topic_matches("orders", true, "ordersx", false));
    }

    #[test]
    fn single_char_channel_matches_unseparated_extension() {
        // a subscriber on "c" with handle_descendants must see a post to "ch"
        assert!(topic_matches("c", true, "ch", false));
    }

    #[test]
    fn generation_gate_drops_messages_older_than_the_subscriber() {
        let mut buf = Vec::new();
        serialize(4, false, "orders", b"stale", &mut buf);
        assert!(deserialize_and_filter(&buf, 5, "orders", false).is_none());
        assert!(deserialize_and_filter(&buf, 4, "orders", false).is_some());
        assert!(deserialize_and_filter(&buf, 3, "orders", false).is_some());
    }
}
