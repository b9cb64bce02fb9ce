//! Wire codec for [`Envelope`] (C2 behavior): JSON serialization and
//! best-effort parsing that tells protocol envelopes apart from arbitrary
//! datagrams so the engine can pass the latter straight through.

use rdp_core::Envelope;

/// Serialize an envelope to its wire bytes (a JSON object).
pub fn serialize(envelope: &Envelope) -> Vec<u8> {
    serde_json::to_vec(envelope).expect("Envelope serialization is infallible")
}

/// Parse wire bytes into an envelope.
///
/// Returns `None` when `bytes` is not a JSON object, or is a JSON object
/// missing `id` or `flags` — the two fields the spec requires to recognize
/// a datagram as a protocol envelope. This lets the engine forward anything
/// else to the non-protocol passthrough channel instead of failing.
pub fn parse(bytes: &[u8]) -> Option<Envelope> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    let object = value.as_object()?;
    if !object.contains_key("id") || !object.contains_key("flags") {
        return None;
    }
    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdp_core::envelope::{encode_flags, CodecTag, MessageKind};
    use serde_json::json;

    fn sample_envelope() -> Envelope {
        Envelope {
            id: "123".into(),
            body: json!({"message": "Hello ReliableUDP"}),
            flags: encode_flags(MessageKind::Req, CodecTag::None, false, false),
            checksum: Some("deadbeef".into()),
            ci: None,
            ct: None,
            os: None,
            cs: None,
        }
    }

    #[test]
    fn round_trips_through_serialize_and_parse() {
        let envelope = sample_envelope();
        let bytes = serialize(&envelope);
        let parsed = parse(&bytes).expect("valid envelope must parse");
        assert_eq!(parsed.id, envelope.id);
        assert_eq!(parsed.body, envelope.body);
        assert_eq!(parsed.flags, envelope.flags);
        assert_eq!(parsed.checksum, envelope.checksum);
    }

    #[test]
    fn non_json_bytes_are_passthrough() {
        assert!(parse(b"not json at all").is_none());
    }

    #[test]
    fn json_missing_required_fields_is_passthrough() {
        let bytes = serde_json::to_vec(&json!({"hello": "world"})).unwrap();
        assert!(parse(&bytes).is_none());
    }

    #[test]
    fn json_array_is_passthrough() {
        let bytes = serde_json::to_vec(&json!([1, 2, 3])).unwrap();
        assert!(parse(&bytes).is_none());
    }

    #[test]
    fn utf8_bodies_round_trip_byte_exact() {
        let mut envelope = sample_envelope();
        envelope.body = json!({"message": "Hello 世界 🌍 مرحبا"});
        let bytes = serialize(&envelope);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.body, envelope.body);
    }
}
