//! Property tests for the frame codecs

use proptest::prelude::*;

use nuki_core::frame;
use nuki_core::types::{AuthorizationId, CommandId, SharedKey};

proptest! {
    #[test]
    fn plain_frame_roundtrip(command in any::<u16>(), payload in proptest::collection::vec(any::<u8>(), 0..200)) {
        let frame = frame::encode_plain(CommandId(command), &payload);
        let (decoded_command, decoded_payload) = frame::decode_plain(&frame).unwrap();
        prop_assert_eq!(decoded_command, CommandId(command));
        prop_assert_eq!(decoded_payload, payload);
    }

    #[test]
    fn encrypted_frame_roundtrip(
        command in any::<u16>(),
        payload in proptest::collection::vec(any::<u8>(), 0..200),
        auth_id in any::<u32>(),
        key in any::<[u8; 32]>(),
    ) {
        let key = SharedKey::new(key);
        let auth_id = AuthorizationId::from_u32(auth_id);
        let frame = frame::encode_encrypted(CommandId(command), &payload, auth_id, &key).unwrap();
        let (decoded_command, decoded_payload) = frame::decode_encrypted(&frame, &key).unwrap();
        prop_assert_eq!(decoded_command, CommandId(command));
        prop_assert_eq!(decoded_payload, payload);
    }

    #[test]
    fn corrupted_plain_frame_never_decodes_silently(
        payload in proptest::collection::vec(any::<u8>(), 0..64),
        flip in 0usize..16,
        mask in 1u8..=255,
    ) {
        let mut frame = frame::encode_plain(CommandId::CHALLENGE, &payload);
        let index = flip % frame.len();
        frame[index] ^= mask;
        // Either the CRC rejects the frame, or the flip landed such that
        // the decoded command/payload differ from an unflipped decode; a
        // single bit flip may never round-trip to the original bytes.
        if let Ok((command, decoded)) = frame::decode_plain(&frame) {
            prop_assert!(command != CommandId::CHALLENGE || decoded != payload);
        }
    }

    #[test]
    fn encrypted_frame_rejects_any_tamper(
        payload in proptest::collection::vec(any::<u8>(), 0..64),
        flip in 0usize..16,
        mask in 1u8..=255,
    ) {
        let key = SharedKey::new([0x5A; 32]);
        let mut frame =
            frame::encode_encrypted(CommandId::STATUS, &payload, AuthorizationId::from_u32(9), &key)
                .unwrap();
        // Tamper anywhere in the ciphertext region.
        let start = 30;
        let index = start + flip % (frame.len() - start);
        frame[index] ^= mask;
        prop_assert!(frame::decode_encrypted(&frame, &key).is_err());
    }
}
