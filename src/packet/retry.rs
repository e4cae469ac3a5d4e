//! Retry packet integrity protection (RFC 9001 Section 5.8, RFC 9369
//! Section 3.3.3).
//!
//! The 16-byte integrity tag is the AES-128-GCM authentication tag over the
//! retry pseudo-packet: the length-prefixed original destination connection
//! ID followed by the retry packet up to, but excluding, the tag itself.
//! Key and nonce are fixed per version.

use crate::types::ConnectionId;
use crate::version::Version;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Key, Nonce};

/// Length of the retry integrity tag.
pub const RETRY_INTEGRITY_TAG_LENGTH: usize = 16;

// RFC 9001 Section 5.8.
const KEY_V1: [u8; 16] = [
    0xbe, 0x0c, 0x69, 0x0b, 0x9f, 0x66, 0x57, 0x5a, 0x1d, 0x76, 0x6b, 0x54, 0xe3, 0x68, 0xc8,
    0x4e,
];
const NONCE_V1: [u8; 12] = [
    0x46, 0x15, 0x99, 0xd3, 0x5d, 0x63, 0x2b, 0xf2, 0x23, 0x98, 0x25, 0xbb,
];

// RFC 9369 Section 3.3.3.
const KEY_V2: [u8; 16] = [
    0x8f, 0xb4, 0xb0, 0x1b, 0x56, 0xac, 0x48, 0xe2, 0x60, 0xfb, 0xcb, 0xce, 0xad, 0x7c, 0xcc,
    0x92,
];
const NONCE_V2: [u8; 12] = [
    0xd8, 0x69, 0x69, 0xbc, 0x2d, 0x7c, 0x6d, 0x99, 0x90, 0xef, 0xb0, 0x4a,
];

// draft-ietf-quic-tls-29; shared by the draft versions this client accepts.
const KEY_DRAFT: [u8; 16] = [
    0xcc, 0xce, 0x18, 0x7e, 0xd0, 0x9a, 0x09, 0xd0, 0x57, 0x28, 0x15, 0x5a, 0x6c, 0xb9, 0x6b,
    0xe1,
];
const NONCE_DRAFT: [u8; 12] = [
    0xe5, 0x49, 0x30, 0xf9, 0x7f, 0x21, 0x36, 0xf0, 0x53, 0x0a, 0x8c, 0x1c,
];

fn keys_for(version: Version) -> (&'static [u8; 16], &'static [u8; 12]) {
    match version {
        Version::V2 => (&KEY_V2, &NONCE_V2),
        Version::V1 => (&KEY_V1, &NONCE_V1),
        _ => (&KEY_DRAFT, &NONCE_DRAFT),
    }
}

/// Compute the integrity tag for a retry packet.
///
/// `retry_sans_tag` is the serialized retry packet without its trailing
/// 16 tag bytes, exactly as received from (or sent to) the wire.
pub fn retry_integrity_tag(
    version: Version,
    original_destination_cid: &ConnectionId,
    retry_sans_tag: &[u8],
) -> [u8; RETRY_INTEGRITY_TAG_LENGTH] {
    let mut pseudo = Vec::with_capacity(1 + original_destination_cid.len() + retry_sans_tag.len());
    pseudo.push(original_destination_cid.len() as u8);
    pseudo.extend_from_slice(original_destination_cid.as_bytes());
    pseudo.extend_from_slice(retry_sans_tag);

    let (key, nonce) = keys_for(version);
    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key));
    // AEAD over an empty plaintext leaves exactly the authentication tag.
    let sealed = cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: &[], aad: &pseudo })
        .expect("AES-GCM sealing with a fixed key cannot fail");

    let mut tag = [0u8; RETRY_INTEGRITY_TAG_LENGTH];
    tag.copy_from_slice(&sealed);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_rfc9001_appendix_a4_vector() {
        // Retry packet from RFC 9001 Appendix A.4:
        //   ff000000010008f067a5502a4262b574 6f6b656e04a265ba2eff4d829058fb3f
        //   0f2496ba
        // with the client's original DCID 0x8394c8f03e515708.
        let odcid = ConnectionId::from_slice(&[
            0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08,
        ])
        .unwrap();
        let retry_sans_tag: &[u8] = &[
            0xff, 0x00, 0x00, 0x00, 0x01, // first byte, version 1
            0x00, // dcid length 0
            0x08, 0xf0, 0x67, 0xa5, 0x50, 0x2a, 0x42, 0x62, 0xb5, // scid
            0x74, 0x6f, 0x6b, 0x65, 0x6e, // "token"
        ];
        let expected: [u8; 16] = [
            0x04, 0xa2, 0x65, 0xba, 0x2e, 0xff, 0x4d, 0x82, 0x90, 0x58, 0xfb, 0x3f, 0x0f, 0x24,
            0x96, 0xba,
        ];
        assert_eq!(retry_integrity_tag(Version::V1, &odcid, retry_sans_tag), expected);
    }

    #[test]
    fn tag_depends_on_original_destination_cid() {
        let retry_sans_tag = [0xf0, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x0b, 0x01, 0x02];
        let a = ConnectionId::from_slice(&[0x11; 8]).unwrap();
        let b = ConnectionId::from_slice(&[0x22; 8]).unwrap();
        assert_ne!(
            retry_integrity_tag(Version::V1, &a, &retry_sans_tag),
            retry_integrity_tag(Version::V1, &b, &retry_sans_tag)
        );
    }

    #[test]
    fn tag_depends_on_version_keys() {
        let retry_sans_tag = [0xf0, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x0b, 0x01, 0x02];
        let odcid = ConnectionId::from_slice(&[0x11; 8]).unwrap();
        let v1 = retry_integrity_tag(Version::V1, &odcid, &retry_sans_tag);
        let v2 = retry_integrity_tag(Version::V2, &odcid, &retry_sans_tag);
        let draft = retry_integrity_tag(Version::DRAFT_29, &odcid, &retry_sans_tag);
        assert_ne!(v1, v2);
        assert_ne!(v1, draft);
    }
}
