use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, UvmError};

pub(crate) const TAG_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of the method words sent to an authenticated subchannel, each word taken in
/// little-endian byte order and the runs in stream order.
pub(crate) fn method_stream_tag<'a>(
    key: &[u8],
    runs: impl IntoIterator<Item = &'a [u32]>,
) -> Result<[u8; TAG_LEN]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| UvmError::assertion(format!("{}-byte method stream key rejected", key.len())))?;
    for run in runs {
        for word in run {
            mac.update(&word.to_le_bytes());
        }
    }
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn words(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn words_are_signed_little_endian_across_runs() {
        // RFC 4231 test case 2; its 28-byte message splits into a 4-word and a 3-word run.
        let message = words(b"what do ya want for nothing?");
        let tag = method_stream_tag(b"Jefe", [&message[..4], &message[4..]]).unwrap();
        assert_eq!(
            hex(&tag),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn empty_stream_is_still_tagged() {
        let tag = method_stream_tag(&[0x5a; 32], std::iter::empty()).unwrap();
        assert_ne!(tag, [0u8; TAG_LEN]);
        assert_eq!(tag, method_stream_tag(&[0x5a; 32], [&[][..]]).unwrap());
    }
}
