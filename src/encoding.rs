use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Utf8,
    /// Each char truncated to 7 bits.
    Ascii,
    /// Each char truncated to 8 bits.
    Latin1,
    Utf16Le,
    Hex,
    Base64,
}

impl Encoding {
    pub fn encode(self, text: &str) -> Result<Bytes> {
        let bytes = match self {
            Encoding::Utf8 => return Ok(Bytes::copy_from_slice(text.as_bytes())),
            Encoding::Ascii => text.chars().map(|c| (c as u32 & 0x7f) as u8).collect(),
            Encoding::Latin1 => text.chars().map(|c| (c as u32 & 0xff) as u8).collect(),
            Encoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            Encoding::Hex => hex::decode(text)
                .map_err(|e| Error::InvalidArgument(format!("invalid hex chunk: {}", e)))?,
            Encoding::Base64 => STANDARD
                .decode(text)
                .map_err(|e| Error::InvalidArgument(format!("invalid base64 chunk: {}", e)))?,
        };

        Ok(Bytes::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_encodings() {
        assert_eq!(Encoding::Utf8.encode("héllo").unwrap(), "héllo".as_bytes());
        assert_eq!(Encoding::Latin1.encode("hé").unwrap(), &b"h\xe9"[..]);
        assert_eq!(Encoding::Ascii.encode("hé").unwrap(), &b"hi"[..]);
        assert_eq!(Encoding::Utf16Le.encode("hi").unwrap(), &b"h\0i\0"[..]);
    }

    #[test]
    fn binary_encodings() {
        assert_eq!(Encoding::Hex.encode("68656c6c6f").unwrap(), &b"hello"[..]);
        assert_eq!(Encoding::Base64.encode("aGVsbG8=").unwrap(), &b"hello"[..]);
    }

    #[test]
    fn malformed_binary_text_is_rejected() {
        assert!(matches!(
            Encoding::Hex.encode("abc"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Encoding::Hex.encode("zz"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Encoding::Base64.encode("not base64!"),
            Err(Error::InvalidArgument(_))
        ));
    }
}
