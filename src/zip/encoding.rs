//! Entry name and comment charsets.
//!
//! Names are UTF-8 by default, in which case general purpose flag bit 11 is
//! set. Any other `encoding_rs` encoding may be chosen for archives that
//! must be read by tools expecting a legacy code page; text that the code
//! page cannot represent is rejected rather than replaced.

use encoding_rs::{Encoding, UTF_8};

use super::structures::FLAG_UTF8;
use crate::error::{ZipError, ZipResult};

/// Encode `text`, returning the bytes and the general purpose flags that
/// describe them.
pub(crate) fn encode(text: &str, encoding: &'static Encoding) -> ZipResult<(Vec<u8>, u16)> {
    if encoding == UTF_8 {
        return Ok((text.as_bytes().to_vec(), FLAG_UTF8));
    }
    let (bytes, used, had_errors) = encoding.encode(text);
    if had_errors || used != encoding {
        return Err(ZipError::Encoding {
            action: "encode",
            text: text.to_string(),
            charset: encoding.name(),
        });
    }
    Ok((bytes.into_owned(), 0))
}

/// Decode header bytes. Entries flagged with bit 11 are always UTF-8.
pub(crate) fn decode(bytes: &[u8], flags: u16, encoding: &'static Encoding) -> ZipResult<String> {
    let encoding = if flags & FLAG_UTF8 != 0 { UTF_8 } else { encoding };
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
        .ok_or_else(|| ZipError::Encoding {
            action: "decode",
            text: String::from_utf8_lossy(bytes).into_owned(),
            charset: encoding.name(),
        })
}
