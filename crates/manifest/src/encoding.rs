use crate::error::{ErrorKind, Result};
use encoding_rs::GBK;

pub(crate) const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decodes snapshot bytes: UTF-8 with BOM, plain UTF-8, then GBK.
///
/// `encoding_rs` decodes GBK with the GB18030 decoder, which also covers
/// GB2312. Nothing is decoded lossily; bytes that fit none of these are an
/// [`Encoding`](ErrorKind::Encoding) error.
pub(crate) fn decode(bytes: &[u8]) -> Result<String> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(text.to_string());
    }
    match GBK.decode_without_bom_handling_and_without_replacement(bytes) {
        Some(text) => {
            tracing::debug!("Manifest decoded as GBK");
            Ok(text.into_owned())
        },
        None => exn::bail!(ErrorKind::Encoding),
    }
}
