//! TLS Server Name Extractor
//!
//! Heuristic ClientHello scan. The payload must start with a TLS 1.0
//! handshake record header; the server name is located by its
//! length-prefixed SNI extension framing rather than by walking the
//! handshake structure.

use pc_common::{HTTPS_LEN_OFFSET, HTTPS_URL_OFFSET};

const HANDSHAKE_PREFIX: [u8; 3] = [0x16, 0x03, 0x01];

/// Borrowed server name from a ClientHello
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlsView<'a> {
    pub server_name: &'a [u8],
}

/// Extract the SNI host name from a ClientHello payload.
///
/// Scans for `00 00 00 XX` (`XX != 0`), reads the big-endian name length
/// at marker + 7 and returns the name at marker + 9. Candidates whose
/// length is zero, exceeds the payload or runs past its end are skipped.
pub fn extract_tls_sni(payload: &[u8]) -> Option<TlsView<'_>> {
    if !payload.starts_with(&HANDSHAKE_PREFIX) {
        return None;
    }

    let len = payload.len();
    let mut i = 0;
    while i + HTTPS_URL_OFFSET < len {
        if payload[i..i + 3] == [0, 0, 0] && payload[i + 3] != 0 {
            let name_len = u16::from_be_bytes([
                payload[i + HTTPS_LEN_OFFSET],
                payload[i + HTTPS_LEN_OFFSET + 1],
            ]) as usize;

            if name_len > 0 && name_len <= len {
                let start = i + HTTPS_URL_OFFSET;
                if let Some(server_name) = payload.get(start..start + name_len) {
                    return Some(TlsView { server_name });
                }
            }
        }
        i += 1;
    }
    None
}
