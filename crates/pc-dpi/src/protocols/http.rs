//! HTTP Request Extractor
//!
//! Finds the request line, the `Host` header and the body of a plain-text
//! HTTP request carried in a single TCP segment on port 80.

use memchr::memmem;
use pc_common::{L4Protocol, MIN_HTTP_DATA_LEN};

const HTTP_PORT: u16 = 80;

/// Request method
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Borrowed view of an HTTP request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HttpView<'a> {
    /// Method of the request line
    pub method: Option<HttpMethod>,

    /// Request line after the method, e.g. `/x HTTP/1.1`
    pub url: Option<&'a [u8]>,

    /// `Host` header value
    pub host: Option<&'a [u8]>,

    /// Bytes after the blank line ending the headers
    pub body: Option<&'a [u8]>,
}

/// Extract an [`HttpView`] from a TCP payload.
///
/// Returns `None` unless the segment is TCP on port 80 (either side),
/// carries at least `MIN_HTTP_DATA_LEN` bytes and has a `GET`/`POST`
/// request line or a `Host` header. Lines are CRLF-terminated; scanning
/// stops at the first blank line.
pub fn extract_http(
    protocol: L4Protocol,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Option<HttpView<'_>> {
    if protocol != L4Protocol::Tcp {
        return None;
    }
    if src_port != HTTP_PORT && dst_port != HTTP_PORT {
        return None;
    }
    if payload.len() < MIN_HTTP_DATA_LEN {
        return None;
    }

    let mut view = HttpView::default();
    let mut start = 0;

    for end in memmem::find_iter(payload, b"\r\n") {
        let line = &payload[start..end];

        if let Some(url) = line.strip_prefix(b"POST ") {
            view.method = Some(HttpMethod::Post);
            view.url = Some(url);
        } else if let Some(url) = line.strip_prefix(b"GET ") {
            view.method = Some(HttpMethod::Get);
            view.url = Some(url);
        } else if line.starts_with(b"Host:") {
            // Value starts after "Host: "
            view.host = Some(line.get(6..).unwrap_or_default());
        }

        if payload[end + 2..].starts_with(b"\r\n") {
            view.body = Some(&payload[end + 4..]);
            break;
        }
        start = end + 2;
    }

    if view.method.is_none() && view.host.is_none() {
        return None;
    }
    Some(view)
}
