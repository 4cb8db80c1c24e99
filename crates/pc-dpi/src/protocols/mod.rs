//! Protocol Extractors
//!
//! Single-packet views of HTTP requests and TLS ClientHello server names.
//! Views borrow from the payload and are never kept past the packet.

pub mod http;
pub mod tls;

pub use http::{extract_http, HttpMethod, HttpView};
pub use tls::{extract_tls_sni, TlsView};
