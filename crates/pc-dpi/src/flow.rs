//! Per-packet flow view
//!
//! L3/L4 header fields of one IPv4 packet plus the DPI views extracted
//! from its payload. Everything borrows from the packet buffer.

use pc_common::{L4Protocol, MacAddr};
use std::net::Ipv4Addr;

use crate::protocols::{extract_http, extract_tls_sni, HttpView, TlsView};
use crate::{DpiError, Result};

const IPV4_MIN_HEADER: usize = 20;
const TCP_MIN_HEADER: usize = 20;
const UDP_HEADER: usize = 8;

/// Parsed packet handed to the matcher
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowView<'a> {
    pub src_mac: MacAddr,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: L4Protocol,
    pub src_port: u16,
    pub dst_port: u16,

    /// L4 payload
    pub payload: &'a [u8],

    pub http: Option<HttpView<'a>>,
    pub tls: Option<TlsView<'a>>,

    /// App id of the signature that matched, if any
    pub matched_app_id: Option<u32>,

    /// Verdict of the matched signature
    pub drop: bool,
}

impl<'a> FlowView<'a> {
    /// Create a view from already-parsed header fields
    pub fn new(
        src_mac: MacAddr,
        protocol: L4Protocol,
        src_port: u16,
        dst_port: u16,
        payload: &'a [u8],
    ) -> Self {
        Self {
            src_mac,
            src: Ipv4Addr::UNSPECIFIED,
            dst: Ipv4Addr::UNSPECIFIED,
            protocol,
            src_port,
            dst_port,
            payload,
            http: None,
            tls: None,
            matched_app_id: None,
            drop: false,
        }
    }

    /// Parse an IPv4 datagram carrying TCP or UDP.
    ///
    /// `packet` starts at the IP header. Trailing bytes past the IP total
    /// length are ignored. Non-first fragments and other L4 protocols are
    /// reported as unsupported.
    pub fn parse_ipv4(src_mac: MacAddr, packet: &'a [u8]) -> Result<Self> {
        if packet.len() < IPV4_MIN_HEADER {
            return Err(DpiError::Truncated("ipv4"));
        }
        if packet[0] >> 4 != 4 {
            return Err(DpiError::UnsupportedPacket("not ipv4"));
        }

        let ihl = ((packet[0] & 0x0F) as usize) * 4;
        let total_len = u16::from_be_bytes([packet[2], packet[3]]) as usize;
        if ihl < IPV4_MIN_HEADER || total_len < ihl || total_len > packet.len() {
            return Err(DpiError::Truncated("ipv4"));
        }
        let packet = &packet[..total_len];

        let frag_offset = u16::from_be_bytes([packet[6], packet[7]]) & 0x1FFF;
        if frag_offset != 0 {
            return Err(DpiError::UnsupportedPacket("non-first fragment"));
        }

        let protocol = L4Protocol::from_raw(packet[9]);
        let src = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
        let dst = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
        let l4 = &packet[ihl..];

        let (src_port, dst_port, payload) = match protocol {
            L4Protocol::Tcp => {
                if l4.len() < TCP_MIN_HEADER {
                    return Err(DpiError::Truncated("tcp"));
                }
                let doff = ((l4[12] >> 4) as usize) * 4;
                if doff < TCP_MIN_HEADER || doff > l4.len() {
                    return Err(DpiError::Truncated("tcp"));
                }
                let (sport, dport) = ports(l4);
                (sport, dport, &l4[doff..])
            }
            L4Protocol::Udp => {
                if l4.len() < UDP_HEADER {
                    return Err(DpiError::Truncated("udp"));
                }
                let udp_len = u16::from_be_bytes([l4[4], l4[5]]) as usize;
                if udp_len < UDP_HEADER || udp_len > l4.len() {
                    return Err(DpiError::Truncated("udp"));
                }
                let (sport, dport) = ports(l4);
                (sport, dport, &l4[UDP_HEADER..udp_len])
            }
            L4Protocol::Other(_) => return Err(DpiError::UnsupportedPacket("not tcp/udp")),
        };

        let mut flow = Self::new(src_mac, protocol, src_port, dst_port, payload);
        flow.src = src;
        flow.dst = dst;
        Ok(flow)
    }

    /// Run the HTTP and TLS extractors over the payload
    pub fn inspect(&mut self) {
        self.http = extract_http(self.protocol, self.src_port, self.dst_port, self.payload);
        self.tls = extract_tls_sni(self.payload);
    }
}

#[inline(always)]
fn ports(l4: &[u8]) -> (u16, u16) {
    (
        u16::from_be_bytes([l4[0], l4[1]]),
        u16::from_be_bytes([l4[2], l4[3]]),
    )
}
