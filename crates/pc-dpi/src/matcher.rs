//! Flow Matcher
//!
//! Decides whether a [`FlowView`] matches an [`AppSignature`].
//!
//! A signature is tested in stages: protocol, non-empty payload, source
//! port, destination port ranges, then its content rule. Content rules
//! are exclusive: URL patterns win over byte positions, and a signature
//! with neither matches on ports alone.

use pc_common::MAX_URL_MATCH_LEN;

use crate::flow::FlowView;
use crate::signature::{AppSignature, Pattern, PortRange};

/// Destination port test.
///
/// Empty ranges match every port. When any range is negated, the port
/// matches unless it lies in a negated range; otherwise it must lie in
/// at least one range.
#[inline]
pub fn match_port(ranges: &[PortRange], port: u16) -> bool {
    if ranges.is_empty() {
        return true;
    }
    if ranges.iter().any(|r| r.negate) {
        !ranges.iter().any(|r| r.negate && r.contains(port))
    } else {
        ranges.iter().any(|r| r.contains(port))
    }
}

/// Byte-position test. All positions must hold; a signature without
/// positions never matches here.
pub fn match_by_position(flow: &FlowView<'_>, sig: &AppSignature) -> bool {
    if sig.byte_positions.is_empty() {
        return false;
    }
    let payload = flow.payload;
    sig.byte_positions.iter().all(|pos| {
        pos.resolve(payload.len())
            .is_some_and(|index| payload[index] == pos.expected)
    })
}

/// Host and request pattern test.
///
/// The host candidate is the TLS server name when present, otherwise the
/// HTTP `Host` value. The request candidate is the HTTP request line.
pub fn match_by_url(flow: &FlowView<'_>, sig: &AppSignature) -> bool {
    let host = match (&flow.tls, &flow.http) {
        (Some(tls), _) => Some(tls.server_name),
        (None, Some(http)) => http.host,
        (None, None) => None,
    };
    if let (Some(host), Some(pattern)) = (host, &sig.host_pattern) {
        if candidate_matches(pattern, host) {
            tracing::trace!(app_id = sig.app_id, pattern = pattern.as_str(), "Matched host");
            return true;
        }
    }

    if let (Some(url), Some(pattern)) = (flow.http.and_then(|h| h.url), &sig.request_pattern) {
        if candidate_matches(pattern, url) {
            tracing::trace!(app_id = sig.app_id, pattern = pattern.as_str(), "Matched request");
            return true;
        }
    }
    false
}

/// Full signature test
pub fn match_one(flow: &FlowView<'_>, sig: &AppSignature) -> bool {
    if !sig.protocol.accepts(flow.protocol) {
        return false;
    }
    if flow.payload.is_empty() {
        return false;
    }
    if let Some(sport) = sig.source_port {
        if flow.src_port != sport {
            return false;
        }
    }
    if !match_port(&sig.dest_port_ranges, flow.dst_port) {
        return false;
    }

    if sig.uses_url() {
        match_by_url(flow, sig)
    } else if !sig.byte_positions.is_empty() {
        match_by_position(flow, sig)
    } else {
        true
    }
}

/// First signature in `apps` accepted by `filter` that matches the flow
pub fn first_match<'s, F>(
    apps: &'s [AppSignature],
    flow: &FlowView<'_>,
    mut filter: F,
) -> Option<&'s AppSignature>
where
    F: FnMut(&AppSignature) -> bool,
{
    apps.iter().find(|sig| filter(sig) && match_one(flow, sig))
}

/// Truncate a candidate at its first NUL and to the match buffer size,
/// then search it. Empty candidates never match.
fn candidate_matches(pattern: &Pattern, candidate: &[u8]) -> bool {
    let candidate = match memchr::memchr(0, candidate) {
        Some(nul) => &candidate[..nul],
        None => candidate,
    };
    let candidate = &candidate[..candidate.len().min(MAX_URL_MATCH_LEN - 1)];
    !candidate.is_empty() && pattern.is_match(candidate)
}
