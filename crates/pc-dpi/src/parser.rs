//! Feature-list parser
//!
//! Parses application feature strings into [`AppSignature`]s.
//!
//! A feature-list line names one application and carries one or more
//! feature strings:
//!
//! ```text
//! 1001 example:[tcp;;443;example\.com;;,udp;;3478|!5000-6000;;;0:17|-1:0a]
//! ```
//!
//! Each feature string has six `;`-separated fields:
//! `<protocol>;<src_port>;<dst_port_ranges>;<host_pattern>;<request_pattern>;<byte_positions>`.

use pc_common::{
    truncate_str, MAX_APP_NAME_LEN, MAX_HOST_URL_LEN, MAX_POS_INFO_PER_FEATURE,
    MAX_PORT_RANGE_NUM, MAX_REQUEST_URL_LEN, MIN_FEATURE_STR_LEN,
};

use crate::signature::{AppSignature, BytePosition, Pattern, PortRange, Protocol};
use crate::{DpiError, Result};

/// Number of `;`-separated fields in a complete feature string
const FEATURE_FIELDS: usize = 6;

/// Parse one feature string for `app_id`/`name`.
///
/// Unusable port-range and byte-position tokens are logged and skipped;
/// the rest of the signature is kept. An unknown protocol, a wrong field
/// count or an invalid regex rejects the whole feature.
pub fn parse_feature(app_id: u32, name: &str, feature: &str) -> Result<AppSignature> {
    let fields: Vec<&str> = feature.split(';').collect();

    // Short strings are allowed to leave out trailing fields.
    if fields.len() != FEATURE_FIELDS && feature.len() > MIN_FEATURE_STR_LEN {
        return Err(DpiError::Malformed {
            feature: feature.to_string(),
            reason: "expected 6 ';'-separated fields",
        });
    }
    let field = |index: usize| fields.get(index).map(|f| f.trim()).unwrap_or("");

    let protocol = Protocol::from_token(field(0))
        .ok_or_else(|| DpiError::UnsupportedProtocol(field(0).to_string()))?;

    let mut sig = AppSignature::new(app_id, truncate_str(name, MAX_APP_NAME_LEN - 1), protocol);
    sig.source_port = parse_source_port(app_id, field(1));
    sig.dest_port_ranges = parse_port_ranges(app_id, field(2));
    sig.host_pattern = parse_pattern(field(3), MAX_HOST_URL_LEN - 1)?;
    sig.request_pattern = parse_pattern(field(4), MAX_REQUEST_URL_LEN - 1)?;
    sig.byte_positions = parse_positions(app_id, field(5));

    Ok(sig)
}

/// Parse a whole feature-list line into one signature per feature string.
///
/// Format: `<app_id>[:| ]<name>[<feature>,<feature>...]`. Features that
/// fail to parse are logged and skipped; a line without any valid
/// feature is an error.
pub fn parse_line(line: &str) -> Result<Vec<AppSignature>> {
    let line = line.trim();

    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(DpiError::InvalidLine("missing app id"));
    }
    let app_id: u32 = line[..digits]
        .parse()
        .map_err(|_| DpiError::InvalidLine("app id out of range"))?;

    let rest = line[digits..].trim_start_matches(|c: char| c == ':' || c.is_whitespace());
    let name_end = rest.find([':', '[']).unwrap_or(rest.len());
    let name = rest[..name_end].trim();

    let after_name = &rest[name_end..];
    let open = after_name
        .find('[')
        .ok_or(DpiError::InvalidLine("missing feature list"))?;
    let close = after_name
        .rfind(']')
        .filter(|&close| close > open)
        .ok_or(DpiError::InvalidLine("unterminated feature list"))?;

    let mut signatures = Vec::new();
    for feature in after_name[open + 1..close].split(',') {
        match parse_feature(app_id, name, feature) {
            Ok(sig) => signatures.push(sig),
            Err(e) => {
                tracing::warn!(app_id, feature, error = %e, "Skipping feature");
            }
        }
    }

    if signatures.is_empty() {
        return Err(DpiError::InvalidLine("no valid feature"));
    }
    Ok(signatures)
}

fn parse_source_port(app_id: u32, field: &str) -> Option<u16> {
    if field.is_empty() {
        return None;
    }
    match field.parse::<u16>() {
        Ok(0) => None,
        Ok(port) => Some(port),
        Err(_) => {
            tracing::warn!(app_id, sport = field, "Ignoring invalid source port");
            None
        }
    }
}

fn parse_port_ranges(app_id: u32, field: &str) -> Vec<PortRange> {
    let mut ranges = Vec::new();
    if field.is_empty() {
        return ranges;
    }

    for token in field.split('|') {
        let Some(range) = parse_port_range(token) else {
            tracing::warn!(app_id, token, "Skipping invalid port range");
            continue;
        };
        if ranges.len() == MAX_PORT_RANGE_NUM {
            tracing::warn!(app_id, token, "Too many port ranges, skipping");
            continue;
        }
        ranges.push(range);
    }
    ranges
}

fn parse_port_range(token: &str) -> Option<PortRange> {
    if !token
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b' ' | b'!' | b'-'))
    {
        return None;
    }

    let token = token.trim();
    let (negate, body) = match token.strip_prefix('!') {
        Some(body) => (true, body.trim()),
        None => (false, token),
    };

    let (start, end) = match body.split_once('-') {
        Some((a, b)) => (a.trim().parse::<u16>().ok()?, b.trim().parse::<u16>().ok()?),
        None => {
            let port = body.parse::<u16>().ok()?;
            (port, port)
        }
    };
    if start > end {
        return None;
    }

    Some(PortRange { negate, start, end })
}

fn parse_pattern(field: &str, max: usize) -> Result<Option<Pattern>> {
    if field.is_empty() {
        return Ok(None);
    }
    Pattern::new(truncate_str(field, max)).map(Some)
}

fn parse_positions(app_id: u32, field: &str) -> Vec<BytePosition> {
    let mut positions = Vec::new();
    if field.is_empty() {
        return positions;
    }

    for token in field.split('|') {
        let Some(position) = parse_position(token) else {
            tracing::warn!(app_id, token, "Skipping invalid byte position");
            continue;
        };
        if positions.len() == MAX_POS_INFO_PER_FEATURE {
            tracing::warn!(app_id, token, "Too many byte positions, skipping");
            continue;
        }
        positions.push(position);
    }
    positions
}

fn parse_position(token: &str) -> Option<BytePosition> {
    let (pos, value) = token.trim().split_once(':')?;
    let position = pos.trim().parse::<i32>().ok()?;
    let value = value.trim();
    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    let expected = u8::from_str_radix(hex, 16).ok()?;
    Some(BytePosition { position, expected })
}
