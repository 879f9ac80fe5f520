//! Textual address/offset parsing and hex conversions used by the
//! controller side (CLI inputs, hex dumps).

use crate::error::Error;

/// Parse an address: `0x`-prefixed hex (either case) or plain decimal.
///
/// Bare hex without the prefix is rejected here; only offsets get that
/// leniency.
pub fn parse_address(s: &str) -> Result<u64, Error> {
    lazy_static::lazy_static! {
        static ref RE: regex::Regex = regex::Regex::new(
            r"^\s*(?:0[xX]([0-9a-fA-F]+)|([0-9]+))\s*$",
        )
        .unwrap();
    }

    let caps = RE
        .captures(s)
        .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;
    let parsed = match (caps.get(1), caps.get(2)) {
        (Some(hex), _) => u64::from_str_radix(hex.as_str(), 16),
        (None, Some(dec)) => dec.as_str().parse(),
        (None, None) => return Err(Error::InvalidAddress(s.to_string())),
    };
    parsed.map_err(|_| Error::InvalidAddress(s.to_string()))
}

/// Parse a signed offset.
///
/// Accepts an optional leading `-` and a `0x` prefix for hex. For
/// compatibility with pointer-chain inputs, a bare string containing
/// hex letters is treated as hex even without the prefix.
pub fn parse_offset(s: &str) -> Result<i64, Error> {
    lazy_static::lazy_static! {
        static ref RE: regex::Regex = regex::Regex::new(
            r"^\s*(-)?(0[xX])?([0-9a-fA-F]+)\s*$",
        )
        .unwrap();
    }

    let caps = RE
        .captures(s)
        .ok_or_else(|| Error::InvalidOffset(s.to_string()))?;
    let neg = caps.get(1).is_some();
    let digits = match caps.get(3) {
        Some(d) => d.as_str(),
        None => return Err(Error::InvalidOffset(s.to_string())),
    };
    let radix = if caps.get(2).is_some() || digits.bytes().any(|b| b.is_ascii_alphabetic()) {
        16
    } else {
        10
    };

    let magnitude =
        u64::from_str_radix(digits, radix).map_err(|_| Error::InvalidOffset(s.to_string()))?;
    if neg {
        // i64::MIN's magnitude is one past i64::MAX.
        if magnitude > i64::MAX as u64 + 1 {
            return Err(Error::InvalidOffset(s.to_string()));
        }
        Ok((magnitude as i64).wrapping_neg())
    } else {
        i64::try_from(magnitude).map_err(|_| Error::InvalidOffset(s.to_string()))
    }
}

/// Uppercase hex, two characters per byte, no separators.
pub fn bytes_to_hex(data: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// Inverse of [`bytes_to_hex`]; whitespace is stripped, the remainder
/// must be an even number of hex digits (either case).
pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>, Error> {
    let cleaned: Vec<u8> = s
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if cleaned.len() % 2 != 0 || !cleaned.iter().all(u8::is_ascii_hexdigit) {
        return Err(Error::InvalidHex(s.to_string()));
    }

    let mut out = Vec::with_capacity(cleaned.len() / 2);
    for pair in cleaned.chunks_exact(2) {
        let digits =
            std::str::from_utf8(pair).map_err(|_| Error::InvalidHex(s.to_string()))?;
        let byte =
            u8::from_str_radix(digits, 16).map_err(|_| Error::InvalidHex(s.to_string()))?;
        out.push(byte);
    }
    Ok(out)
}
