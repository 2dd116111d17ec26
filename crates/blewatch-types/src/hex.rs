//! Hex codec for serialized advertisement payloads.
//!
//! Serialized payload bytes are uppercase pairs separated by single spaces
//! (`"0A FF 10"`). Manufacturer identifiers serialize as `0x` followed by
//! four uppercase hex digits (`"0x4000"`).

use core::fmt::Write;

use crate::error::{ParseError, ParseResult};

/// Encode bytes as space-separated uppercase hex pairs.
///
/// # Examples
///
/// ```
/// use blewatch_types::hex;
///
/// assert_eq!(hex::encode(&[0x0A, 0xFF, 0x10]), "0A FF 10");
/// assert_eq!(hex::encode(&[]), "");
/// ```
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        // Writing to a String cannot fail.
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

/// Decode a whitespace-separated hex string into bytes.
///
/// Tokens are case-insensitive and must be exactly two hex digits. An empty
/// (or all-whitespace) string decodes to an empty buffer.
///
/// # Errors
///
/// Returns [`ParseError::InvalidHex`] for the first token that is not a hex byte.
///
/// # Examples
///
/// ```
/// use blewatch_types::hex;
///
/// assert_eq!(hex::decode("0A ff 10").unwrap(), vec![0x0A, 0xFF, 0x10]);
/// assert!(hex::decode("0A GG").is_err());
/// ```
pub fn decode(hex: &str) -> ParseResult<Vec<u8>> {
    hex.split_whitespace()
        .map(|token| {
            if token.len() != 2 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseError::InvalidHex {
                    token: token.to_string(),
                });
            }
            u8::from_str_radix(token, 16).map_err(|_| ParseError::InvalidHex {
                token: token.to_string(),
            })
        })
        .collect()
}

/// Format a manufacturer identifier as a serialized map key.
///
/// ```
/// use blewatch_types::hex;
///
/// assert_eq!(hex::format_manufacturer_key(0x4000), "0x4000");
/// assert_eq!(hex::format_manufacturer_key(0x004c), "0x004C");
/// ```
#[must_use]
pub fn format_manufacturer_key(id: u16) -> String {
    format!("0x{:04X}", id)
}

/// Parse a serialized manufacturer key back into its identifier.
///
/// Accepts the canonical `0xNNNN` form (either prefix case) and plain decimal.
///
/// # Errors
///
/// Returns [`ParseError::InvalidManufacturerKey`] if the key is neither form.
pub fn parse_manufacturer_key(key: &str) -> ParseResult<u16> {
    let trimmed = key.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit()) => {
            u16::from_str_radix(digits, 16).ok()
        }
        Some(_) => None,
        None if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) => {
            trimmed.parse::<u16>().ok()
        }
        None => None,
    };
    parsed.ok_or_else(|| ParseError::InvalidManufacturerKey(key.to_string()))
}
