use std::borrow::Cow;
use std::fmt;

use crate::features::Feature;

/// Why a row was excluded from the cleaned set.
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    FieldCount { expected: usize, found: usize },
    InvalidPlayCount,
    InvalidYear,
    InvalidFeature(Feature),
    Malformed(String),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldCount { expected, found } => {
                write!(f, "expected {} fields, found {}", expected, found)
            }
            Self::InvalidPlayCount => f.write_str("missing or non-numeric streams"),
            Self::InvalidYear => f.write_str("missing or non-numeric released_year"),
            Self::InvalidFeature(feat) => write!(f, "missing or non-numeric {}", feat),
            Self::Malformed(msg) => write!(f, "malformed row: {}", msg),
        }
    }
}

impl DropReason {
    /// Short grouping key for summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FieldCount { .. } => "field count",
            Self::InvalidPlayCount => "streams",
            Self::InvalidYear => "released_year",
            Self::InvalidFeature(_) => "feature",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// Decode a raw field as UTF-8, falling back to Latin-1 byte-per-char.
pub fn decode_field(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| b as char).collect()),
    }
}

/// Parse an integral number that may be written with a zero fraction ("42.0").
fn parse_integral(raw: &str) -> Option<f64> {
    let v: f64 = raw.trim().parse().ok()?;
    if v.is_finite() && v.fract() == 0.0 {
        Some(v)
    } else {
        None
    }
}

/// Play count: non-negative integer. Anything else counts as missing.
pub fn parse_play_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n);
    }
    let v = parse_integral(raw)?;
    if v >= 0.0 && v <= u64::MAX as f64 {
        Some(v as u64)
    } else {
        None
    }
}

pub fn parse_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if let Ok(y) = raw.parse::<i32>() {
        return Some(y);
    }
    let v = parse_integral(raw)?;
    if v >= i32::MIN as f64 && v <= i32::MAX as f64 {
        Some(v as i32)
    } else {
        None
    }
}

/// Feature value: any finite real.
pub fn parse_feature(raw: &str) -> Option<f64> {
    let v: f64 = raw.trim().parse().ok()?;
    v.is_finite().then_some(v)
}
