//! Resource quantities and canonical units.
//!
//! A [`Quantity`] is a decimal number with an optional unit suffix, as
//! written in object specs (`"500m"`, `"6"`, `"1Mi"`). Parsing happens
//! eagerly at the deserialisation edge so the rest of the system works with
//! plain integers: millicores for CPU, whole units (bytes, counts) for
//! everything else.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Name of a resource, e.g. `cpu`, `memory`, `example.com/gpu`.
pub type ResourceName = String;

/// The CPU resource, canonicalised to millicores.
pub const RESOURCE_CPU: &str = "cpu";

/// The memory resource, canonicalised to bytes.
pub const RESOURCE_MEMORY: &str = "memory";

/// Errors from parsing a quantity string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    /// The numeric part is missing or malformed.
    #[error("invalid quantity number: {0:?}")]
    InvalidNumber(String),

    /// The unit suffix is not recognised.
    #[error("unknown quantity suffix: {0:?}")]
    UnknownSuffix(String),

    /// The value does not fit in 64 bits of milli-units.
    #[error("quantity overflows: {0:?}")]
    Overflow(String),
}

/// A resource quantity.
///
/// Stored internally in milli-units (the parsed value times 1000) so that
/// fractional CPU requests keep exact integer arithmetic. The original
/// string representation is preserved for display and serialisation.
#[derive(Debug, Clone)]
pub struct Quantity {
    milli: i64,
    repr: String,
}

impl Quantity {
    /// Parse a quantity from its spec representation.
    pub fn parse(s: &str) -> Result<Self, QuantityError> {
        s.parse()
    }

    /// The value in milli-units.
    #[must_use]
    pub const fn milli(&self) -> i64 {
        self.milli
    }

    /// Canonical integer value for the given resource: millicores for
    /// `cpu`, whole units for everything else.
    #[must_use]
    pub fn canonical(&self, resource: &str) -> i64 {
        if resource == RESOURCE_CPU {
            self.milli
        } else {
            self.milli / 1000
        }
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.milli == other.milli
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.milli.cmp(&other.milli)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr)
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(trimmed.len());
        let (number, suffix) = trimmed.split_at(split);

        let number_milli = parse_number_milli(number)
            .ok_or_else(|| QuantityError::InvalidNumber(trimmed.to_owned()))?;

        let milli = match suffix {
            // Milli-units directly; fractional millis are not representable.
            "m" => {
                if number_milli % 1000 != 0 {
                    return Err(QuantityError::InvalidNumber(trimmed.to_owned()));
                }
                number_milli / 1000
            }
            "" => number_milli,
            _ => {
                let multiplier = suffix_multiplier(suffix)
                    .ok_or_else(|| QuantityError::UnknownSuffix(suffix.to_owned()))?;
                number_milli
                    .checked_mul(multiplier)
                    .ok_or_else(|| QuantityError::Overflow(trimmed.to_owned()))?
            }
        };

        Ok(Self {
            milli,
            repr: trimmed.to_owned(),
        })
    }
}

/// Parses the numeric part into milli-units (value times 1000), keeping at
/// most three fractional digits.
fn parse_number_milli(number: &str) -> Option<i64> {
    if number.is_empty() {
        return None;
    }
    let (whole, fraction) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number, ""),
    };
    if fraction.len() > 3 || (whole.is_empty() && fraction.is_empty()) {
        return None;
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let fraction_milli: i64 = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{fraction:0<3}");
        padded.parse().ok()?
    };
    whole.checked_mul(1000)?.checked_add(fraction_milli)
}

fn suffix_multiplier(suffix: &str) -> Option<i64> {
    Some(match suffix {
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        _ => return None,
    })
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.repr)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
