//! Kubernetes-style resource quantities (`250m`, `1.5`, `512Mi`, `2G`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SpecError;

const BINARY_SUFFIXES: [(&str, f64); 6] = [
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

const DECIMAL_SUFFIXES: [(char, f64); 9] = [
    ('n', 1e-9),
    ('u', 1e-6),
    ('m', 1e-3),
    ('k', 1e3),
    ('M', 1e6),
    ('G', 1e9),
    ('T', 1e12),
    ('P', 1e15),
    ('E', 1e18),
];

/// A parsed quantity. Keeps the original text for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    raw: String,
    value: f64,
}

impl Quantity {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_negative(&self) -> bool {
        self.value < 0.0
    }
}

impl FromStr for Quantity {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let invalid = || SpecError::InvalidQuantity(s.to_string());
        if raw.is_empty() {
            return Err(invalid());
        }

        let (number, multiplier) = split_suffix(raw);
        if number.is_empty() || number.ends_with(['e', 'E']) {
            return Err(invalid());
        }
        let base: f64 = number.parse().map_err(|_| invalid())?;
        let value = base * multiplier;
        if !value.is_finite() {
            return Err(invalid());
        }

        Ok(Quantity {
            raw: raw.to_string(),
            value,
        })
    }
}

fn split_suffix(raw: &str) -> (&str, f64) {
    for (suffix, multiplier) in BINARY_SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return (number, multiplier);
        }
    }
    if let Some(last) = raw.chars().last() {
        for (suffix, multiplier) in DECIMAL_SUFFIXES {
            if last == suffix {
                return (&raw[..raw.len() - 1], multiplier);
            }
        }
    }
    (raw, 1.0)
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
