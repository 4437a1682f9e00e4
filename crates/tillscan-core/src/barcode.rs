//! In-store barcode codec.
//!
//! Identifiers are 13 decimal digits laid out as `200` + a six digit
//! subject key + a three digit randomizer + one check digit. The check
//! digit uses the EAN-13 weighting (1 for even positions, 3 for odd,
//! counted from the left), so any off-the-shelf retail scanner reads
//! these codes without reconfiguration.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Digit prefix marking a code as store-internal rather than a GTIN.
pub const PREFIX: &str = "200";

/// Total identifier length, including the check digit.
pub const CODE_LEN: usize = 13;

/// Largest subject key that fits the six digit field.
pub const SUBJECT_KEY_MAX: u32 = 999_999;

const SUBJECT_OFFSET: usize = PREFIX.len();
const SUBJECT_LEN: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BarcodeError {
    #[error("subject key {0} does not fit in the six digit field")]
    KeyOutOfRange(u32),
    #[error("not a valid 13 digit identifier: {0:?}")]
    Malformed(String),
}

/// A 13 digit identifier whose structure and check digit have been verified.
///
/// Serializes as the bare digit string; deserialization runs the same
/// checks as [`Barcode::parse`], so an invalid code never enters through
/// serde either.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct Barcode(String);

impl Barcode {
    /// Validates `code` and wraps it. Rejects anything that `validate`
    /// rejects, including a correct layout with a wrong check digit.
    pub fn parse(code: &str) -> Result<Self, BarcodeError> {
        if validate(code) {
            Ok(Self(code.to_string()))
        } else {
            Err(BarcodeError::Malformed(code.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The subject key embedded in digits 3 through 8.
    pub fn subject_key(&self) -> u32 {
        // Construction verified the layout, so the field is six ASCII digits.
        self.0[SUBJECT_OFFSET..SUBJECT_OFFSET + SUBJECT_LEN]
            .parse()
            .unwrap_or_default()
    }
}

impl fmt::Display for Barcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Barcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Barcode({})", self.0)
    }
}

impl AsRef<str> for Barcode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Barcode {
    type Error = BarcodeError;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        Self::parse(&code)
    }
}

/// Builds a fresh identifier for `subject_key` with a random three digit
/// randomizer, so repeated calls for the same key yield distinct codes.
pub fn generate(subject_key: u32) -> Result<Barcode, BarcodeError> {
    if subject_key > SUBJECT_KEY_MAX {
        return Err(BarcodeError::KeyOutOfRange(subject_key));
    }
    let randomizer: u16 = rand::rng().random_range(0..=999);
    let body = format!("{PREFIX}{subject_key:06}{randomizer:03}");
    let check = check_digit(&body);
    Ok(Barcode(format!("{body}{check}")))
}

/// True when `code` is exactly 13 ASCII digits and its final digit matches
/// the recomputed checksum of the first twelve.
pub fn validate(code: &str) -> bool {
    let bytes = code.as_bytes();
    if bytes.len() != CODE_LEN || !bytes.iter().all(u8::is_ascii_digit) {
        return false;
    }
    check_digit(&code[..CODE_LEN - 1]) == u32::from(bytes[CODE_LEN - 1] - b'0')
}

/// Recovers the subject key from digits 3 through 8.
///
/// Only the digit layout is checked here; callers that also need the check
/// digit verified should go through [`Barcode::parse`] first.
pub fn extract_subject_key(code: &str) -> Result<u32, BarcodeError> {
    let bytes = code.as_bytes();
    if bytes.len() != CODE_LEN || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(BarcodeError::Malformed(code.to_string()));
    }
    code[SUBJECT_OFFSET..SUBJECT_OFFSET + SUBJECT_LEN]
        .parse()
        .map_err(|_| BarcodeError::Malformed(code.to_string()))
}

fn check_digit(payload: &str) -> u32 {
    let sum: u32 = payload
        .bytes()
        .enumerate()
        .map(|(idx, digit)| {
            let value = u32::from(digit - b'0');
            if idx % 2 == 0 { value } else { value * 3 }
        })
        .sum();
    (10 - sum % 10) % 10
}
