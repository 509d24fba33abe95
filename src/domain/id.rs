use crate::error::PaymentError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 128-bit ledger identifier for accounts and transfers.
///
/// Zero and `u128::MAX` are reserved by the ledger, so they never parse from
/// user input. Rendered as lowercase hex at the edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Id(u128);

impl Id {
    pub const ZERO: Self = Self(0);

    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    /// Mints a fresh, time-ordered identifier.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().0)
    }

    pub fn value(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    fn from_hex(s: &str) -> Result<Self, PaymentError> {
        let digits = s.trim();
        let digits = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits);
        if digits.is_empty() || digits.len() > 32 {
            return Err(PaymentError::ValidationError(format!(
                "Identifier must be 1 to 32 hex digits, got {:?}",
                s
            )));
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PaymentError::ValidationError(format!(
                "Identifier is not valid hex: {:?}",
                s
            )));
        }
        u128::from_str_radix(digits, 16).map(Self).map_err(|_| {
            PaymentError::ValidationError(format!("Identifier is not valid hex: {:?}", s))
        })
    }
}

impl FromStr for Id {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Self::from_hex(s)?;
        if id.0 == 0 || id.0 == u128::MAX {
            return Err(PaymentError::ValidationError(format!(
                "Identifier {:?} is reserved",
                s
            )));
        }
        Ok(id)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Id::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
