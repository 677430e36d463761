//! Kenyan mobile phone number type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`PhoneNumber`].
#[derive(thiserror::Error, Debug, Clone)]
pub enum PhoneNumberError {
    /// The input string is empty.
    #[error("phone number cannot be empty")]
    Empty,
    /// The input contains a non-digit character (after stripping separators).
    #[error("phone number contains invalid character '{0}'")]
    InvalidCharacter(char),
    /// The input does not match any accepted Kenyan mobile format.
    #[error("phone number must be a Kenyan mobile number (07.., 01.., 2547.., 2541.. or +254..)")]
    InvalidFormat,
}

/// A Kenyan mobile phone number in canonical `254XXXXXXXXX` form.
///
/// The payment gateway requires the country-code form without a leading
/// plus, so every accepted input is normalized to it at parse time.
///
/// ## Accepted inputs
///
/// - Local: `0712345678`, `0112345678`
/// - Country code: `254712345678`, `254112345678`
/// - Prefixed: `+254712345678`
///
/// Spaces and dashes between digits are ignored. Anything else is rejected.
///
/// ## Examples
///
/// ```
/// use duka_core::PhoneNumber;
///
/// let phone = PhoneNumber::parse("0712 345 678").unwrap();
/// assert_eq!(phone.as_str(), "254712345678");
///
/// assert!(PhoneNumber::parse("12345").is_err());
/// assert!(PhoneNumber::parse("0812345678").is_err()); // not a mobile prefix
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Length of the canonical form (`254` + 9 digits).
    pub const CANONICAL_LENGTH: usize = 12;

    /// Parse a `PhoneNumber` from a string, normalizing to `254XXXXXXXXX`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input:
    /// - Is empty
    /// - Contains characters other than digits, separators, and a leading `+`
    /// - Does not match an accepted Kenyan mobile format
    pub fn parse(s: &str) -> Result<Self, PhoneNumberError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(PhoneNumberError::Empty);
        }

        let rest = trimmed.strip_prefix('+').unwrap_or(trimmed);

        let mut digits = String::with_capacity(Self::CANONICAL_LENGTH);
        for c in rest.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
            } else if c == ' ' || c == '-' {
                // separator, ignore
            } else {
                return Err(PhoneNumberError::InvalidCharacter(c));
            }
        }

        // Normalize to the 9-digit subscriber part, then prepend 254.
        let subscriber = if let Some(rest) = digits.strip_prefix("254") {
            rest
        } else if let Some(rest) = digits.strip_prefix('0') {
            rest
        } else {
            return Err(PhoneNumberError::InvalidFormat);
        };

        if subscriber.len() != 9 || !(subscriber.starts_with('7') || subscriber.starts_with('1')) {
            return Err(PhoneNumberError::InvalidFormat);
        }

        Ok(Self(format!("254{subscriber}")))
    }

    /// Returns the canonical phone number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `PhoneNumber` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Returns the local display form (`07..`/`01..`).
    #[must_use]
    pub fn local_format(&self) -> String {
        self.0.strip_prefix("254").map_or_else(
            || self.0.clone(),
            |subscriber| format!("0{subscriber}"),
        )
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PhoneNumber {
    type Err = PhoneNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for PhoneNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// SQLx support (with sqlite feature)
#[cfg(feature = "sqlite")]
impl sqlx::Type<sqlx::Sqlite> for PhoneNumber {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

#[cfg(feature = "sqlite")]
impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for PhoneNumber {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        // Database values are assumed canonical
        Ok(Self(s))
    }
}

#[cfg(feature = "sqlite")]
impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for PhoneNumber {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<'q, sqlx::Sqlite>>::encode(self.0.clone(), buf)
    }
}
