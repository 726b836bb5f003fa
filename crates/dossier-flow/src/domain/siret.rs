use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// SIREN of La Poste, whose establishments do not follow the Luhn rule.
const LA_POSTE_SIREN: &str = "356000000";

/// 14-digit French establishment identifier (SIREN + NIC).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Siret(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SiretError {
    #[error("SIRET must contain exactly 14 digits, got {0}")]
    Length(usize),
    #[error("SIRET may only contain digits")]
    NonDigit,
    #[error("SIRET checksum is invalid")]
    Checksum,
}

impl Siret {
    /// Parses a SIRET, ignoring the spaces commonly used to group digits.
    pub fn parse(raw: &str) -> Result<Self, SiretError> {
        let digits: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.chars().any(|c| !c.is_ascii_digit()) {
            return Err(SiretError::NonDigit);
        }
        if digits.len() != 14 {
            return Err(SiretError::Length(digits.len()));
        }

        let valid = if digits.starts_with(LA_POSTE_SIREN) {
            digit_sum(&digits) % 5 == 0
        } else {
            luhn_valid(&digits)
        };
        if !valid {
            return Err(SiretError::Checksum);
        }

        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn siren(&self) -> &str {
        &self.0[..9]
    }
}

fn digit_sum(digits: &str) -> u32 {
    digits.bytes().map(|b| u32::from(b - b'0')).sum()
}

fn luhn_valid(digits: &str) -> bool {
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(index, byte)| {
            let digit = u32::from(byte - b'0');
            if index % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}

impl fmt::Display for Siret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Siret {
    type Err = SiretError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl Serialize for Siret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Siret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_luhn_valid_siret_with_spaces() {
        let siret = Siret::parse("732 829 320 00074").expect("valid siret");
        assert_eq!(siret.as_str(), "73282932000074");
        assert_eq!(siret.siren(), "732829320");
    }

    #[test]
    fn rejects_bad_checksum() {
        assert_eq!(Siret::parse("73282932000075"), Err(SiretError::Checksum));
    }

    #[test]
    fn rejects_wrong_length_and_letters() {
        assert_eq!(Siret::parse("7328293200007"), Err(SiretError::Length(13)));
        assert_eq!(Siret::parse("7328293200007A"), Err(SiretError::NonDigit));
    }

    #[test]
    fn la_poste_establishments_use_digit_sum_rule() {
        // 3+5+6+0+0+0+0+0+0+0+0+0+1+0 = 15
        assert!(Siret::parse("35600000000010").is_ok());
        assert_eq!(Siret::parse("35600000000011"), Err(SiretError::Checksum));
    }
}
