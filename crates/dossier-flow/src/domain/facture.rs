use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ids::{DossierId, FactureId};
use crate::workflow::UnknownValue;

/// Sequential invoice number, `FAC-YYYY-NNNN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactureNumber {
    pub year: i32,
    pub sequence: u32,
}

impl fmt::Display for FactureNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FAC-{}-{:04}", self.year, self.sequence)
    }
}

impl FromStr for FactureNumber {
    type Err = UnknownValue;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || UnknownValue(raw.to_string());
        let mut parts = raw.trim().splitn(3, '-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("FAC"), Some(year), Some(sequence)) => Ok(Self {
                year: year.parse().map_err(|_| invalid())?,
                sequence: sequence.parse().map_err(|_| invalid())?,
            }),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for FactureNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FactureNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactureStatus {
    Emise,
    Payee,
    Annulee,
}

impl FactureStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Emise => "emise",
            Self::Payee => "payee",
            Self::Annulee => "annulee",
        }
    }
}

impl FromStr for FactureStatus {
    type Err = UnknownValue;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "emise" => Ok(Self::Emise),
            "payee" => Ok(Self::Payee),
            "annulee" => Ok(Self::Annulee),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// Ten million euros, excluding VAT.
pub const MAX_AMOUNT_HT_CENTS: i64 = 1_000_000_000;
pub const MAX_VAT_RATE_BP: u32 = 10_000;
pub const MAX_PAYMENT_TERM_DAYS: u32 = 365;

/// Invoice issued for a dossier. Amounts are euro cents, VAT in basis points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facture {
    pub id: FactureId,
    pub dossier_id: DossierId,
    pub number: FactureNumber,
    pub amount_ht_cents: i64,
    pub vat_rate_bp: u32,
    pub due_date: NaiveDate,
    pub status: FactureStatus,
    pub issued_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Facture {
    pub fn vat_cents(&self) -> i64 {
        // Round half up on the cent; widened so no stored amount can overflow.
        let vat = (i128::from(self.amount_ht_cents) * i128::from(self.vat_rate_bp) + 5_000) / 10_000;
        i64::try_from(vat).unwrap_or(i64::MAX)
    }

    pub fn amount_ttc_cents(&self) -> i64 {
        self.amount_ht_cents.saturating_add(self.vat_cents())
    }

    /// Checks an amount and VAT rate before anything is numbered or stored.
    pub fn validate_amounts(amount_ht_cents: i64, vat_rate_bp: u32) -> Result<(), FactureError> {
        if amount_ht_cents <= 0 {
            return Err(FactureError::NonPositiveAmount);
        }
        if amount_ht_cents > MAX_AMOUNT_HT_CENTS {
            return Err(FactureError::AmountTooLarge(amount_ht_cents));
        }
        if vat_rate_bp > MAX_VAT_RATE_BP {
            return Err(FactureError::InvalidVatRate(vat_rate_bp));
        }
        Ok(())
    }

    pub fn mark_paid(&mut self, at: DateTime<Utc>) -> Result<(), FactureError> {
        if self.status != FactureStatus::Emise {
            return Err(FactureError::NotOutstanding(self.status));
        }
        self.status = FactureStatus::Payee;
        self.paid_at = Some(at);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), FactureError> {
        if self.status != FactureStatus::Emise {
            return Err(FactureError::NotOutstanding(self.status));
        }
        self.status = FactureStatus::Annulee;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FactureError {
    #[error("invoice amount must be positive")]
    NonPositiveAmount,
    #[error("invoice amount of {0} cents exceeds the allowed maximum")]
    AmountTooLarge(i64),
    #[error("payment term of {0} days is longer than a year")]
    PaymentTermTooLong(u32),
    #[error("VAT rate of {0} basis points is out of range")]
    InvalidVatRate(u32),
    #[error("invoice is {} and can no longer change", .0.as_str())]
    NotOutstanding(FactureStatus),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facture(amount: i64, vat: u32) -> Facture {
        Facture {
            id: FactureId::new(),
            dossier_id: DossierId::new(),
            number: FactureNumber {
                year: 2025,
                sequence: 7,
            },
            amount_ht_cents: amount,
            vat_rate_bp: vat,
            due_date: NaiveDate::from_ymd_opt(2025, 5, 31).expect("valid"),
            status: FactureStatus::Emise,
            issued_at: Utc::now(),
            paid_at: None,
        }
    }

    #[test]
    fn numbers_are_zero_padded_and_parse_back() {
        let number = FactureNumber {
            year: 2025,
            sequence: 1,
        };
        assert_eq!(number.to_string(), "FAC-2025-0001");

        let number: FactureNumber = "FAC-2025-0042".parse().expect("parses");
        assert_eq!(
            number,
            FactureNumber {
                year: 2025,
                sequence: 42
            }
        );
        assert!("INV-2025-0042".parse::<FactureNumber>().is_err());
    }

    #[test]
    fn vat_is_rounded_to_the_cent() {
        let invoice = facture(120_005, 2_000);
        assert_eq!(invoice.vat_cents(), 24_001);
        assert_eq!(invoice.amount_ttc_cents(), 144_006);
    }

    #[test]
    fn amounts_are_bounded_before_any_arithmetic() {
        assert!(Facture::validate_amounts(MAX_AMOUNT_HT_CENTS, MAX_VAT_RATE_BP).is_ok());
        assert_eq!(
            Facture::validate_amounts(MAX_AMOUNT_HT_CENTS + 1, 2_000),
            Err(FactureError::AmountTooLarge(MAX_AMOUNT_HT_CENTS + 1))
        );
        assert_eq!(
            Facture::validate_amounts(-5, 2_000),
            Err(FactureError::NonPositiveAmount)
        );

        let huge = facture(90_000_000_000_000_000, 2_000);
        assert_eq!(huge.vat_cents(), 18_000_000_000_000_000);
        assert_eq!(huge.amount_ttc_cents(), 108_000_000_000_000_000);
    }

    #[test]
    fn settled_invoices_are_frozen() {
        let mut invoice = facture(150_000, 0);
        invoice.mark_paid(Utc::now()).expect("outstanding invoice");
        assert_eq!(
            invoice.cancel(),
            Err(FactureError::NotOutstanding(FactureStatus::Payee))
        );
    }
}
