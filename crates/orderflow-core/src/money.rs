//! Monetary amounts in integer minor units.
//!
//! Order amounts arrive in several shapes: a bare JSON number, a
//! pre-formatted display string such as `"PKR 1,500.00"`, or the canonical
//! `{ "minor_units": .., "currency": .. }` object. All of them decode into
//! `Money`; only the canonical object form is ever encoded. Conversion goes
//! through `rust_decimal` so no floating-point rounding is involved.

use crate::error::{CoreError, CoreResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currency assumed when the wire value carries none.
pub const DEFAULT_CURRENCY: &str = "PKR";

/// Decimal places between major and minor units.
pub const MINOR_UNIT_EXPONENT: u32 = 2;

/// Amount in minor units (e.g. paisa, cents) with an ISO-4217 style code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MoneyRepr")]
pub struct Money {
    pub minor_units: i64,
    pub currency: String,
}

/// Accepted wire shapes for an amount.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MoneyRepr {
    Canonical { minor_units: i64, currency: String },
    Number(serde_json::Number),
    Text(String),
}

impl TryFrom<MoneyRepr> for Money {
    type Error = CoreError;

    fn try_from(repr: MoneyRepr) -> Result<Self, Self::Error> {
        match repr {
            MoneyRepr::Canonical {
                minor_units,
                currency,
            } => Ok(Self::new(minor_units, currency)),
            MoneyRepr::Number(n) => {
                let amount = Decimal::from_str(&n.to_string())?;
                Self::from_major(amount, DEFAULT_CURRENCY)
            }
            MoneyRepr::Text(s) => Self::parse_display(&s),
        }
    }
}

impl Money {
    pub fn new(minor_units: i64, currency: impl Into<String>) -> Self {
        Self {
            minor_units,
            currency: currency.into().to_uppercase(),
        }
    }

    /// Build from a major-unit decimal (e.g. `1500.00`).
    ///
    /// Fails if the amount has more precision than the minor unit allows
    /// or does not fit in `i64`.
    pub fn from_major(amount: Decimal, currency: impl Into<String>) -> CoreResult<Self> {
        let factor = Decimal::from(10_i64.pow(MINOR_UNIT_EXPONENT));
        let scaled = amount
            .checked_mul(factor)
            .ok_or_else(|| CoreError::InvalidAmount(format!("{amount} overflows")))?;

        if !scaled.fract().is_zero() {
            return Err(CoreError::InvalidAmount(format!(
                "{amount} has more than {MINOR_UNIT_EXPONENT} decimal places"
            )));
        }

        let minor_units = scaled
            .to_i64()
            .ok_or_else(|| CoreError::InvalidAmount(format!("{amount} out of range")))?;

        Ok(Self::new(minor_units, currency))
    }

    /// Parse a display string such as `"PKR 1,500.00"`, `"$28.90"` or `"800"`.
    pub fn parse_display(s: &str) -> CoreResult<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
            .ok_or_else(|| CoreError::InvalidAmount(format!("no number in {s:?}")))?;
        let (prefix, number) = s.split_at(split);

        let currency = match prefix.trim() {
            "" => DEFAULT_CURRENCY.to_string(),
            "$" => "USD".to_string(),
            code if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) => {
                code.to_uppercase()
            }
            other => {
                return Err(CoreError::InvalidAmount(format!(
                    "unknown currency prefix {other:?}"
                )))
            }
        };

        let cleaned: String = number
            .chars()
            .filter(|c| *c != ',' && !c.is_whitespace())
            .collect();
        let amount = Decimal::from_str(&cleaned)?;

        Self::from_major(amount, currency)
    }

    /// Amount in major units with exactly `MINOR_UNIT_EXPONENT` decimals.
    pub fn to_major(&self) -> Decimal {
        Decimal::new(self.minor_units, MINOR_UNIT_EXPONENT)
    }

    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency, self.to_major())
    }
}
