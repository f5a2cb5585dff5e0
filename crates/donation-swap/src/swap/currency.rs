//! Currency conversion seam.
//!
//! Rate retrieval and caching belong to the hosting deployment; the engine
//! only needs the `convert` contract. [`RateTable`] is the in-process
//! implementation backing tests and the demo service.

use std::collections::HashMap;

/// Converts an amount between currencies at the service's current rates.
///
/// Implementations return integer precision (whole currency units); the
/// fractional input accommodates amounts already scaled by a benefit
/// multiplier.
pub trait CurrencyConverter: Send + Sync {
    fn convert(&self, amount: f64, from: &str, to: &str) -> i64;
}

/// A fixed table of rates against a base currency.
///
/// Unknown currencies convert at 1:1 with the base, matching the lenient
/// behavior of the live rate feed this stands in for.
#[derive(Debug, Clone)]
pub struct RateTable {
    base: String,
    rates: HashMap<String, f64>,
}

impl RateTable {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            rates: HashMap::new(),
        }
    }

    /// Register `iso` at `rate` units per one unit of the base currency.
    pub fn with_rate(mut self, iso: impl Into<String>, rate: f64) -> Self {
        self.rates.insert(iso.into(), rate);
        self
    }

    pub fn set_rate(&mut self, iso: impl Into<String>, rate: f64) {
        self.rates.insert(iso.into(), rate);
    }
}

impl CurrencyConverter for RateTable {
    fn convert(&self, amount: f64, from: &str, to: &str) -> i64 {
        let mut value = amount;
        if from != self.base {
            value /= self.rates.get(from).copied().unwrap_or(1.0);
        }
        if to != self.base {
            value *= self.rates.get(to).copied().unwrap_or(1.0);
        }
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RateTable {
        RateTable::new("EUR")
            .with_rate("GBP", 0.5)
            .with_rate("NZD", 2.0)
    }

    #[test]
    fn identity_conversion_is_exact() {
        assert_eq!(table().convert(42.0, "GBP", "GBP"), 42);
    }

    #[test]
    fn converts_through_the_base_currency() {
        // 10 GBP -> 20 EUR -> 40 NZD
        assert_eq!(table().convert(10.0, "GBP", "NZD"), 40);
    }

    #[test]
    fn truncates_towards_zero() {
        // 1 NZD -> 0.5 EUR -> 0.25 GBP
        assert_eq!(table().convert(1.0, "NZD", "GBP"), 0);
    }

    #[test]
    fn unknown_currency_falls_back_to_base_parity() {
        assert_eq!(table().convert(7.0, "XXX", "EUR"), 7);
    }
}
