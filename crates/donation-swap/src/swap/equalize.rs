//! Equalization: what each side of a match should actually pay.
//!
//! The side pledging the smaller effective value pays their full amount;
//! the other side is scaled down until both charities receive the same
//! effective value. The service caches the result on the Match record so
//! later views are immune to rate drift.

use crate::swap::currency::CurrencyConverter;
use crate::swap::domain::{Country, Offer};
use crate::swap::scoring::effective_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EqualizedAmounts {
    /// What the later-created ("new") offer's donor actually pays.
    pub new_amount: i64,
    /// What the earlier-created ("old") offer's donor actually pays.
    pub old_amount: i64,
}

pub fn equalize(
    converter: &dyn CurrencyConverter,
    reference_currency: &str,
    new_side: (&Offer, &Country),
    old_side: (&Offer, &Country),
) -> EqualizedAmounts {
    let (new_offer, new_country) = new_side;
    let (old_offer, old_country) = old_side;

    let new_value = effective_value(converter, new_offer.amount, new_country, reference_currency);
    let old_value = effective_value(converter, old_offer.amount, old_country, reference_currency);

    if new_value > old_value {
        let scaled = old_offer.amount as f64 * old_country.benefit_multiplier()
            / new_country.benefit_multiplier();
        EqualizedAmounts {
            new_amount: converter.convert(scaled, &old_country.currency, &new_country.currency),
            old_amount: old_offer.amount,
        }
    } else {
        let scaled = new_offer.amount as f64 * new_country.benefit_multiplier()
            / old_country.benefit_multiplier();
        EqualizedAmounts {
            new_amount: new_offer.amount,
            old_amount: converter.convert(scaled, &new_country.currency, &old_country.currency),
        }
    }
}
