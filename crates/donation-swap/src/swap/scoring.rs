//! Value normalization and pairwise compatibility scoring.
//!
//! The scorer never mutates state, so it is safe to call repeatedly and
//! concurrently while ranking a candidate pool. A score of exactly zero
//! always means "do not propose this pair" and carries the reason why.

use std::sync::Arc;

use crate::swap::currency::CurrencyConverter;
use crate::swap::domain::{Country, Offer};
use crate::swap::repository::{MatchRepository, ReferenceRepository};
use crate::swap::service::SwapError;

pub const REASON_SAME_OFFER: &str = "same offer";
pub const REASON_SAME_CHARITY: &str = "same charity";
pub const REASON_SAME_COUNTRY: &str = "same country";
pub const REASON_SAME_EMAIL: &str = "same email address";
pub const REASON_AMOUNT_MISMATCH: &str = "amount mismatch";
pub const REASON_BOTH_ALREADY_BENEFIT: &str =
    "both would benefit from donating to their chosen charity anyway";
pub const REASON_NOBODY_BENEFITS: &str = "nobody will benefit";
pub const REASON_DECLINED: &str = "match declined";
pub const REASON_BOTH_BENEFIT: &str = "both benefit";
pub const REASON_ONE_BENEFITS: &str = "only one will benefit";

/// A pledged amount converted into `target` currency and scaled by the
/// donor country's matched-giving top-up: what the charity actually gets.
pub fn effective_value(
    converter: &dyn CurrencyConverter,
    amount: i64,
    country: &Country,
    target: &str,
) -> f64 {
    let converted = converter.convert(amount as f64, &country.currency, target);
    converted as f64 * country.benefit_multiplier()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreOutcome {
    /// In `[0, 1]`; zero means the pair must not be proposed.
    pub score: f64,
    pub reason: &'static str,
}

impl ScoreOutcome {
    fn excluded(reason: &'static str) -> Self {
        Self { score: 0.0, reason }
    }
}

pub struct CompatibilityScorer {
    reference: Arc<dyn ReferenceRepository>,
    matches: Arc<dyn MatchRepository>,
    converter: Arc<dyn CurrencyConverter>,
    reference_currency: String,
}

impl CompatibilityScorer {
    pub fn new(
        reference: Arc<dyn ReferenceRepository>,
        matches: Arc<dyn MatchRepository>,
        converter: Arc<dyn CurrencyConverter>,
        reference_currency: impl Into<String>,
    ) -> Self {
        Self {
            reference,
            matches,
            converter,
            reference_currency: reference_currency.into(),
        }
    }

    /// Score a pair of offers. Hard exclusions short-circuit in a fixed
    /// order; the surviving pairs get a similarity score weighted by how
    /// many of the two donors gain a new tax benefit from the swap.
    pub fn score(&self, a: &Offer, b: &Offer) -> Result<ScoreOutcome, SwapError> {
        if a.id == b.id {
            return Ok(ScoreOutcome::excluded(REASON_SAME_OFFER));
        }
        if a.charity_id == b.charity_id {
            return Ok(ScoreOutcome::excluded(REASON_SAME_CHARITY));
        }
        if a.country_id == b.country_id {
            return Ok(ScoreOutcome::excluded(REASON_SAME_COUNTRY));
        }
        if a.email.eq_ignore_ascii_case(&b.email) {
            return Ok(ScoreOutcome::excluded(REASON_SAME_EMAIL));
        }

        let country_a = self
            .reference
            .country(a.country_id)
            .ok_or(SwapError::CountryNotFound)?;
        let country_b = self
            .reference
            .country(b.country_id)
            .ok_or(SwapError::CountryNotFound)?;

        let a_in_currency_b =
            effective_value(self.converter.as_ref(), a.amount, &country_a, &country_b.currency);
        let b_in_currency_a =
            effective_value(self.converter.as_ref(), b.amount, &country_b, &country_a.currency);

        if a_in_currency_b < b.min_amount as f64 * country_b.benefit_multiplier()
            || b_in_currency_a < a.min_amount as f64 * country_a.benefit_multiplier()
        {
            return Ok(ScoreOutcome::excluded(REASON_AMOUNT_MISMATCH));
        }

        // A swap is pointless for a donor whose own pick is already
        // deductible at home, and worthless if the counterpart's pick
        // isn't deductible for them either.
        let a_would_have_benefit = self
            .reference
            .deduction_for(a.charity_id, a.country_id)
            .is_some();
        let b_would_have_benefit = self
            .reference
            .deduction_for(b.charity_id, b.country_id)
            .is_some();
        if a_would_have_benefit && b_would_have_benefit {
            return Ok(ScoreOutcome::excluded(REASON_BOTH_ALREADY_BENEFIT));
        }

        let a_will_benefit = self
            .reference
            .deduction_for(b.charity_id, a.country_id)
            .is_some();
        let b_will_benefit = self
            .reference
            .deduction_for(a.charity_id, b.country_id)
            .is_some();
        if !a_will_benefit && !b_will_benefit {
            return Ok(ScoreOutcome::excluded(REASON_NOBODY_BENEFITS));
        }

        if self.matches.is_declined(a.id, b.id)? {
            return Ok(ScoreOutcome::excluded(REASON_DECLINED));
        }

        // Equal effective values score 1, vastly different ones near 0.
        let value_a = effective_value(
            self.converter.as_ref(),
            a.amount,
            &country_a,
            &self.reference_currency,
        );
        let value_b = effective_value(
            self.converter.as_ref(),
            b.amount,
            &country_b,
            &self.reference_currency,
        );
        // Two zero-value offers are trivially equal; dividing by the
        // larger value would produce NaN here.
        let larger = value_a.max(value_b);
        let mut score = if larger == 0.0 {
            1.0
        } else {
            let spread = (value_a - value_b) / larger;
            1.0 - spread * spread
        };

        let (factor, reason) = if a_will_benefit && b_will_benefit {
            (1.0, REASON_BOTH_BENEFIT)
        } else {
            (0.5, REASON_ONE_BENEFITS)
        };
        score *= factor;
        score = (score * 10_000.0).round() / 10_000.0;

        Ok(ScoreOutcome { score, reason })
    }
}
