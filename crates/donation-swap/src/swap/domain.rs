//! Domain model for offers, matches, and the reference data they point at.
//!
//! The engine treats these as read-mostly snapshots loaded per operation;
//! the repositories own the canonical state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OfferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CountryId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharityId(pub u32);

/// A country a donor can give from, with its matched-giving scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: CountryId,
    pub name: String,
    /// ISO 3166 alpha-2 code.
    pub iso: String,
    /// ISO 4217 code of the country's currency.
    pub currency: String,
    pub min_donation_amount: i64,
    pub min_donation_currency: String,
    /// Gift-aid style top-up in percent: the government adds this share of a
    /// donation on top of the donor's own payment. Zero for most countries.
    pub benefit_rate: f64,
}

impl Country {
    /// Factor by which a charity's take exceeds the donor's payment.
    pub fn benefit_multiplier(&self) -> f64 {
        1.0 + self.benefit_rate / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charity {
    pub id: CharityId,
    pub name: String,
}

/// One row of the deductibility table: this charity is tax-deductible in this
/// country, with optional payment instructions quoted in the deal email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxDeduction {
    pub charity_id: CharityId,
    pub country_id: CountryId,
    pub instructions: Option<String>,
}

/// A donor's pledge to give `amount` to `charity_id`, accepting a swap down
/// to `min_amount`. The secret is delivered only by email and doubles as
/// proof of ownership; see [`crate::swap::secret`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub secret: String,
    pub name: String,
    pub email: String,
    pub country_id: CountryId,
    pub amount: i64,
    pub min_amount: i64,
    pub charity_id: CharityId,
    pub created_ts: DateTime<Utc>,
    pub expires_ts: DateTime<Utc>,
    pub confirmed: bool,
}

/// Which side of a match an offer sits on. The earlier-created offer is the
/// "old" side, the later one the "new" side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchSide {
    New,
    Old,
}

impl MatchSide {
    pub fn other(self) -> Self {
        match self {
            MatchSide::New => MatchSide::Old,
            MatchSide::Old => MatchSide::New,
        }
    }
}

/// A proposed pairing of two confirmed offers awaiting mutual consent.
///
/// Consent flags start unset and only ever transition to `Some(true)`;
/// a decline deletes the whole record instead of setting `false`.
/// `new_actual_amount`/`old_actual_amount` cache the equalized figures so
/// both parties keep seeing the same numbers if exchange rates move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub secret: String,
    pub new_offer_id: OfferId,
    pub old_offer_id: OfferId,
    pub new_agrees: Option<bool>,
    pub old_agrees: Option<bool>,
    pub created_ts: DateTime<Utc>,
    pub feedback_ts: Option<DateTime<Utc>>,
    pub new_actual_amount: Option<i64>,
    pub old_actual_amount: Option<i64>,
}

impl Match {
    pub fn fully_approved(&self) -> bool {
        self.new_agrees == Some(true) && self.old_agrees == Some(true)
    }

    pub fn side_of(&self, offer: OfferId) -> Option<MatchSide> {
        if offer == self.new_offer_id {
            Some(MatchSide::New)
        } else if offer == self.old_offer_id {
            Some(MatchSide::Old)
        } else {
            None
        }
    }

    pub fn agrees(&self, side: MatchSide) -> Option<bool> {
        match side {
            MatchSide::New => self.new_agrees,
            MatchSide::Old => self.old_agrees,
        }
    }

    pub fn offer_on(&self, side: MatchSide) -> OfferId {
        match side {
            MatchSide::New => self.new_offer_id,
            MatchSide::Old => self.old_offer_id,
        }
    }

    pub fn references(&self, offer: OfferId) -> bool {
        self.side_of(offer).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_match() -> Match {
        Match {
            id: MatchId(7),
            secret: "m".repeat(24),
            new_offer_id: OfferId(2),
            old_offer_id: OfferId(1),
            new_agrees: None,
            old_agrees: None,
            created_ts: Utc::now(),
            feedback_ts: None,
            new_actual_amount: None,
            old_actual_amount: None,
        }
    }

    #[test]
    fn benefit_multiplier_scales_from_percent() {
        let mut country = Country {
            id: CountryId(1),
            name: "United Kingdom".to_string(),
            iso: "GB".to_string(),
            currency: "GBP".to_string(),
            min_donation_amount: 10,
            min_donation_currency: "GBP".to_string(),
            benefit_rate: 25.0,
        };
        assert!((country.benefit_multiplier() - 1.25).abs() < f64::EPSILON);
        country.benefit_rate = 0.0;
        assert!((country.benefit_multiplier() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn side_resolution_covers_both_offers() {
        let m = sample_match();
        assert_eq!(m.side_of(OfferId(2)), Some(MatchSide::New));
        assert_eq!(m.side_of(OfferId(1)), Some(MatchSide::Old));
        assert_eq!(m.side_of(OfferId(9)), None);
        assert_eq!(m.offer_on(MatchSide::New), OfferId(2));
        assert_eq!(m.offer_on(MatchSide::Old), OfferId(1));
        assert_eq!(MatchSide::New.other(), MatchSide::Old);
    }

    #[test]
    fn full_approval_requires_both_sides() {
        let mut m = sample_match();
        assert!(!m.fully_approved());
        m.new_agrees = Some(true);
        assert!(!m.fully_approved());
        m.old_agrees = Some(true);
        assert!(m.fully_approved());
    }
}
