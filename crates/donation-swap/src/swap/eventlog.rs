//! Append-only audit log of domain events.
//!
//! Every state transition is recorded with a small integer type code and a
//! JSON snapshot of the fields that mattered at the time, so the log stays
//! meaningful after the offers and matches themselves are deleted.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use crate::swap::domain::{Charity, Country, Match, Offer};
use crate::swap::repository::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    OfferCreated,
    OfferConfirmed,
    OfferDeleted,
    OfferExpired,
    OfferUnconfirmed,
    MatchGenerated,
    MatchApproved,
    MatchDeclined,
    MatchFeedback,
    ContactMessage,
}

impl EventKind {
    pub fn code(self) -> u8 {
        match self {
            EventKind::OfferCreated => 1,
            EventKind::OfferConfirmed => 2,
            EventKind::OfferDeleted => 3,
            EventKind::OfferExpired => 4,
            EventKind::OfferUnconfirmed => 5,
            EventKind::MatchGenerated => 21,
            EventKind::MatchApproved => 22,
            EventKind::MatchDeclined => 23,
            EventKind::MatchFeedback => 24,
            EventKind::ContactMessage => 41,
        }
    }
}

pub trait EventLog: Send + Sync {
    fn append(&self, kind: EventKind, details: Value) -> Result<(), StoreError>;
}

/// JSON snapshot of an offer, with an optional key prefix so two offers can
/// share one object in match events.
pub fn offer_details(offer: &Offer, country: &Country, charity: &Charity, prefix: &str) -> Value {
    let mut details = serde_json::Map::new();
    details.insert(format!("{prefix}id"), json!(offer.id.0));
    details.insert(format!("{prefix}name"), json!(offer.name));
    details.insert(format!("{prefix}email"), json!(offer.email));
    details.insert(format!("{prefix}country"), json!(country.name));
    details.insert(format!("{prefix}amount"), json!(offer.amount));
    details.insert(format!("{prefix}min_amount"), json!(offer.min_amount));
    details.insert(format!("{prefix}currency"), json!(country.currency));
    details.insert(format!("{prefix}charity"), json!(charity.name));
    details.insert(
        format!("{prefix}expires_ts"),
        json!(offer.expires_ts.to_rfc3339()),
    );
    Value::Object(details)
}

pub fn match_details(
    match_: &Match,
    new_side: (&Offer, &Country, &Charity),
    old_side: (&Offer, &Country, &Charity),
) -> Value {
    let mut details = json!({ "match_id": match_.id.0 });
    merge(&mut details, offer_details(new_side.0, new_side.1, new_side.2, "new_offer_"));
    merge(&mut details, offer_details(old_side.0, old_side.1, old_side.2, "old_offer_"));
    details
}

fn merge(target: &mut Value, extra: Value) {
    if let (Value::Object(target), Value::Object(extra)) = (target, extra) {
        target.extend(extra);
    }
}

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub kind: EventKind,
    pub details: Value,
    pub created_ts: DateTime<Utc>,
}

#[derive(Default, Clone)]
pub struct InMemoryEventLog {
    entries: Arc<Mutex<Vec<EventRecord>>>,
}

impl InMemoryEventLog {
    pub fn entries(&self) -> Vec<EventRecord> {
        self.entries.lock().expect("event log mutex poisoned").clone()
    }

    pub fn count_of(&self, kind: EventKind) -> usize {
        self.entries().iter().filter(|e| e.kind == kind).count()
    }
}

impl EventLog for InMemoryEventLog {
    fn append(&self, kind: EventKind, details: Value) -> Result<(), StoreError> {
        self.entries
            .lock()
            .expect("event log mutex poisoned")
            .push(EventRecord {
                kind,
                details,
                created_ts: Utc::now(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::domain::{CharityId, CountryId, MatchId, OfferId};

    fn fixtures() -> (Offer, Country, Charity) {
        let country = Country {
            id: CountryId(1),
            name: "New Zealand".to_string(),
            iso: "NZ".to_string(),
            currency: "NZD".to_string(),
            min_donation_amount: 1,
            min_donation_currency: "NZD".to_string(),
            benefit_rate: 0.0,
        };
        let charity = Charity {
            id: CharityId(1),
            name: "Against Malaria Foundation".to_string(),
        };
        let offer = Offer {
            id: OfferId(11),
            secret: "s".repeat(24),
            name: "Ada".to_string(),
            email: "ada@example.org".to_string(),
            country_id: country.id,
            amount: 42,
            min_amount: 1,
            charity_id: charity.id,
            created_ts: Utc::now(),
            expires_ts: Utc::now(),
            confirmed: true,
        };
        (offer, country, charity)
    }

    #[test]
    fn type_codes_match_the_audit_schema() {
        assert_eq!(EventKind::OfferCreated.code(), 1);
        assert_eq!(EventKind::OfferConfirmed.code(), 2);
        assert_eq!(EventKind::OfferDeleted.code(), 3);
        assert_eq!(EventKind::OfferExpired.code(), 4);
        assert_eq!(EventKind::OfferUnconfirmed.code(), 5);
        assert_eq!(EventKind::MatchGenerated.code(), 21);
        assert_eq!(EventKind::MatchApproved.code(), 22);
        assert_eq!(EventKind::MatchDeclined.code(), 23);
        assert_eq!(EventKind::MatchFeedback.code(), 24);
        assert_eq!(EventKind::ContactMessage.code(), 41);
    }

    #[test]
    fn match_details_prefixes_both_sides() {
        let (offer, country, charity) = fixtures();
        let mut other = offer.clone();
        other.id = OfferId(12);
        let match_ = Match {
            id: MatchId(3),
            secret: "m".repeat(24),
            new_offer_id: other.id,
            old_offer_id: offer.id,
            new_agrees: None,
            old_agrees: None,
            created_ts: Utc::now(),
            feedback_ts: None,
            new_actual_amount: None,
            old_actual_amount: None,
        };
        let details = match_details(
            &match_,
            (&other, &country, &charity),
            (&offer, &country, &charity),
        );
        assert_eq!(details["match_id"], 3);
        assert_eq!(details["new_offer_id"], 12);
        assert_eq!(details["old_offer_id"], 11);
        assert_eq!(details["old_offer_charity"], "Against Malaria Foundation");
    }

    #[test]
    fn in_memory_log_counts_by_kind() {
        let log = InMemoryEventLog::default();
        log.append(EventKind::OfferCreated, json!({})).expect("append");
        log.append(EventKind::OfferCreated, json!({})).expect("append");
        log.append(EventKind::MatchGenerated, json!({})).expect("append");
        assert_eq!(log.count_of(EventKind::OfferCreated), 2);
        assert_eq!(log.count_of(EventKind::MatchGenerated), 1);
        assert_eq!(log.count_of(EventKind::MatchDeclined), 0);
    }
}
