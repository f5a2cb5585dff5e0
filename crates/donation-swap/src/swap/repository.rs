//! Storage abstractions and their in-memory implementations.
//!
//! The engine never holds entity state of its own; every operation loads
//! what it needs through these traits and writes back through them. The
//! in-memory variants back the test suites and the demo service.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::swap::domain::{
    Charity, CharityId, Country, CountryId, Match, MatchId, MatchSide, Offer, OfferId, TaxDeduction,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("offer is already part of a proposed match")]
    OfferAlreadyMatched,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// An offer as handed to the store, before an identifier is assigned.
#[derive(Debug, Clone)]
pub struct NewOffer {
    pub secret: String,
    pub name: String,
    pub email: String,
    pub country_id: CountryId,
    pub amount: i64,
    pub min_amount: i64,
    pub charity_id: CharityId,
    pub created_ts: DateTime<Utc>,
    pub expires_ts: DateTime<Utc>,
}

pub trait OfferRepository: Send + Sync {
    fn insert(&self, offer: NewOffer) -> Result<Offer, StoreError>;
    fn by_id(&self, id: OfferId) -> Result<Option<Offer>, StoreError>;
    fn by_secret(&self, secret: &str) -> Result<Option<Offer>, StoreError>;
    fn select(&self, predicate: &dyn Fn(&Offer) -> bool) -> Result<Vec<Offer>, StoreError>;
    fn confirm(&self, id: OfferId) -> Result<(), StoreError>;
    /// Clear the confirmed flag and re-stamp `created_ts`, making the offer
    /// subject to the unconfirmed sweep again instead of deleting it.
    fn suspend(&self, id: OfferId, now: DateTime<Utc>) -> Result<(), StoreError>;
    fn delete(&self, id: OfferId) -> Result<(), StoreError>;
}

pub trait MatchRepository: Send + Sync {
    /// Create a match between two offers. Fails with
    /// [`StoreError::OfferAlreadyMatched`] if either offer already sits on
    /// a live match; this is the store-level uniqueness rule that prevents
    /// two concurrent matchers from claiming the same offer.
    fn create(
        &self,
        secret: String,
        new_offer_id: OfferId,
        old_offer_id: OfferId,
        created_ts: DateTime<Utc>,
    ) -> Result<Match, StoreError>;
    fn by_id(&self, id: MatchId) -> Result<Option<Match>, StoreError>;
    fn by_secret(&self, secret: &str) -> Result<Option<Match>, StoreError>;
    fn select(&self, predicate: &dyn Fn(&Match) -> bool) -> Result<Vec<Match>, StoreError>;
    fn involving(&self, offer: OfferId) -> Result<Option<Match>, StoreError>;
    fn record_consent(&self, id: MatchId, side: MatchSide) -> Result<Match, StoreError>;
    fn store_actual_amounts(
        &self,
        id: MatchId,
        new_amount: i64,
        old_amount: i64,
    ) -> Result<(), StoreError>;
    fn mark_feedback_requested(&self, id: MatchId, ts: DateTime<Utc>) -> Result<(), StoreError>;
    fn delete(&self, id: MatchId) -> Result<(), StoreError>;
    /// Remember that this pair declined each other; consulted by the scorer
    /// in both orderings.
    fn record_declined(&self, a: OfferId, b: OfferId) -> Result<(), StoreError>;
    fn is_declined(&self, a: OfferId, b: OfferId) -> Result<bool, StoreError>;
}

/// Read-only lookups over countries, charities, and the deductibility table.
pub trait ReferenceRepository: Send + Sync {
    fn country(&self, id: CountryId) -> Option<Country>;
    fn country_by_iso(&self, iso: &str) -> Option<Country>;
    fn charity(&self, id: CharityId) -> Option<Charity>;
    fn countries(&self) -> Vec<Country>;
    fn charities(&self) -> Vec<Charity>;
    /// `Some` iff the charity is tax-deductible in the country.
    fn deduction_for(&self, charity: CharityId, country: CountryId) -> Option<TaxDeduction>;
}

/// Trusted operators allowed to call the admin command set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminUser {
    pub id: u32,
    pub email: String,
}

pub trait AdminDirectory: Send + Sync {
    fn by_session(&self, secret: &str) -> Option<AdminUser>;
}

#[derive(Default, Clone)]
pub struct InMemoryOffers {
    next_id: Arc<AtomicU32>,
    records: Arc<Mutex<HashMap<OfferId, Offer>>>,
}

impl InMemoryOffers {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<OfferId, Offer>> {
        self.records.lock().expect("offer store mutex poisoned")
    }
}

impl OfferRepository for InMemoryOffers {
    fn insert(&self, offer: NewOffer) -> Result<Offer, StoreError> {
        let id = OfferId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let record = Offer {
            id,
            secret: offer.secret,
            name: offer.name,
            email: offer.email,
            country_id: offer.country_id,
            amount: offer.amount,
            min_amount: offer.min_amount,
            charity_id: offer.charity_id,
            created_ts: offer.created_ts,
            expires_ts: offer.expires_ts,
            confirmed: false,
        };
        self.lock().insert(id, record.clone());
        Ok(record)
    }

    fn by_id(&self, id: OfferId) -> Result<Option<Offer>, StoreError> {
        Ok(self.lock().get(&id).cloned())
    }

    fn by_secret(&self, secret: &str) -> Result<Option<Offer>, StoreError> {
        Ok(self.lock().values().find(|o| o.secret == secret).cloned())
    }

    fn select(&self, predicate: &dyn Fn(&Offer) -> bool) -> Result<Vec<Offer>, StoreError> {
        let mut offers: Vec<Offer> = self.lock().values().filter(|o| predicate(o)).cloned().collect();
        offers.sort_by_key(|o| o.id);
        Ok(offers)
    }

    fn confirm(&self, id: OfferId) -> Result<(), StoreError> {
        let mut guard = self.lock();
        let offer = guard.get_mut(&id).ok_or(StoreError::NotFound)?;
        offer.confirmed = true;
        Ok(())
    }

    fn suspend(&self, id: OfferId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut guard = self.lock();
        let offer = guard.get_mut(&id).ok_or(StoreError::NotFound)?;
        offer.confirmed = false;
        offer.created_ts = now;
        Ok(())
    }

    fn delete(&self, id: OfferId) -> Result<(), StoreError> {
        self.lock().remove(&id).ok_or(StoreError::NotFound)?;
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryMatches {
    next_id: Arc<AtomicU32>,
    records: Arc<Mutex<HashMap<MatchId, Match>>>,
    declined: Arc<Mutex<HashSet<(OfferId, OfferId)>>>,
}

impl InMemoryMatches {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<MatchId, Match>> {
        self.records.lock().expect("match store mutex poisoned")
    }

    fn pair_key(a: OfferId, b: OfferId) -> (OfferId, OfferId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

impl MatchRepository for InMemoryMatches {
    fn create(
        &self,
        secret: String,
        new_offer_id: OfferId,
        old_offer_id: OfferId,
        created_ts: DateTime<Utc>,
    ) -> Result<Match, StoreError> {
        let mut guard = self.lock();
        let taken = guard
            .values()
            .any(|m| m.references(new_offer_id) || m.references(old_offer_id));
        if taken {
            return Err(StoreError::OfferAlreadyMatched);
        }
        let id = MatchId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let record = Match {
            id,
            secret,
            new_offer_id,
            old_offer_id,
            new_agrees: None,
            old_agrees: None,
            created_ts,
            feedback_ts: None,
            new_actual_amount: None,
            old_actual_amount: None,
        };
        guard.insert(id, record.clone());
        Ok(record)
    }

    fn by_id(&self, id: MatchId) -> Result<Option<Match>, StoreError> {
        Ok(self.lock().get(&id).cloned())
    }

    fn by_secret(&self, secret: &str) -> Result<Option<Match>, StoreError> {
        Ok(self.lock().values().find(|m| m.secret == secret).cloned())
    }

    fn select(&self, predicate: &dyn Fn(&Match) -> bool) -> Result<Vec<Match>, StoreError> {
        Ok(self.lock().values().filter(|m| predicate(m)).cloned().collect())
    }

    fn involving(&self, offer: OfferId) -> Result<Option<Match>, StoreError> {
        Ok(self.lock().values().find(|m| m.references(offer)).cloned())
    }

    fn record_consent(&self, id: MatchId, side: MatchSide) -> Result<Match, StoreError> {
        let mut guard = self.lock();
        let record = guard.get_mut(&id).ok_or(StoreError::NotFound)?;
        match side {
            MatchSide::New => record.new_agrees = Some(true),
            MatchSide::Old => record.old_agrees = Some(true),
        }
        Ok(record.clone())
    }

    fn store_actual_amounts(
        &self,
        id: MatchId,
        new_amount: i64,
        old_amount: i64,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock();
        let record = guard.get_mut(&id).ok_or(StoreError::NotFound)?;
        record.new_actual_amount = Some(new_amount);
        record.old_actual_amount = Some(old_amount);
        Ok(())
    }

    fn mark_feedback_requested(&self, id: MatchId, ts: DateTime<Utc>) -> Result<(), StoreError> {
        let mut guard = self.lock();
        let record = guard.get_mut(&id).ok_or(StoreError::NotFound)?;
        record.feedback_ts = Some(ts);
        Ok(())
    }

    fn delete(&self, id: MatchId) -> Result<(), StoreError> {
        self.lock().remove(&id).ok_or(StoreError::NotFound)?;
        Ok(())
    }

    fn record_declined(&self, a: OfferId, b: OfferId) -> Result<(), StoreError> {
        self.declined
            .lock()
            .expect("declined-pair mutex poisoned")
            .insert(Self::pair_key(a, b));
        Ok(())
    }

    fn is_declined(&self, a: OfferId, b: OfferId) -> Result<bool, StoreError> {
        Ok(self
            .declined
            .lock()
            .expect("declined-pair mutex poisoned")
            .contains(&Self::pair_key(a, b)))
    }
}

/// Reference data loaded once at startup; read-only thereafter.
#[derive(Default, Clone)]
pub struct StaticReference {
    countries: Vec<Country>,
    charities: Vec<Charity>,
    deductions: Vec<TaxDeduction>,
}

impl StaticReference {
    pub fn new(
        countries: Vec<Country>,
        charities: Vec<Charity>,
        deductions: Vec<TaxDeduction>,
    ) -> Self {
        Self {
            countries,
            charities,
            deductions,
        }
    }
}

impl ReferenceRepository for StaticReference {
    fn country(&self, id: CountryId) -> Option<Country> {
        self.countries.iter().find(|c| c.id == id).cloned()
    }

    fn country_by_iso(&self, iso: &str) -> Option<Country> {
        self.countries
            .iter()
            .find(|c| c.iso.eq_ignore_ascii_case(iso))
            .cloned()
    }

    fn charity(&self, id: CharityId) -> Option<Charity> {
        self.charities.iter().find(|c| c.id == id).cloned()
    }

    fn countries(&self) -> Vec<Country> {
        self.countries.clone()
    }

    fn charities(&self) -> Vec<Charity> {
        self.charities.clone()
    }

    fn deduction_for(&self, charity: CharityId, country: CountryId) -> Option<TaxDeduction> {
        self.deductions
            .iter()
            .find(|d| d.charity_id == charity && d.country_id == country)
            .cloned()
    }
}

#[derive(Default, Clone)]
pub struct InMemoryAdmins {
    sessions: Arc<Mutex<HashMap<String, AdminUser>>>,
}

impl InMemoryAdmins {
    pub fn grant(&self, secret: impl Into<String>, user: AdminUser) {
        self.sessions
            .lock()
            .expect("admin session mutex poisoned")
            .insert(secret.into(), user);
    }
}

impl AdminDirectory for InMemoryAdmins {
    fn by_session(&self, secret: &str) -> Option<AdminUser> {
        self.sessions
            .lock()
            .expect("admin session mutex poisoned")
            .get(secret)
            .cloned()
    }
}
