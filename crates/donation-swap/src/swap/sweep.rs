//! Periodic lifecycle sweep over offers and matches.
//!
//! Four passes, each independently configurable: unconfirmed offers lapse,
//! expired unmatched offers are removed, stale unapproved matches can be
//! dissolved, and long-approved matches get a feedback request (with an
//! optional purge some time after that).

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::swap::eventlog::{match_details, offer_details, EventKind, EventLog};
use crate::swap::mail::{send_best_effort, OutboundEmail};
use crate::swap::repository::{MatchRepository, OfferRepository};
use crate::swap::service::{
    SwapError, SwapService, SUBJECT_DECLINED, SUBJECT_FEEDBACK, SUBJECT_OFFER_EXPIRED,
    SUBJECT_OFFER_LAPSED,
};

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Unconfirmed offers older than this lapse and are deleted.
    pub unconfirmed_after: Duration,
    /// When set, matches with missing consent older than this dissolve.
    /// `None` keeps proposals open indefinitely.
    pub unapproved_match_after: Option<Duration>,
    /// Fully approved matches get a feedback request after this long.
    pub feedback_after: Duration,
    /// When set, matches (and their offers) are purged this long after
    /// the feedback request went out. `None` keeps them forever.
    pub delete_after_feedback: Option<Duration>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            unconfirmed_after: Duration::hours(24),
            unapproved_match_after: None,
            feedback_after: Duration::days(31),
            delete_after_feedback: None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub unconfirmed_deleted: usize,
    pub expired_deleted: usize,
    pub unapproved_dissolved: usize,
    pub feedback_requested: usize,
    pub purged: usize,
}

impl SwapService {
    /// Run all sweep passes as of `now`. Any store failure aborts the
    /// sweep; the next scheduled run covers the same ground again.
    pub fn run_sweep(
        &self,
        config: &SweepConfig,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, SwapError> {
        let unconfirmed_deleted = self.sweep_unconfirmed(config, now)?;
        let expired_deleted = self.sweep_expired(now)?;
        let unapproved_dissolved = self.sweep_unapproved(config, now)?;
        let (feedback_requested, purged) = self.sweep_feedback(config, now)?;
        let report = SweepReport {
            unconfirmed_deleted,
            expired_deleted,
            unapproved_dissolved,
            feedback_requested,
            purged,
        };
        info!(
            unconfirmed = report.unconfirmed_deleted,
            expired = report.expired_deleted,
            unapproved = report.unapproved_dissolved,
            feedback = report.feedback_requested,
            purged = report.purged,
            "lifecycle sweep finished"
        );
        Ok(report)
    }

    fn sweep_unconfirmed(
        &self,
        config: &SweepConfig,
        now: DateTime<Utc>,
    ) -> Result<usize, SwapError> {
        let cutoff = now - config.unconfirmed_after;
        let stale = self
            .offers()
            .select(&|offer| !offer.confirmed && offer.created_ts <= cutoff)?;
        let mut deleted = 0;
        for offer in stale {
            let country = self.country_of(&offer)?;
            let charity = self.charity_of(&offer)?;
            self.offers().delete(offer.id)?;
            self.events().append(
                EventKind::OfferUnconfirmed,
                offer_details(&offer, &country, &charity, ""),
            )?;
            let text = format!(
                "Hello {name},\n\n\
                 your donation swap offer of {amount} {currency} to {charity} \
                 was not confirmed within 24 hours and has been removed.\n\
                 You are welcome to create a new offer at any time.",
                name = offer.name,
                amount = offer.amount,
                currency = country.currency,
                charity = charity.name,
            );
            send_best_effort(
                self.mailer(),
                OutboundEmail::new(SUBJECT_OFFER_LAPSED, text, offer.email.clone()),
            );
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Expired offers leave the pool only while unmatched; a live match
    /// keeps both offers around until the match itself resolves.
    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, SwapError> {
        let expired = self
            .offers()
            .select(&|offer| offer.confirmed && offer.expires_ts <= now)?;
        let mut deleted = 0;
        for offer in expired {
            if self.matches().involving(offer.id)?.is_some() {
                continue;
            }
            let country = self.country_of(&offer)?;
            let charity = self.charity_of(&offer)?;
            self.offers().delete(offer.id)?;
            self.events().append(
                EventKind::OfferExpired,
                offer_details(&offer, &country, &charity, ""),
            )?;
            // Suggest doubling the original window for the next attempt.
            let suggested = offer.expires_ts + (offer.expires_ts - offer.created_ts);
            let text = format!(
                "Hello {name},\n\n\
                 your donation swap offer of {amount} {currency} to {charity} \
                 expired before we found a partner, so we removed it.\n\
                 If you would like to try again, consider an expiration \
                 around {suggested} to give us more time.",
                name = offer.name,
                amount = offer.amount,
                currency = country.currency,
                charity = charity.name,
                suggested = suggested.format("%Y-%m-%d"),
            );
            send_best_effort(
                self.mailer(),
                OutboundEmail::new(SUBJECT_OFFER_EXPIRED, text, offer.email.clone()),
            );
            deleted += 1;
        }
        Ok(deleted)
    }

    fn sweep_unapproved(
        &self,
        config: &SweepConfig,
        now: DateTime<Utc>,
    ) -> Result<usize, SwapError> {
        let Some(after) = config.unapproved_match_after else {
            return Ok(0);
        };
        let cutoff = now - after;
        let stale = self
            .matches()
            .select(&|record| !record.fully_approved() && record.created_ts <= cutoff)?;
        let mut dissolved = 0;
        for record in stale {
            // A timeout is not a decline: the pair stays matchable and
            // may be proposed again.
            self.matches().delete(record.id)?;
            for offer_id in [record.new_offer_id, record.old_offer_id] {
                let Some(offer) = self.offers().by_id(offer_id)? else {
                    continue;
                };
                let text = format!(
                    "Hello {name},\n\n\
                     your proposed donation swap was not approved by both \
                     sides in time and has been dissolved. Your offer stays \
                     in the pool and we will look for a new partner.",
                    name = offer.name,
                );
                send_best_effort(
                    self.mailer(),
                    OutboundEmail::new(SUBJECT_DECLINED, text, offer.email.clone()),
                );
            }
            dissolved += 1;
        }
        Ok(dissolved)
    }

    fn sweep_feedback(
        &self,
        config: &SweepConfig,
        now: DateTime<Utc>,
    ) -> Result<(usize, usize), SwapError> {
        let cutoff = now - config.feedback_after;
        let due = self.matches().select(&|record| {
            record.fully_approved()
                && record.feedback_ts.is_none()
                && record.created_ts <= cutoff
        })?;
        let mut requested = 0;
        for record in due {
            self.matches().mark_feedback_requested(record.id, now)?;
            let new = self
                .offers()
                .by_id(record.new_offer_id)?
                .ok_or(SwapError::MatchNotFound)?;
            let old = self
                .offers()
                .by_id(record.old_offer_id)?
                .ok_or(SwapError::MatchNotFound)?;
            let new_country = self.country_of(&new)?;
            let new_charity = self.charity_of(&new)?;
            let old_country = self.country_of(&old)?;
            let old_charity = self.charity_of(&old)?;
            self.events().append(
                EventKind::MatchFeedback,
                match_details(
                    &record,
                    (&new, &new_country, &new_charity),
                    (&old, &old_country, &old_charity),
                ),
            )?;
            let text = "Hello,\n\n\
                        a month has passed since your donation swap was \
                        agreed. Did both donations go through? We would love \
                        to hear how it went; just reply to this email."
                .to_string();
            send_best_effort(
                self.mailer(),
                OutboundEmail::to_many(SUBJECT_FEEDBACK, text, vec![new.email, old.email]),
            );
            requested += 1;
        }

        let mut purged = 0;
        if let Some(delete_after) = config.delete_after_feedback {
            let done = self.matches().select(&|record| {
                record
                    .feedback_ts
                    .map(|ts| ts + delete_after <= now)
                    .unwrap_or(false)
            })?;
            for record in done {
                for offer_id in [record.new_offer_id, record.old_offer_id] {
                    let Some(offer) = self.offers().by_id(offer_id)? else {
                        continue;
                    };
                    let country = self.country_of(&offer)?;
                    let charity = self.charity_of(&offer)?;
                    self.offers().delete(offer.id)?;
                    // The log entry is the only surviving record of the offer.
                    self.events().append(
                        EventKind::OfferDeleted,
                        offer_details(&offer, &country, &charity, ""),
                    )?;
                }
                self.matches().delete(record.id)?;
                purged += 1;
            }
        }
        Ok((requested, purged))
    }
}
