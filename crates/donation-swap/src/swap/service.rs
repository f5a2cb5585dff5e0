//! The negotiation protocol: offer intake, confirmation, match binding,
//! and the two-sided approve/decline workflow.
//!
//! Nobody logs in. An offer secret reaches its donor only by email, so
//! presenting it proves both mailbox ownership and offer ownership; a
//! combined token (offer secret ++ match secret) additionally names which
//! side of a match the caller is. Counterpart email addresses are withheld
//! until both sides have approved.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::swap::currency::CurrencyConverter;
use crate::swap::domain::{
    Charity, CharityId, Country, CountryId, Match, MatchSide, Offer, OfferId,
};
use crate::swap::equalize::{equalize, EqualizedAmounts};
use crate::swap::eventlog::{match_details, offer_details, EventKind, EventLog};
use crate::swap::mail::{send_best_effort, MailSender, OutboundEmail};
use crate::swap::repository::{
    MatchRepository, NewOffer, OfferRepository, ReferenceRepository, StoreError,
};
use crate::swap::scoring::CompatibilityScorer;
use crate::swap::secret;

pub(crate) const SUBJECT_CONFIRM_OFFER: &str = "Please confirm your donation swap offer";
pub(crate) const SUBJECT_OFFER_CONFIRMED: &str = "A donation swap offer was confirmed";
pub(crate) const SUBJECT_MATCH_PROPOSED: &str = "We found a donation swap partner for you";
pub(crate) const SUBJECT_DEAL: &str = "Your donation swap is a deal";
pub(crate) const SUBJECT_DECLINER: &str = "You declined your proposed donation swap";
pub(crate) const SUBJECT_DECLINED: &str = "Your proposed donation swap fell through";
pub(crate) const SUBJECT_APPROVED_DECLINED: &str = "Your approved donation swap fell through";
pub(crate) const SUBJECT_OFFER_LAPSED: &str = "Your donation swap offer was not confirmed";
pub(crate) const SUBJECT_OFFER_EXPIRED: &str = "Your donation swap offer has expired";
pub(crate) const SUBJECT_FEEDBACK: &str = "How did your donation swap go?";

const NO_INSTRUCTIONS_PLACEHOLDER: &str =
    "Sorry, there are no payment instructions available (yet).";

/// User-facing validation and business-rule failures. The display text is
/// shown verbatim to anonymous callers, so it must never carry details
/// about anyone other than the caller.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("please complete the captcha")]
    BadCaptcha,
    #[error("please provide your name")]
    MissingName,
    #[error("country not found")]
    CountryNotFound,
    #[error("charity not found")]
    CharityNotFound,
    #[error("the amount must be a whole number of at least zero")]
    BadAmount,
    #[error("the minimum amount must be a whole number of at least zero")]
    BadMinAmount,
    #[error("the minimum amount must not be larger than the amount")]
    MinAmountAboveAmount,
    #[error("the minimum donation in your country is {amount} {currency}")]
    MinAmountTooSmall { amount: i64, currency: String },
    #[error("that does not look like an email address")]
    BadEmail,
    #[error("the expiration date is invalid")]
    BadExpiration,
    #[error("offer not found")]
    OfferNotFound,
    #[error("match not found")]
    MatchNotFound,
    #[error("one of the offers is already part of a proposed match")]
    OfferAlreadyMatched,
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SwapError {
    /// Whether the display text may be shown to an anonymous caller.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, SwapError::Store(_))
    }
}

pub trait CaptchaVerifier: Send + Sync {
    fn is_legit(&self, caller_ip: &str, response: Option<&str>) -> bool;
}

/// Accepts everything; for tests and deployments without a captcha key.
#[derive(Default, Clone)]
pub struct AllowAllCaptcha;

impl CaptchaVerifier for AllowAllCaptcha {
    fn is_legit(&self, _caller_ip: &str, _response: Option<&str>) -> bool {
        true
    }
}

pub trait GeoIpResolver: Send + Sync {
    /// ISO 3166 alpha-2 code of the caller's country, if known.
    fn lookup(&self, caller_ip: &str) -> Option<String>;
}

#[derive(Default, Clone)]
pub struct UnknownGeoIp;

impl GeoIpResolver for UnknownGeoIp {
    fn lookup(&self, _caller_ip: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct SwapConfig {
    /// Common currency used for scoring and equalization comparisons.
    pub reference_currency: String,
    /// Operators who receive confirmation notices and contact messages.
    pub contact_recipients: Vec<String>,
    /// Skip captcha checks and hand created offers back to the caller.
    /// For scripted use only; never enable on an internet-facing deployment.
    pub automation_mode: bool,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            reference_currency: "NZD".to_string(),
            contact_recipients: Vec::new(),
            automation_mode: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpirationDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOfferRequest {
    #[serde(default)]
    pub captcha_response: Option<String>,
    pub name: String,
    pub country: u32,
    pub amount: i64,
    pub min_amount: i64,
    pub charity: u32,
    pub email: String,
    pub expiration: ExpirationDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct OfferConfirmation {
    pub was_confirmed: bool,
    pub name: String,
    pub currency: String,
    pub amount: i64,
    pub min_amount: i64,
    pub charity: String,
    pub created_ts: String,
    pub expires_ts: String,
}

/// What a party is shown about their match before mutual approval.
/// Deliberately excludes the counterpart's name and email address.
#[derive(Debug, Clone, Serialize)]
pub struct MatchView {
    pub my_country: String,
    pub my_charity: String,
    pub my_amount: i64,
    pub my_currency: String,
    pub their_country: String,
    pub their_charity: String,
    pub their_amount: i64,
    pub their_currency: String,
    pub can_edit: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnmatchedOfferView {
    pub id: u32,
    pub name: String,
    pub email: String,
    pub country: String,
    pub charity: String,
    pub amount: i64,
    pub min_amount: i64,
    pub currency: String,
    pub expires_ts: String,
    /// Effective value in the engine's reference currency, for ranking.
    pub effective_amount: i64,
    pub offer_secret: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreView {
    pub offer_id: u32,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountryInfo {
    pub id: u32,
    pub name: String,
    pub iso: String,
    pub currency: String,
    /// Minimum donation localized to the country's own currency.
    pub min_donation_amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CharityInfo {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferenceInfo {
    pub countries: Vec<CountryInfo>,
    pub charities: Vec<CharityInfo>,
    /// Charity ids deductible per country id.
    pub deductible: Vec<(u32, Vec<u32>)>,
    pub client_country: Option<u32>,
}

struct ValidatedOffer {
    name: String,
    email: String,
    country: Country,
    charity: Charity,
    amount: i64,
    min_amount: i64,
    expires_ts: chrono::DateTime<Utc>,
}

struct ResolvedMatch {
    record: Match,
    my_side: MatchSide,
    my: Offer,
    their: Offer,
}

pub struct SwapService {
    reference: Arc<dyn ReferenceRepository>,
    offers: Arc<dyn OfferRepository>,
    matches: Arc<dyn MatchRepository>,
    converter: Arc<dyn CurrencyConverter>,
    mailer: Arc<dyn MailSender>,
    events: Arc<dyn EventLog>,
    captcha: Arc<dyn CaptchaVerifier>,
    geoip: Arc<dyn GeoIpResolver>,
    config: SwapConfig,
}

impl SwapService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reference: Arc<dyn ReferenceRepository>,
        offers: Arc<dyn OfferRepository>,
        matches: Arc<dyn MatchRepository>,
        converter: Arc<dyn CurrencyConverter>,
        mailer: Arc<dyn MailSender>,
        events: Arc<dyn EventLog>,
        captcha: Arc<dyn CaptchaVerifier>,
        geoip: Arc<dyn GeoIpResolver>,
        config: SwapConfig,
    ) -> Self {
        Self {
            reference,
            offers,
            matches,
            converter,
            mailer,
            events,
            captcha,
            geoip,
            config,
        }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    pub(crate) fn offers(&self) -> &dyn OfferRepository {
        self.offers.as_ref()
    }

    pub(crate) fn matches(&self) -> &dyn MatchRepository {
        self.matches.as_ref()
    }

    pub(crate) fn events(&self) -> &dyn EventLog {
        self.events.as_ref()
    }

    pub(crate) fn mailer(&self) -> &dyn MailSender {
        self.mailer.as_ref()
    }

    fn scorer(&self) -> CompatibilityScorer {
        CompatibilityScorer::new(
            self.reference.clone(),
            self.matches.clone(),
            self.converter.clone(),
            self.config.reference_currency.clone(),
        )
    }

    pub(crate) fn country_of(&self, offer: &Offer) -> Result<Country, SwapError> {
        self.reference
            .country(offer.country_id)
            .ok_or(SwapError::CountryNotFound)
    }

    pub(crate) fn charity_of(&self, offer: &Offer) -> Result<Charity, SwapError> {
        self.reference
            .charity(offer.charity_id)
            .ok_or(SwapError::CharityNotFound)
    }

    fn check_captcha(&self, response: Option<&str>, caller_ip: &str) -> Result<(), SwapError> {
        if self.config.automation_mode {
            return Ok(());
        }
        if self.captcha.is_legit(caller_ip, response) {
            Ok(())
        } else {
            Err(SwapError::BadCaptcha)
        }
    }

    fn validate_offer_fields(&self, req: &CreateOfferRequest) -> Result<ValidatedOffer, SwapError> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(SwapError::MissingName);
        }

        let country = self
            .reference
            .country(CountryId(req.country))
            .ok_or(SwapError::CountryNotFound)?;

        if req.amount < 0 {
            return Err(SwapError::BadAmount);
        }
        if req.min_amount < 0 {
            return Err(SwapError::BadMinAmount);
        }
        if req.min_amount > req.amount {
            return Err(SwapError::MinAmountAboveAmount);
        }

        let min_allowed = self.converter.convert(
            country.min_donation_amount as f64,
            &country.min_donation_currency,
            &country.currency,
        );
        if req.min_amount < min_allowed {
            return Err(SwapError::MinAmountTooSmall {
                amount: country.min_donation_amount,
                currency: country.min_donation_currency.clone(),
            });
        }

        let charity = self
            .reference
            .charity(CharityId(req.charity))
            .ok_or(SwapError::CharityNotFound)?;

        let email = req.email.trim();
        if !looks_like_email(email) {
            return Err(SwapError::BadEmail);
        }

        let expires = NaiveDate::from_ymd_opt(
            req.expiration.year,
            req.expiration.month,
            req.expiration.day,
        )
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or(SwapError::BadExpiration)?
        .and_utc();

        Ok(ValidatedOffer {
            name: name.to_string(),
            email: email.to_string(),
            country,
            charity,
            amount: req.amount,
            min_amount: req.min_amount,
            expires_ts: expires,
        })
    }

    /// Dry-run validation: the would-be rejection message, if any.
    pub fn validate_offer(&self, req: &CreateOfferRequest) -> Option<String> {
        self.validate_offer_fields(req).err().map(|e| e.to_string())
    }

    /// Create an unconfirmed offer and email the donor their secret.
    ///
    /// The secret is never part of the return value in normal operation:
    /// receiving it by email is what proves mailbox ownership. Automation
    /// mode short-circuits that for scripted runs and returns the offer.
    pub fn create_offer(
        &self,
        req: CreateOfferRequest,
        caller_ip: &str,
    ) -> Result<Option<Offer>, SwapError> {
        self.check_captcha(req.captcha_response.as_deref(), caller_ip)?;
        let fields = self.validate_offer_fields(&req)?;

        let offer = self.offers.insert(NewOffer {
            secret: secret::generate(),
            name: fields.name,
            email: fields.email,
            country_id: fields.country.id,
            amount: fields.amount,
            min_amount: fields.min_amount,
            charity_id: fields.charity.id,
            created_ts: Utc::now(),
            expires_ts: fields.expires_ts,
        })?;
        self.events.append(
            EventKind::OfferCreated,
            offer_details(&offer, &fields.country, &fields.charity, ""),
        )?;
        info!(offer_id = offer.id.0, "offer created");

        if self.config.automation_mode {
            return Ok(Some(offer));
        }

        let text = format!(
            "Hello {name},\n\n\
             you offered to donate {amount} {currency} (minimum {min}) to \
             {charity}.\n\n\
             Please confirm your offer by opening this link:\n\
             /offer#{secret}\n\n\
             If you did not create this offer, simply ignore this email; \
             the offer lapses after 24 hours.",
            name = offer.name,
            amount = offer.amount,
            currency = fields.country.currency,
            min = offer.min_amount,
            charity = fields.charity.name,
            secret = offer.secret,
        );
        send_best_effort(
            self.mailer.as_ref(),
            OutboundEmail::new(SUBJECT_CONFIRM_OFFER, text, offer.email.clone()),
        );

        Ok(None)
    }

    /// Mark an offer confirmed. Idempotent: a second call reports
    /// `was_confirmed: true` and sends nothing.
    pub fn confirm_offer(&self, offer_secret: &str) -> Result<OfferConfirmation, SwapError> {
        let offer = self
            .offers
            .by_secret(offer_secret)?
            .ok_or(SwapError::OfferNotFound)?;
        let country = self.country_of(&offer)?;
        let charity = self.charity_of(&offer)?;

        let was_confirmed = offer.confirmed;
        if !was_confirmed {
            self.offers.confirm(offer.id)?;
            self.events.append(
                EventKind::OfferConfirmed,
                offer_details(&offer, &country, &charity, ""),
            )?;
            info!(offer_id = offer.id.0, "offer confirmed");

            if !self.config.contact_recipients.is_empty() {
                let text = format!(
                    "An offer of {amount} {currency} (minimum {min}) to {charity} \
                     from {country} was just confirmed.",
                    amount = offer.amount,
                    currency = country.currency,
                    min = offer.min_amount,
                    charity = charity.name,
                    country = country.name,
                );
                send_best_effort(
                    self.mailer.as_ref(),
                    OutboundEmail::to_many(
                        SUBJECT_OFFER_CONFIRMED,
                        text,
                        self.config.contact_recipients.clone(),
                    ),
                );
            }
        }

        Ok(OfferConfirmation {
            was_confirmed,
            name: offer.name,
            currency: country.currency,
            amount: offer.amount,
            min_amount: offer.min_amount,
            charity: charity.name,
            created_ts: offer.created_ts.to_rfc3339(),
            expires_ts: offer.expires_ts.to_rfc3339(),
        })
    }

    /// Withdraw an offer. Quietly does nothing when the secret matches no
    /// offer, so stale withdrawal links stay harmless.
    pub fn delete_offer(&self, offer_secret: &str) -> Result<(), SwapError> {
        let Some(offer) = self.offers.by_secret(offer_secret)? else {
            return Ok(());
        };
        let country = self.country_of(&offer)?;
        let charity = self.charity_of(&offer)?;
        self.offers.delete(offer.id)?;
        self.events.append(
            EventKind::OfferDeleted,
            offer_details(&offer, &country, &charity, ""),
        )?;
        info!(offer_id = offer.id.0, "offer withdrawn");
        Ok(())
    }

    /// Confirmed, unexpired offers that are on no live match.
    pub fn unmatched_offers(&self) -> Result<Vec<Offer>, SwapError> {
        let now = Utc::now();
        let candidates = self
            .offers
            .select(&|offer| offer.confirmed && offer.expires_ts > now)?;
        let mut unmatched = Vec::with_capacity(candidates.len());
        for offer in candidates {
            if self.matches.involving(offer.id)?.is_none() {
                unmatched.push(offer);
            }
        }
        Ok(unmatched)
    }

    /// Admin view of the unmatched pool, annotated with effective values
    /// in the reference currency for ranking.
    pub fn unmatched_offer_views(&self) -> Result<Vec<UnmatchedOfferView>, SwapError> {
        let mut views = Vec::new();
        for offer in self.unmatched_offers()? {
            let country = self.country_of(&offer)?;
            let charity = self.charity_of(&offer)?;
            let effective = crate::swap::scoring::effective_value(
                self.converter.as_ref(),
                offer.amount,
                &country,
                &self.config.reference_currency,
            ) as i64;
            views.push(UnmatchedOfferView {
                id: offer.id.0,
                name: offer.name,
                email: offer.email,
                country: country.name,
                charity: charity.name,
                amount: offer.amount,
                min_amount: offer.min_amount,
                currency: country.currency,
                expires_ts: offer.expires_ts.to_rfc3339(),
                effective_amount: effective,
                offer_secret: offer.secret,
            });
        }
        Ok(views)
    }

    /// Score one offer against the whole unmatched pool.
    pub fn match_scores(&self, offer_id: u32) -> Result<Vec<ScoreView>, SwapError> {
        let offer = self
            .offers
            .by_id(OfferId(offer_id))?
            .ok_or(SwapError::OfferNotFound)?;
        let scorer = self.scorer();
        let mut views = Vec::new();
        for candidate in self.unmatched_offers()? {
            if candidate.id == offer.id {
                continue;
            }
            let outcome = scorer.score(&offer, &candidate)?;
            views.push(ScoreView {
                offer_id: candidate.id.0,
                score: outcome.score,
                reason: outcome.reason.to_string(),
            });
        }
        views.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(views)
    }

    /// Bind two offers into a match and email both sides their combined
    /// token. The earlier-created offer becomes the "old" side.
    pub fn create_match(&self, offer_a: u32, offer_b: u32) -> Result<Match, SwapError> {
        let a = self
            .offers
            .by_id(OfferId(offer_a))?
            .ok_or(SwapError::OfferNotFound)?;
        let b = self
            .offers
            .by_id(OfferId(offer_b))?
            .ok_or(SwapError::OfferNotFound)?;
        let (old, new) = if a.created_ts <= b.created_ts {
            (a, b)
        } else {
            (b, a)
        };

        let record = self
            .matches
            .create(secret::generate(), new.id, old.id, Utc::now())
            .map_err(|err| match err {
                StoreError::OfferAlreadyMatched => SwapError::OfferAlreadyMatched,
                other => SwapError::Store(other),
            })?;

        let new_country = self.country_of(&new)?;
        let new_charity = self.charity_of(&new)?;
        let old_country = self.country_of(&old)?;
        let old_charity = self.charity_of(&old)?;
        self.events.append(
            EventKind::MatchGenerated,
            match_details(
                &record,
                (&new, &new_country, &new_charity),
                (&old, &old_country, &old_charity),
            ),
        )?;
        info!(
            match_id = record.id.0,
            new_offer = new.id.0,
            old_offer = old.id.0,
            "match generated"
        );

        let amounts = self.actual_amounts(&record)?;
        self.send_match_proposal(&record, &old, &old_country, &new_charity, amounts.old_amount);
        self.send_match_proposal(&record, &new, &new_country, &old_charity, amounts.new_amount);

        self.matches
            .by_id(record.id)?
            .ok_or(SwapError::MatchNotFound)
    }

    fn send_match_proposal(
        &self,
        record: &Match,
        my_offer: &Offer,
        my_country: &Country,
        their_charity: &Charity,
        my_actual_amount: i64,
    ) {
        let text = format!(
            "Hello {name},\n\n\
             we found a swap partner for your donation offer. If you both \
             agree, you would donate {actual} {currency} to {their_charity} \
             instead, and your partner supports your chosen charity in \
             return.\n\n\
             Review the proposal and approve or decline here:\n\
             /match#{token}\n\n\
             Your partner's identity is revealed once you both approve.",
            name = my_offer.name,
            actual = my_actual_amount,
            currency = my_country.currency,
            their_charity = their_charity.name,
            token = format!("{}{}", my_offer.secret, record.secret),
        );
        send_best_effort(
            self.mailer.as_ref(),
            OutboundEmail::new(SUBJECT_MATCH_PROPOSED, text, my_offer.email.clone()),
        );
    }

    fn resolve_match(&self, combined_secret: &str) -> Result<ResolvedMatch, SwapError> {
        let (offer_secret, match_secret) =
            secret::split_combined(combined_secret).ok_or(SwapError::MatchNotFound)?;
        let record = self
            .matches
            .by_secret(match_secret)?
            .ok_or(SwapError::MatchNotFound)?;
        let new = self
            .offers
            .by_id(record.new_offer_id)?
            .ok_or(SwapError::MatchNotFound)?;
        let old = self
            .offers
            .by_id(record.old_offer_id)?
            .ok_or(SwapError::MatchNotFound)?;

        let (my_side, my, their) = if new.secret == offer_secret {
            (MatchSide::New, new, old)
        } else if old.secret == offer_secret {
            (MatchSide::Old, old, new)
        } else {
            return Err(SwapError::MatchNotFound);
        };

        Ok(ResolvedMatch {
            record,
            my_side,
            my,
            their,
        })
    }

    /// Equalized amounts, computed once per match and cached on the record
    /// so both parties keep seeing the same figures as rates move.
    fn actual_amounts(&self, record: &Match) -> Result<EqualizedAmounts, SwapError> {
        if let (Some(new_amount), Some(old_amount)) =
            (record.new_actual_amount, record.old_actual_amount)
        {
            return Ok(EqualizedAmounts {
                new_amount,
                old_amount,
            });
        }

        let new = self
            .offers
            .by_id(record.new_offer_id)?
            .ok_or(SwapError::MatchNotFound)?;
        let old = self
            .offers
            .by_id(record.old_offer_id)?
            .ok_or(SwapError::MatchNotFound)?;
        let new_country = self.country_of(&new)?;
        let old_country = self.country_of(&old)?;

        let amounts = equalize(
            self.converter.as_ref(),
            &self.config.reference_currency,
            (&new, &new_country),
            (&old, &old_country),
        );
        self.matches
            .store_actual_amounts(record.id, amounts.new_amount, amounts.old_amount)?;
        Ok(amounts)
    }

    /// What the caller may see about their match before mutual approval.
    pub fn get_match(&self, combined_secret: &str) -> Result<MatchView, SwapError> {
        let resolved = self.resolve_match(combined_secret)?;
        let amounts = self.actual_amounts(&resolved.record)?;

        let my_country = self.country_of(&resolved.my)?;
        let my_charity = self.charity_of(&resolved.my)?;
        let their_country = self.country_of(&resolved.their)?;
        let their_charity = self.charity_of(&resolved.their)?;

        let (my_amount, their_amount) = match resolved.my_side {
            MatchSide::New => (amounts.new_amount, amounts.old_amount),
            MatchSide::Old => (amounts.old_amount, amounts.new_amount),
        };

        Ok(MatchView {
            my_country: my_country.name,
            my_charity: my_charity.name,
            my_amount,
            my_currency: my_country.currency,
            their_country: their_country.name,
            their_charity: their_charity.name,
            their_amount,
            their_currency: their_country.currency,
            can_edit: resolved.record.agrees(resolved.my_side).is_none(),
        })
    }

    /// Record the caller's consent; when both sides have agreed, send the
    /// deal email that finally discloses the counterpart addresses.
    pub fn approve_match(&self, combined_secret: &str) -> Result<(), SwapError> {
        let resolved = self.resolve_match(combined_secret)?;
        let updated = self
            .matches
            .record_consent(resolved.record.id, resolved.my_side)?;

        let my_country = self.country_of(&resolved.my)?;
        let my_charity = self.charity_of(&resolved.my)?;
        let their_country = self.country_of(&resolved.their)?;
        let their_charity = self.charity_of(&resolved.their)?;

        let mut details = match resolved.my_side {
            MatchSide::New => match_details(
                &updated,
                (&resolved.my, &my_country, &my_charity),
                (&resolved.their, &their_country, &their_charity),
            ),
            MatchSide::Old => match_details(
                &updated,
                (&resolved.their, &their_country, &their_charity),
                (&resolved.my, &my_country, &my_charity),
            ),
        };
        if let Some(object) = details.as_object_mut() {
            object.insert("offer_id".to_string(), resolved.my.id.0.into());
        }
        self.events.append(EventKind::MatchApproved, details)?;
        info!(
            match_id = updated.id.0,
            offer_id = resolved.my.id.0,
            "match approved by one side"
        );

        if updated.fully_approved() {
            self.send_deal_email(&updated)?;
        }
        Ok(())
    }

    fn send_deal_email(&self, record: &Match) -> Result<(), SwapError> {
        let new = self
            .offers
            .by_id(record.new_offer_id)?
            .ok_or(SwapError::MatchNotFound)?;
        let old = self
            .offers
            .by_id(record.old_offer_id)?
            .ok_or(SwapError::MatchNotFound)?;
        let new_country = self.country_of(&new)?;
        let old_country = self.country_of(&old)?;
        let new_charity = self.charity_of(&new)?;
        let old_charity = self.charity_of(&old)?;
        let amounts = self.actual_amounts(record)?;

        let instructions_new = self.instructions_for(&old_charity, &new_country);
        let instructions_old = self.instructions_for(&new_charity, &old_country);

        let text = format!(
            "Congratulations, both of you approved the swap!\n\n\
             {new_name} <{new_email}> in {new_country} donates \
             {new_amount} {new_currency} to {old_charity}.\n{new_gift_aid}\
             Instructions: {instructions_new}\n\n\
             {old_name} <{old_email}> in {old_country} donates \
             {old_amount} {old_currency} to {new_charity}.\n{old_gift_aid}\
             Instructions: {instructions_old}\n\n\
             Please get in touch with each other to settle the details.",
            new_name = new.name,
            new_email = new.email,
            new_country = new_country.name,
            new_amount = amounts.new_amount,
            new_currency = new_country.currency,
            old_charity = old_charity.name,
            new_gift_aid = gift_aid_insert(&new_country, amounts.new_amount, &old_charity),
            instructions_new = instructions_new,
            old_name = old.name,
            old_email = old.email,
            old_country = old_country.name,
            old_amount = amounts.old_amount,
            old_currency = old_country.currency,
            new_charity = new_charity.name,
            old_gift_aid = gift_aid_insert(&old_country, amounts.old_amount, &new_charity),
            instructions_old = instructions_old,
        );

        info!(
            match_id = record.id.0,
            "match fully approved; sending deal email"
        );
        send_best_effort(
            self.mailer.as_ref(),
            OutboundEmail::to_many(SUBJECT_DEAL, text, vec![new.email, old.email]),
        );
        Ok(())
    }

    fn instructions_for(&self, charity: &Charity, country: &Country) -> String {
        self.reference
            .deduction_for(charity.id, country.id)
            .and_then(|deduction| deduction.instructions)
            .unwrap_or_else(|| NO_INSTRUCTIONS_PLACEHOLDER.to_string())
    }

    /// Decline a match: remember the pair, remove the match, and suspend
    /// the decliner's offer so it goes back through email confirmation.
    pub fn decline_match(&self, combined_secret: &str, feedback: &str) -> Result<(), SwapError> {
        let resolved = self.resolve_match(combined_secret)?;
        let other_agreed = resolved.record.agrees(resolved.my_side.other()) == Some(true);

        self.matches
            .record_declined(resolved.record.old_offer_id, resolved.record.new_offer_id)?;
        self.matches.delete(resolved.record.id)?;
        self.offers.suspend(resolved.my.id, Utc::now())?;

        let my_country = self.country_of(&resolved.my)?;
        let my_charity = self.charity_of(&resolved.my)?;
        let their_country = self.country_of(&resolved.their)?;
        let their_charity = self.charity_of(&resolved.their)?;
        let mut details = match resolved.my_side {
            MatchSide::New => match_details(
                &resolved.record,
                (&resolved.my, &my_country, &my_charity),
                (&resolved.their, &their_country, &their_charity),
            ),
            MatchSide::Old => match_details(
                &resolved.record,
                (&resolved.their, &their_country, &their_charity),
                (&resolved.my, &my_country, &my_charity),
            ),
        };
        if let Some(object) = details.as_object_mut() {
            object.insert("offer_id".to_string(), resolved.my.id.0.into());
            object.insert("feedback".to_string(), feedback.into());
        }
        self.events.append(EventKind::MatchDeclined, details)?;
        info!(
            match_id = resolved.record.id.0,
            offer_id = resolved.my.id.0,
            "match declined"
        );

        let decliner_text = format!(
            "Hello {name},\n\n\
             you declined the proposed donation swap. Your offer is on hold; \
             re-confirm it within 24 hours to go back into the pool:\n\
             /offer#{secret}",
            name = resolved.my.name,
            secret = resolved.my.secret,
        );
        send_best_effort(
            self.mailer.as_ref(),
            OutboundEmail::new(SUBJECT_DECLINER, decliner_text, resolved.my.email.clone()),
        );

        let other_subject = if other_agreed {
            SUBJECT_APPROVED_DECLINED
        } else {
            SUBJECT_DECLINED
        };
        let other_text = format!(
            "Hello {name},\n\n\
             unfortunately your proposed donation swap fell through. Your \
             offer stays in the pool and we will look for a new partner.\n\
             You can review it here:\n\
             /offer#{secret}",
            name = resolved.their.name,
            secret = resolved.their.secret,
        );
        send_best_effort(
            self.mailer.as_ref(),
            OutboundEmail::new(other_subject, other_text, resolved.their.email.clone()),
        );
        Ok(())
    }

    /// Contact form: captcha-gated, geo-annotated, audited, forwarded to
    /// the operators.
    pub fn send_contact_message(
        &self,
        captcha_response: Option<&str>,
        message: &str,
        name: Option<&str>,
        email: Option<&str>,
        caller_ip: &str,
    ) -> Result<(), SwapError> {
        self.check_captcha(captcha_response, caller_ip)?;

        let country = self.geoip.lookup(caller_ip);
        let text = format!(
            "Message from {name} <{email}> ({ip}, {country}):\n\n{message}",
            name = name.unwrap_or("n/a"),
            email = email.unwrap_or("n/a"),
            ip = caller_ip,
            country = country.as_deref().unwrap_or("unknown country"),
            message = message.trim(),
        );

        self.events.append(
            EventKind::ContactMessage,
            serde_json::json!({
                "message": message.trim(),
                "name": name,
                "email": email,
                "ip": caller_ip,
                "country": country,
                "to": self.config.contact_recipients,
            }),
        )?;

        if self.config.contact_recipients.is_empty() {
            info!("contact message received but no recipients configured");
            return Ok(());
        }
        send_best_effort(
            self.mailer.as_ref(),
            OutboundEmail::to_many(
                "Donation swap contact message",
                text,
                self.config.contact_recipients.clone(),
            ),
        );
        Ok(())
    }

    /// Reference data for form bootstrapping, plus the caller's likely
    /// country from geo-IP.
    pub fn reference_info(&self, caller_ip: &str) -> Result<ReferenceInfo, SwapError> {
        let client_country = self
            .geoip
            .lookup(caller_ip)
            .and_then(|iso| self.reference.country_by_iso(&iso))
            .map(|country| country.id.0);

        let mut countries: Vec<CountryInfo> = self
            .reference
            .countries()
            .into_iter()
            .map(|country| CountryInfo {
                min_donation_amount: self.converter.convert(
                    country.min_donation_amount as f64,
                    &country.min_donation_currency,
                    &country.currency,
                ),
                id: country.id.0,
                name: country.name,
                iso: country.iso,
                currency: country.currency,
            })
            .collect();
        countries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut charities: Vec<CharityInfo> = self
            .reference
            .charities()
            .into_iter()
            .map(|charity| CharityInfo {
                id: charity.id.0,
                name: charity.name,
            })
            .collect();
        charities.sort_by(|a, b| a.name.cmp(&b.name));

        let mut deductible = Vec::new();
        for country in self.reference.countries() {
            let mut ids: Vec<u32> = self
                .reference
                .charities()
                .into_iter()
                .filter(|charity| {
                    self.reference
                        .deduction_for(charity.id, country.id)
                        .is_some()
                })
                .map(|charity| charity.id.0)
                .collect();
            ids.sort_unstable();
            deductible.push((country.id.0, ids));
        }
        deductible.sort_unstable_by_key(|(id, _)| *id);

        Ok(ReferenceInfo {
            countries,
            charities,
            deductible,
            client_country,
        })
    }
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn gift_aid_insert(country: &Country, actual_amount: i64, charity: &Charity) -> String {
    if country.benefit_multiplier() <= 1.0 {
        return String::new();
    }
    let scheme = if country.iso.eq_ignore_ascii_case("IE") {
        "the Irish government contribution"
    } else {
        "UK government Gift Aid"
    };
    let to_charity = (actual_amount as f64 * country.benefit_multiplier()) as i64;
    format!(
        "Through {scheme} ({rate}%), {charity} receives {to_charity} \
         {currency} in total.\n",
        scheme = scheme,
        rate = country.benefit_rate,
        charity = charity.name,
        to_charity = to_charity,
        currency = country.currency,
    )
}
