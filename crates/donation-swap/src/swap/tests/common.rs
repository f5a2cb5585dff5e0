use std::sync::Arc;

use chrono::{Datelike, Duration, Utc};

use crate::swap::currency::RateTable;
use crate::swap::domain::{Charity, CharityId, Country, CountryId, Offer, TaxDeduction};
use crate::swap::eventlog::InMemoryEventLog;
use crate::swap::mail::RecordingMailer;
use crate::swap::repository::{InMemoryMatches, InMemoryOffers, StaticReference};
use crate::swap::service::{
    AllowAllCaptcha, CreateOfferRequest, ExpirationDate, SwapConfig, SwapService, UnknownGeoIp,
};

pub(super) struct Harness {
    pub(super) service: SwapService,
    pub(super) mailer: RecordingMailer,
    pub(super) events: InMemoryEventLog,
    pub(super) offers: InMemoryOffers,
    pub(super) matches: InMemoryMatches,
}

/// One euro buys two New Zealand dollars and one pound; the UK tops
/// donations up by 25% through Gift Aid.
pub(super) fn reference() -> StaticReference {
    StaticReference::new(
        vec![
            Country {
                id: CountryId(1),
                name: "New Zealand".into(),
                iso: "NZ".into(),
                currency: "NZD".into(),
                min_donation_amount: 1,
                min_donation_currency: "NZD".into(),
                benefit_rate: 0.0,
            },
            Country {
                id: CountryId(2),
                name: "United Kingdom".into(),
                iso: "GB".into(),
                currency: "GBP".into(),
                min_donation_amount: 1,
                min_donation_currency: "NZD".into(),
                benefit_rate: 25.0,
            },
            Country {
                id: CountryId(3),
                name: "Germany".into(),
                iso: "DE".into(),
                currency: "EUR".into(),
                min_donation_amount: 1,
                min_donation_currency: "NZD".into(),
                benefit_rate: 0.0,
            },
        ],
        vec![
            Charity {
                id: CharityId(1),
                name: "Against Malaria Foundation".into(),
            },
            Charity {
                id: CharityId(2),
                name: "Helen Keller International".into(),
            },
        ],
        vec![
            TaxDeduction {
                charity_id: CharityId(1),
                country_id: CountryId(2),
                instructions: Some("Donate through the AMF UK portal.".into()),
            },
            TaxDeduction {
                charity_id: CharityId(1),
                country_id: CountryId(3),
                instructions: None,
            },
            TaxDeduction {
                charity_id: CharityId(2),
                country_id: CountryId(1),
                instructions: Some("Donate through the Helen Keller NZ page.".into()),
            },
        ],
    )
}

pub(super) fn harness() -> Harness {
    let mailer = RecordingMailer::default();
    let events = InMemoryEventLog::default();
    let offers = InMemoryOffers::default();
    let matches = InMemoryMatches::default();
    let service = SwapService::new(
        Arc::new(reference()),
        Arc::new(offers.clone()),
        Arc::new(matches.clone()),
        Arc::new(RateTable::new("EUR").with_rate("NZD", 2.0).with_rate("GBP", 1.0)),
        Arc::new(mailer.clone()),
        Arc::new(events.clone()),
        Arc::new(AllowAllCaptcha),
        Arc::new(UnknownGeoIp),
        SwapConfig {
            reference_currency: "NZD".into(),
            contact_recipients: Vec::new(),
            automation_mode: true,
        },
    );
    Harness {
        service,
        mailer,
        events,
        offers,
        matches,
    }
}

pub(super) fn offer_request(
    name: &str,
    country: u32,
    amount: i64,
    min_amount: i64,
    charity: u32,
    email: &str,
) -> CreateOfferRequest {
    offer_request_expiring(name, country, amount, min_amount, charity, email, 45)
}

pub(super) fn offer_request_expiring(
    name: &str,
    country: u32,
    amount: i64,
    min_amount: i64,
    charity: u32,
    email: &str,
    expires_in_days: i64,
) -> CreateOfferRequest {
    let expires = Utc::now() + Duration::days(expires_in_days);
    CreateOfferRequest {
        captcha_response: None,
        name: name.into(),
        country,
        amount,
        min_amount,
        charity,
        email: email.into(),
        expiration: ExpirationDate {
            year: expires.year(),
            month: expires.month(),
            day: expires.day(),
        },
    }
}

pub(super) fn create_offer(harness: &Harness, request: CreateOfferRequest) -> Offer {
    harness
        .service
        .create_offer(request, "test")
        .expect("offer creation succeeds")
        .expect("automation mode returns the offer")
}

pub(super) fn create_confirmed(harness: &Harness, request: CreateOfferRequest) -> Offer {
    let offer = create_offer(harness, request);
    harness
        .service
        .confirm_offer(&offer.secret)
        .expect("confirmation succeeds");
    offer
}
