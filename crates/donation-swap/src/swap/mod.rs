//! The donation-swap engine: two donors whose chosen charities are not
//! tax-deductible at home each give to the other's charity instead, so both
//! gifts become deductible and the charities come out even.
//!
//! The module tree mirrors the moving parts: a currency seam and value
//! normalizer, the compatibility scorer, the equalization math, the
//! secret-token negotiation protocol in [`service`], the time-driven
//! lifecycle [`sweep`], and the command [`dispatch`] registry that fronts
//! all of it.

pub mod currency;
pub mod dispatch;
pub mod domain;
pub mod equalize;
pub mod eventlog;
pub mod mail;
pub mod repository;
pub mod scoring;
pub mod secret;
pub mod service;
pub mod sweep;

#[cfg(test)]
mod tests;

pub use currency::{CurrencyConverter, RateTable};
pub use dispatch::{CommandContext, CommandRegistry};
pub use domain::{Charity, CharityId, Country, CountryId, Match, MatchId, MatchSide, Offer, OfferId};
pub use eventlog::{EventKind, EventLog, InMemoryEventLog};
pub use mail::{MailSender, OutboundEmail, RecordingMailer, TracingMailer};
pub use repository::{
    AdminUser, InMemoryAdmins, InMemoryMatches, InMemoryOffers, StaticReference, StoreError,
};
pub use service::{
    AllowAllCaptcha, CaptchaVerifier, CreateOfferRequest, GeoIpResolver, SwapConfig, SwapError,
    SwapService, UnknownGeoIp,
};
pub use sweep::{SweepConfig, SweepReport};
