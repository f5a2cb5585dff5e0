use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use donation_swap::config::SwapSettings;
use donation_swap::swap::domain::TaxDeduction;
use donation_swap::swap::{
    AdminUser, AllowAllCaptcha, Charity, CharityId, CommandRegistry, Country, CountryId,
    InMemoryAdmins, InMemoryEventLog, InMemoryMatches, InMemoryOffers, MailSender, RateTable,
    StaticReference, SwapService, UnknownGeoIp,
};
use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) engine: Arc<SwapService>,
    pub(crate) admins: Arc<InMemoryAdmins>,
    pub(crate) engine_commands: Arc<CommandRegistry>,
    pub(crate) admin_commands: Arc<CommandRegistry>,
}

/// Reference data for deployments without an external source: the supported
/// countries, a set of well-evaluated charities, and where each is
/// tax-deductible.
pub(crate) fn seeded_reference() -> StaticReference {
    let countries = vec![
        Country {
            id: CountryId(1),
            name: "New Zealand".into(),
            iso: "NZ".into(),
            currency: "NZD".into(),
            min_donation_amount: 5,
            min_donation_currency: "NZD".into(),
            benefit_rate: 0.0,
        },
        Country {
            id: CountryId(2),
            name: "United Kingdom".into(),
            iso: "GB".into(),
            currency: "GBP".into(),
            min_donation_amount: 5,
            min_donation_currency: "NZD".into(),
            benefit_rate: 25.0,
        },
        Country {
            id: CountryId(3),
            name: "Germany".into(),
            iso: "DE".into(),
            currency: "EUR".into(),
            min_donation_amount: 5,
            min_donation_currency: "NZD".into(),
            benefit_rate: 0.0,
        },
        Country {
            id: CountryId(4),
            name: "Ireland".into(),
            iso: "IE".into(),
            currency: "EUR".into(),
            min_donation_amount: 250,
            min_donation_currency: "EUR".into(),
            benefit_rate: 31.0,
        },
    ];
    let charities = vec![
        Charity {
            id: CharityId(1),
            name: "Against Malaria Foundation".into(),
        },
        Charity {
            id: CharityId(2),
            name: "GiveDirectly".into(),
        },
        Charity {
            id: CharityId(3),
            name: "Helen Keller International".into(),
        },
        Charity {
            id: CharityId(4),
            name: "Malaria Consortium".into(),
        },
    ];
    let deductions = vec![
        TaxDeduction {
            charity_id: CharityId(1),
            country_id: CountryId(2),
            instructions: Some(
                "Donate through the AMF UK page and tick the Gift Aid box.".into(),
            ),
        },
        TaxDeduction {
            charity_id: CharityId(1),
            country_id: CountryId(3),
            instructions: Some("Donate via the AMF page of Effektiv Spenden.".into()),
        },
        TaxDeduction {
            charity_id: CharityId(1),
            country_id: CountryId(4),
            instructions: None,
        },
        TaxDeduction {
            charity_id: CharityId(2),
            country_id: CountryId(2),
            instructions: Some("Use the GiveDirectly UK giving page.".into()),
        },
        TaxDeduction {
            charity_id: CharityId(2),
            country_id: CountryId(3),
            instructions: None,
        },
        TaxDeduction {
            charity_id: CharityId(3),
            country_id: CountryId(1),
            instructions: Some(
                "Donate through the Helen Keller page of Effective Altruism NZ.".into(),
            ),
        },
        TaxDeduction {
            charity_id: CharityId(4),
            country_id: CountryId(1),
            instructions: Some(
                "Donate through the Malaria Consortium page of Effective Altruism NZ.".into(),
            ),
        },
        TaxDeduction {
            charity_id: CharityId(4),
            country_id: CountryId(2),
            instructions: None,
        },
    ];
    StaticReference::new(countries, charities, deductions)
}

/// Fixed rates against the euro; a live deployment would refresh these
/// from a rate feed.
pub(crate) fn seeded_rates() -> RateTable {
    RateTable::new("EUR")
        .with_rate("GBP", 0.85)
        .with_rate("NZD", 1.8)
}

pub(crate) fn build_engine(
    settings: &SwapSettings,
    mailer: Arc<dyn MailSender>,
    automation_mode: bool,
) -> SwapService {
    let mut engine_config = settings.engine_config();
    engine_config.automation_mode = automation_mode;
    SwapService::new(
        Arc::new(seeded_reference()),
        Arc::new(InMemoryOffers::default()),
        Arc::new(InMemoryMatches::default()),
        Arc::new(seeded_rates()),
        mailer,
        Arc::new(InMemoryEventLog::default()),
        Arc::new(AllowAllCaptcha),
        Arc::new(UnknownGeoIp),
        engine_config,
    )
}

pub(crate) fn build_admins(settings: &SwapSettings) -> InMemoryAdmins {
    let admins = InMemoryAdmins::default();
    if let Some(session) = &settings.admin_session {
        admins.grant(
            session.clone(),
            AdminUser {
                id: 1,
                email: "operator@donationswap.local".into(),
            },
        );
    }
    admins
}
