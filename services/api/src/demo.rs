use crate::infra::build_engine;
use chrono::{Duration, Utc};
use clap::Args;
use donation_swap::config::SwapSettings;
use donation_swap::error::AppError;
use donation_swap::swap::service::{CreateOfferRequest, ExpirationDate};
use donation_swap::swap::sweep::SweepConfig;
use donation_swap::swap::{Offer, RecordingMailer, SwapError, SwapService};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Skip the decline-and-rematch portion of the demo
    #[arg(long)]
    pub(crate) skip_decline: bool,
    /// Skip the lifecycle sweep portion of the demo
    #[arg(long)]
    pub(crate) skip_sweep: bool,
}

fn demo_settings() -> SwapSettings {
    SwapSettings {
        reference_currency: "NZD".into(),
        contact_recipients: Vec::new(),
        unapproved_match_hours: None,
        delete_after_feedback_days: None,
        admin_session: None,
    }
}

fn offer_request(
    name: &str,
    country: u32,
    amount: i64,
    min_amount: i64,
    charity: u32,
    email: &str,
) -> CreateOfferRequest {
    let expires = Utc::now() + Duration::days(60);
    CreateOfferRequest {
        captcha_response: None,
        name: name.into(),
        country,
        amount,
        min_amount,
        charity,
        email: email.into(),
        expiration: ExpirationDate {
            year: chrono::Datelike::year(&expires),
            month: chrono::Datelike::month(&expires),
            day: chrono::Datelike::day(&expires),
        },
    }
}

fn create_offer(engine: &SwapService, request: CreateOfferRequest) -> Result<Offer, AppError> {
    engine.create_offer(request, "demo")?.ok_or_else(|| {
        AppError::Engine(SwapError::InvalidArguments(
            "the demo engine must run in automation mode".into(),
        ))
    })
}

fn create_confirmed(
    engine: &SwapService,
    request: CreateOfferRequest,
) -> Result<Offer, AppError> {
    let offer = create_offer(engine, request)?;
    engine.confirm_offer(&offer.secret)?;
    Ok(offer)
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let mailer = RecordingMailer::default();
    let settings = demo_settings();
    let engine = build_engine(&settings, std::sync::Arc::new(mailer.clone()), true);

    println!("Donation swap demo");

    let info = engine.reference_info("demo")?;
    println!(
        "- Reference data: {} countries, {} charities",
        info.countries.len(),
        info.charities.len()
    );

    // A Kiwi donor backing AMF (deductible in the UK, not at home) and a
    // UK donor backing Helen Keller (deductible in NZ, not at home).
    let nz_offer = create_confirmed(
        &engine,
        offer_request("Aroha", 1, 250, 20, 1, "aroha@example.org"),
    )?;
    let uk_offer = create_confirmed(
        &engine,
        offer_request("Bertie", 2, 100, 10, 3, "bertie@example.org"),
    )?;
    println!(
        "- Confirmed offers: {} (NZD 250 to AMF) and {} (GBP 100 to Helen Keller)",
        nz_offer.id.0, uk_offer.id.0
    );

    let scores = engine.match_scores(nz_offer.id.0)?;
    for score in &scores {
        println!(
            "  - vs offer {}: score {:.4} ({})",
            score.offer_id, score.score, score.reason
        );
    }

    let record = engine.create_match(nz_offer.id.0, uk_offer.id.0)?;
    let nz_token = format!("{}{}", nz_offer.secret, record.secret);
    let uk_token = format!("{}{}", uk_offer.secret, record.secret);

    let view = engine.get_match(&nz_token)?;
    println!(
        "- Proposal for {}: donate {} {} to {} while the partner in {} covers {}",
        nz_offer.name,
        view.my_amount,
        view.my_currency,
        view.their_charity,
        view.their_country,
        view.my_charity,
    );

    engine.approve_match(&nz_token)?;
    engine.approve_match(&uk_token)?;
    let deal_emails = mailer.sent_to("aroha@example.org");
    if let Some(deal) = deal_emails.last() {
        println!("- Deal email:\n{}", indent(&deal.text));
    }

    if !args.skip_decline {
        println!("\nDecline scenario");
        let nz_offer = create_confirmed(
            &engine,
            offer_request("Carol", 1, 80, 10, 2, "carol@example.org"),
        )?;
        let de_offer = create_confirmed(
            &engine,
            offer_request("Dana", 3, 40, 5, 4, "dana@example.org"),
        )?;
        let record = engine.create_match(nz_offer.id.0, de_offer.id.0)?;
        let token = format!("{}{}", de_offer.secret, record.secret);
        engine.decline_match(&token, "amounts too far apart")?;
        println!("- {} declined; the pair is remembered:", de_offer.name);
        engine.confirm_offer(&de_offer.secret)?;
        for score in engine.match_scores(nz_offer.id.0)? {
            println!(
                "  - vs offer {}: score {:.4} ({})",
                score.offer_id, score.score, score.reason
            );
        }
    }

    if !args.skip_sweep {
        println!("\nLifecycle sweep (25 hours later)");
        create_offer(
            &engine,
            offer_request("Evan", 2, 60, 10, 1, "evan@example.org"),
        )?;
        let report = engine.run_sweep(&SweepConfig::default(), Utc::now() + Duration::hours(25))?;
        println!(
            "- Sweep removed {} unconfirmed and {} expired offers",
            report.unconfirmed_deleted, report.expired_deleted
        );
    }

    println!("\nOutbound emails sent during the demo: {}", mailer.sent().len());
    Ok(())
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
