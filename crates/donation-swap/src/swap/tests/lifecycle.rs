//! Time-driven lifecycle sweep behavior.

use chrono::{Duration, Utc};

use super::common::{create_confirmed, create_offer, harness, offer_request, offer_request_expiring};
use crate::swap::eventlog::EventKind;
use crate::swap::repository::{MatchRepository, OfferRepository};
use crate::swap::service::{SUBJECT_FEEDBACK, SUBJECT_OFFER_EXPIRED, SUBJECT_OFFER_LAPSED};
use crate::swap::sweep::SweepConfig;

#[test]
fn unconfirmed_offers_lapse_after_a_day() {
    let h = harness();
    let offer = create_offer(&h, offer_request("Aroha", 1, 42, 1, 1, "aroha@example.org"));

    let report = h
        .service
        .run_sweep(&SweepConfig::default(), Utc::now() + Duration::hours(23))
        .expect("sweep");
    assert_eq!(report.unconfirmed_deleted, 0);
    assert!(h.offers.by_id(offer.id).expect("lookup").is_some());

    let report = h
        .service
        .run_sweep(&SweepConfig::default(), Utc::now() + Duration::hours(25))
        .expect("sweep");
    assert_eq!(report.unconfirmed_deleted, 1);
    assert!(h.offers.by_id(offer.id).expect("lookup").is_none());

    let sent = h.mailer.sent_to("aroha@example.org");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, SUBJECT_OFFER_LAPSED);
    assert_eq!(h.events.count_of(EventKind::OfferUnconfirmed), 1);
}

#[test]
fn expired_unmatched_offers_are_removed_with_a_renewal_hint() {
    let h = harness();
    let offer = create_confirmed(
        &h,
        offer_request_expiring("Aroha", 1, 42, 1, 1, "aroha@example.org", 1),
    );

    let report = h
        .service
        .run_sweep(&SweepConfig::default(), Utc::now() + Duration::days(2))
        .expect("sweep");
    assert_eq!(report.expired_deleted, 1);
    assert!(h.offers.by_id(offer.id).expect("lookup").is_none());

    let sent = h.mailer.sent_to("aroha@example.org");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, SUBJECT_OFFER_EXPIRED);
    assert!(sent[0].text.contains("consider an expiration"));
    assert_eq!(h.events.count_of(EventKind::OfferExpired), 1);
}

#[test]
fn matched_offers_survive_their_expiration() {
    let h = harness();
    let nz = create_confirmed(
        &h,
        offer_request_expiring("Aroha", 1, 42, 1, 1, "aroha@example.org", 1),
    );
    let uk = create_confirmed(&h, offer_request("Bertie", 2, 27, 1, 2, "bertie@example.org"));
    h.service.create_match(nz.id.0, uk.id.0).expect("match");

    let report = h
        .service
        .run_sweep(&SweepConfig::default(), Utc::now() + Duration::days(2))
        .expect("sweep");
    assert_eq!(report.expired_deleted, 0);
    assert!(h.offers.by_id(nz.id).expect("lookup").is_some());
}

#[test]
fn unapproved_matches_are_kept_unless_the_pass_is_enabled() {
    let h = harness();
    let nz = create_confirmed(&h, offer_request("Aroha", 1, 42, 1, 1, "aroha@example.org"));
    let uk = create_confirmed(&h, offer_request("Bertie", 2, 27, 1, 2, "bertie@example.org"));
    let record = h.service.create_match(nz.id.0, uk.id.0).expect("match");

    // Disabled by default: the proposal stays open indefinitely.
    let report = h
        .service
        .run_sweep(&SweepConfig::default(), Utc::now() + Duration::days(30))
        .expect("sweep");
    assert_eq!(report.unapproved_dissolved, 0);
    assert!(h.matches.by_id(record.id).expect("lookup").is_some());

    let config = SweepConfig {
        unapproved_match_after: Some(Duration::hours(48)),
        ..SweepConfig::default()
    };
    let report = h
        .service
        .run_sweep(&config, Utc::now() + Duration::days(3))
        .expect("sweep");
    assert_eq!(report.unapproved_dissolved, 1);
    assert!(h.matches.by_id(record.id).expect("lookup").is_none());
    // Both parties are told and both offers stay in the pool.
    assert!(!h.mailer.sent_to("aroha@example.org").is_empty());
    assert!(!h.mailer.sent_to("bertie@example.org").is_empty());
    assert!(h.offers.by_id(nz.id).expect("lookup").is_some());
    // A timeout is not a decline: the same pair can be proposed again.
    assert!(!h
        .matches
        .is_declined(nz.id, uk.id)
        .expect("declined lookup"));
    h.service.create_match(nz.id.0, uk.id.0).expect("re-proposal");
}

#[test]
fn feedback_is_requested_once_a_month_after_the_deal() {
    let h = harness();
    let nz = create_confirmed(&h, offer_request("Aroha", 1, 42, 1, 1, "aroha@example.org"));
    let uk = create_confirmed(&h, offer_request("Bertie", 2, 27, 1, 2, "bertie@example.org"));
    let record = h.service.create_match(nz.id.0, uk.id.0).expect("match");
    let nz_token = format!("{}{}", nz.secret, record.secret);
    let uk_token = format!("{}{}", uk.secret, record.secret);
    h.service.approve_match(&nz_token).expect("approval");
    h.service.approve_match(&uk_token).expect("approval");

    let report = h
        .service
        .run_sweep(&SweepConfig::default(), Utc::now() + Duration::days(30))
        .expect("sweep");
    assert_eq!(report.feedback_requested, 0);

    let now = Utc::now() + Duration::days(32);
    let report = h.service.run_sweep(&SweepConfig::default(), now).expect("sweep");
    assert_eq!(report.feedback_requested, 1);
    let feedback: Vec<_> = h
        .mailer
        .sent()
        .into_iter()
        .filter(|email| email.subject == SUBJECT_FEEDBACK)
        .collect();
    assert_eq!(feedback.len(), 1);
    assert_eq!(h.events.count_of(EventKind::MatchFeedback), 1);

    // A later sweep does not ask again.
    let report = h
        .service
        .run_sweep(&SweepConfig::default(), now + Duration::days(1))
        .expect("sweep");
    assert_eq!(report.feedback_requested, 0);
    assert_eq!(h.events.count_of(EventKind::MatchFeedback), 1);
}

#[test]
fn completed_matches_are_purged_only_when_configured() {
    let h = harness();
    let nz = create_confirmed(
        &h,
        offer_request_expiring("Aroha", 1, 42, 1, 1, "aroha@example.org", 90),
    );
    let uk = create_confirmed(
        &h,
        offer_request_expiring("Bertie", 2, 27, 1, 2, "bertie@example.org", 90),
    );
    let record = h.service.create_match(nz.id.0, uk.id.0).expect("match");
    let nz_token = format!("{}{}", nz.secret, record.secret);
    let uk_token = format!("{}{}", uk.secret, record.secret);
    h.service.approve_match(&nz_token).expect("approval");
    h.service.approve_match(&uk_token).expect("approval");

    h.service
        .run_sweep(&SweepConfig::default(), Utc::now() + Duration::days(32))
        .expect("sweep marks feedback");

    // Default: records are kept after the feedback request.
    let report = h
        .service
        .run_sweep(&SweepConfig::default(), Utc::now() + Duration::days(60))
        .expect("sweep");
    assert_eq!(report.purged, 0);
    assert!(h.matches.by_id(record.id).expect("lookup").is_some());

    let config = SweepConfig {
        delete_after_feedback: Some(Duration::days(7)),
        ..SweepConfig::default()
    };
    let report = h
        .service
        .run_sweep(&config, Utc::now() + Duration::days(60))
        .expect("sweep");
    assert_eq!(report.purged, 1);
    assert!(h.matches.by_id(record.id).expect("lookup").is_none());
    assert!(h.offers.by_id(nz.id).expect("lookup").is_none());
    assert!(h.offers.by_id(uk.id).expect("lookup").is_none());
    // The log keeps the only record of the purged offers.
    assert_eq!(h.events.count_of(EventKind::OfferDeleted), 2);
}
