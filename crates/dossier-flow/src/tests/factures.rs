use chrono::{Duration, Utc};

use super::common::*;
use crate::domain::{
    DocumentKind, FactureError, FactureStatus, HistoriqueAction, MAX_AMOUNT_HT_CENTS,
    MAX_PAYMENT_TERM_DAYS,
};
use crate::services::{IssueFacture, ServiceError, DEFAULT_PAYMENT_TERM_DAYS};
use crate::workflow::{DossierStatus, EmailTemplate, WorkflowError};

fn request(amount_ht_cents: i64) -> IssueFacture {
    IssueFacture {
        amount_ht_cents,
        vat_rate_bp: 2_000,
        due_in_days: None,
    }
}

fn bilan_in_phase3(fixture: &Fixture) -> crate::domain::Dossier {
    let dossier = fixture.bilan();
    for to in [DossierStatus::Phase1, DossierStatus::Phase2, DossierStatus::Phase3] {
        fixture
            .services
            .dossiers
            .transition(dossier.id, to, None, &fixture.consultant, Utc::now())
            .expect("phase reached");
    }
    dossier
}

#[test]
fn issuing_closes_the_dossier_with_one_history_entry() {
    let fixture = fixture();
    let dossier = bilan_in_phase3(&fixture);
    let before = fixture
        .services
        .dossiers
        .history(dossier.id, &fixture.admin)
        .expect("history")
        .len();

    let now = Utc::now();
    let outcome = fixture
        .services
        .factures
        .issue(dossier.id, request(150_000), &fixture.admin, now)
        .expect("facture issued");

    assert_eq!(outcome.dossier.status, DossierStatus::Facture);
    assert_eq!(outcome.facture.status, FactureStatus::Emise);
    assert_eq!(outcome.facture.number.sequence, 1);
    assert_eq!(outcome.facture.amount_ttc_cents(), 180_000);
    assert_eq!(
        outcome.facture.due_date,
        now.date_naive() + Duration::days(i64::from(DEFAULT_PAYMENT_TERM_DAYS))
    );

    let history = fixture
        .services
        .dossiers
        .history(dossier.id, &fixture.admin)
        .expect("history");
    let added: Vec<_> = history[before..].iter().collect();
    let status_changes: Vec<_> = added
        .iter()
        .filter(|entry| entry.action == HistoriqueAction::StatusChange)
        .collect();
    assert_eq!(status_changes.len(), 1);
    let number = outcome.facture.number.to_string();
    assert_eq!(
        status_changes[0].comment.as_deref(),
        Some(format!("Facture {number} émise").as_str())
    );

    assert_eq!(outcome.effects.documents.len(), 1);
    assert_eq!(outcome.effects.documents[0].kind, DocumentKind::Facture);
    assert_eq!(outcome.effects.emails.len(), 1);
    assert_eq!(
        outcome.effects.emails[0].template,
        EmailTemplate::FactureEmise.as_str()
    );
    assert!(outcome.effects.emails[0].body.contains("1800,00 €"));
}

#[test]
fn generic_transition_cannot_close_a_dossier_without_invoice() {
    let fixture = fixture();
    let dossier = bilan_in_phase3(&fixture);
    let history_before = fixture
        .services
        .dossiers
        .history(dossier.id, &fixture.admin)
        .expect("history")
        .len();
    let mails_before = fixture.mailer.sent().len();

    for actor in [&fixture.consultant, &fixture.admin] {
        match fixture.services.dossiers.transition(
            dossier.id,
            DossierStatus::Facture,
            None,
            actor,
            Utc::now(),
        ) {
            Err(ServiceError::Workflow(WorkflowError::InvoiceRequired(DossierStatus::Facture))) => {}
            other => panic!("closing needs an invoice, got {other:?}"),
        }
    }

    let stored = fixture
        .services
        .dossiers
        .get(dossier.id, &fixture.admin)
        .expect("dossier");
    assert_eq!(stored.status, DossierStatus::Phase3);
    assert!(fixture
        .services
        .factures
        .list(dossier.id, &fixture.admin)
        .expect("list")
        .is_empty());
    assert_eq!(
        fixture
            .services
            .dossiers
            .history(dossier.id, &fixture.admin)
            .expect("history")
            .len(),
        history_before
    );
    assert_eq!(fixture.mailer.sent().len(), mails_before);
}

#[test]
fn out_of_range_terms_and_amounts_are_refused_before_numbering() {
    let fixture = fixture();
    let dossier = bilan_in_phase3(&fixture);

    match fixture.services.factures.issue(
        dossier.id,
        IssueFacture {
            due_in_days: Some(u32::MAX),
            ..request(100_000)
        },
        &fixture.admin,
        Utc::now(),
    ) {
        Err(ServiceError::Facture(FactureError::PaymentTermTooLong(u32::MAX))) => {}
        other => panic!("expected the term to be refused, got {other:?}"),
    }
    match fixture.services.factures.issue(
        dossier.id,
        request(i64::MAX / 100),
        &fixture.admin,
        Utc::now(),
    ) {
        Err(ServiceError::Facture(FactureError::AmountTooLarge(_))) => {}
        other => panic!("expected the amount to be refused, got {other:?}"),
    }

    let stored = fixture
        .services
        .dossiers
        .get(dossier.id, &fixture.admin)
        .expect("dossier");
    assert_eq!(stored.status, DossierStatus::Phase3);
    assert!(fixture
        .services
        .factures
        .list(dossier.id, &fixture.admin)
        .expect("list")
        .is_empty());

    let now = Utc::now();
    let issued = fixture
        .services
        .factures
        .issue(
            dossier.id,
            IssueFacture {
                due_in_days: Some(MAX_PAYMENT_TERM_DAYS),
                ..request(MAX_AMOUNT_HT_CENTS)
            },
            &fixture.admin,
            now,
        )
        .expect("bounds are inclusive");
    assert_eq!(issued.facture.number.sequence, 1);
    assert_eq!(
        issued.facture.due_date,
        now.date_naive() + Duration::days(i64::from(MAX_PAYMENT_TERM_DAYS))
    );
    assert_eq!(issued.facture.amount_ttc_cents(), 1_200_000_000);
    assert_eq!(issued.effects.emails.len(), 1);
}

#[test]
fn numbers_are_sequential_and_not_consumed_by_rejections() {
    let fixture = fixture();
    let early = fixture.bilan();

    match fixture
        .services
        .factures
        .issue(early.id, request(90_000), &fixture.admin, Utc::now())
    {
        Err(ServiceError::Workflow(WorkflowError::NotAllowed { .. })) => {}
        other => panic!("dossier is not ready for invoicing, got {other:?}"),
    }
    assert!(fixture
        .services
        .factures
        .list(early.id, &fixture.admin)
        .expect("list")
        .is_empty());

    let first = bilan_in_phase3(&fixture);
    let second = bilan_in_phase3(&fixture);
    let a = fixture
        .services
        .factures
        .issue(first.id, request(90_000), &fixture.admin, Utc::now())
        .expect("first");
    let b = fixture
        .services
        .factures
        .issue(second.id, request(120_000), &fixture.admin, Utc::now())
        .expect("second");

    assert_eq!(a.facture.number.sequence, 1);
    assert_eq!(b.facture.number.sequence, 2);
}

#[test]
fn invalid_amounts_and_roles_are_refused() {
    let fixture = fixture();
    let dossier = bilan_in_phase3(&fixture);

    assert!(matches!(
        fixture
            .services
            .factures
            .issue(dossier.id, request(0), &fixture.admin, Utc::now()),
        Err(ServiceError::Facture(FactureError::NonPositiveAmount))
    ));
    assert!(matches!(
        fixture.services.factures.issue(
            dossier.id,
            IssueFacture {
                vat_rate_bp: 12_000,
                ..request(10_000)
            },
            &fixture.admin,
            Utc::now()
        ),
        Err(ServiceError::Facture(FactureError::InvalidVatRate(12_000)))
    ));
    assert!(matches!(
        fixture
            .services
            .factures
            .issue(dossier.id, request(10_000), &fixture.consultant, Utc::now()),
        Err(ServiceError::Forbidden(_))
    ));

    let stored = fixture
        .services
        .dossiers
        .get(dossier.id, &fixture.admin)
        .expect("dossier");
    assert_eq!(stored.status, DossierStatus::Phase3);
}

#[test]
fn paid_invoices_cannot_be_cancelled() {
    let fixture = fixture();
    let dossier = bilan_in_phase3(&fixture);
    let issued = fixture
        .services
        .factures
        .issue(dossier.id, request(50_000), &fixture.admin, Utc::now())
        .expect("issued");

    let paid = fixture
        .services
        .factures
        .mark_paid(issued.facture.id, &fixture.admin, Utc::now())
        .expect("paid");
    assert_eq!(paid.status, FactureStatus::Payee);
    assert!(paid.paid_at.is_some());

    match fixture
        .services
        .factures
        .cancel(issued.facture.id, &fixture.admin, Utc::now())
    {
        Err(ServiceError::Facture(FactureError::NotOutstanding(FactureStatus::Payee))) => {}
        other => panic!("expected paid invoice to stay paid, got {other:?}"),
    }

    let history = fixture
        .services
        .dossiers
        .history(dossier.id, &fixture.admin)
        .expect("history");
    let updates: Vec<_> = history
        .iter()
        .filter(|entry| entry.action == HistoriqueAction::FactureUpdate)
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].old_value.as_deref(), Some("emise"));
    assert_eq!(updates[0].new_value.as_deref(), Some("payee"));

    let listed = fixture
        .services
        .factures
        .list(dossier.id, &fixture.rh)
        .expect("rh sees invoices of its company");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, FactureStatus::Payee);
}
