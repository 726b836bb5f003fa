use chrono::Utc;

use super::common::*;
use crate::domain::{
    DocumentKind, DossierError, EmailStatus, EntrepriseId, HistoriqueAction, Role, UserId,
};
use crate::auth::Actor;
use crate::repository::{DossierFilter, DossierRepository, RepositoryError};
use crate::services::{NewDossier, ServiceError, UploadRequest, CSV_HEADERS};
use crate::workflow::{DossierKind, DossierStatus, EmailTemplate, WorkflowError};

#[test]
fn creation_assigns_reference_and_logs_created_entry() {
    let fixture = fixture();
    let first = fixture.bilan();
    let second = fixture.formation();

    let year = Utc::now().format("%Y").to_string();
    assert_eq!(first.reference, format!("DOS-{year}-00001"));
    assert_eq!(second.reference, format!("DOS-{year}-00002"));
    assert_eq!(first.status, DossierStatus::Nouveau);
    assert_eq!(second.status, DossierStatus::Brouillon);

    let history = fixture
        .services
        .dossiers
        .history(first.id, &fixture.admin)
        .expect("history readable");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, HistoriqueAction::Created);
    assert_eq!(history[0].new_value.as_deref(), Some("nouveau"));
}

#[test]
fn each_transition_appends_exactly_one_entry() {
    let fixture = fixture();
    let dossier = fixture.formation();
    let dossiers = &fixture.services.dossiers;

    let steps = [
        (DossierStatus::EnAttenteValidation, fixture.rh),
        (DossierStatus::Valide, fixture.admin),
        (DossierStatus::EnvoyeOpco, fixture.admin),
        (DossierStatus::Accepte, fixture.admin),
    ];
    for (index, (to, actor)) in steps.into_iter().enumerate() {
        dossiers
            .transition(dossier.id, to, None, &actor, Utc::now())
            .expect("transition allowed");
        let history = dossiers.history(dossier.id, &fixture.admin).expect("history");
        let changes: Vec<_> = history
            .iter()
            .filter(|entry| entry.action == HistoriqueAction::StatusChange)
            .collect();
        assert_eq!(changes.len(), index + 1);
        assert_eq!(changes[index].new_value.as_deref(), Some(to.as_str()));
    }
}

#[test]
fn rejected_transitions_leave_no_trace() {
    let fixture = fixture();
    let dossier = fixture.formation();
    let dossiers = &fixture.services.dossiers;

    match dossiers.transition(
        dossier.id,
        DossierStatus::EnAttenteValidation,
        None,
        &fixture.consultant,
        Utc::now(),
    ) {
        Err(ServiceError::Forbidden(_)) => {}
        other => panic!("consultant is not assigned to this dossier, got {other:?}"),
    }

    match dossiers.transition(
        dossier.id,
        DossierStatus::Accepte,
        None,
        &fixture.admin,
        Utc::now(),
    ) {
        Err(ServiceError::Workflow(WorkflowError::NotAllowed { .. })) => {}
        other => panic!("expected illegal move, got {other:?}"),
    }

    dossiers
        .transition(dossier.id, DossierStatus::EnAttenteValidation, None, &fixture.rh, Utc::now())
        .expect("rh submits");
    match dossiers.transition(dossier.id, DossierStatus::Brouillon, Some("  ".to_string()), &fixture.admin, Utc::now()) {
        Err(ServiceError::Workflow(WorkflowError::CommentRequired { .. })) => {}
        other => panic!("backward move needs a comment, got {other:?}"),
    }

    let history = dossiers.history(dossier.id, &fixture.admin).expect("history");
    assert_eq!(history.len(), 2);
    let stored = dossiers.get(dossier.id, &fixture.admin).expect("dossier");
    assert_eq!(stored.status, DossierStatus::EnAttenteValidation);
}

#[test]
fn sending_back_for_rework_keeps_the_comment() {
    let fixture = fixture();
    let dossier = fixture.formation();
    let dossiers = &fixture.services.dossiers;

    dossiers
        .transition(dossier.id, DossierStatus::EnAttenteValidation, None, &fixture.rh, Utc::now())
        .expect("submitted");
    dossiers
        .transition(
            dossier.id,
            DossierStatus::Brouillon,
            Some("Convention non signée".to_string()),
            &fixture.admin,
            Utc::now(),
        )
        .expect("sent back");

    let history = dossiers.history(dossier.id, &fixture.admin).expect("history");
    let last = history.last().expect("entry");
    assert_eq!(last.old_value.as_deref(), Some("en_attente_validation"));
    assert_eq!(last.new_value.as_deref(), Some("brouillon"));
    assert_eq!(last.comment.as_deref(), Some("Convention non signée"));
}

#[test]
fn bilan_phases_send_notifications_and_render_synthese() {
    let fixture = fixture();
    let dossier = fixture.bilan();
    let dossiers = &fixture.services.dossiers;

    let phase1 = dossiers
        .transition(dossier.id, DossierStatus::Phase1, None, &fixture.consultant, Utc::now())
        .expect("phase1");
    assert_eq!(phase1.effects.emails.len(), 1);
    assert_eq!(
        phase1.effects.emails[0].template,
        EmailTemplate::ConvocationBeneficiaire.as_str()
    );
    assert_eq!(phase1.effects.emails[0].recipient, "claire.martin@example.fr");

    dossiers
        .transition(dossier.id, DossierStatus::Phase2, None, &fixture.consultant, Utc::now())
        .expect("phase2");
    let phase3 = dossiers
        .transition(dossier.id, DossierStatus::Phase3, None, &fixture.consultant, Utc::now())
        .expect("phase3");

    assert_eq!(phase3.effects.documents.len(), 1);
    let synthese = &phase3.effects.documents[0];
    assert_eq!(synthese.kind, DocumentKind::Synthese);
    assert_eq!(synthese.content_type, "application/pdf");
    assert!(fixture.storage.get(&synthese.storage_key).is_some());

    let sent = fixture.mailer.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].subject.contains(&dossier.reference));
}

#[test]
fn missing_recipient_skips_the_email() {
    let fixture = fixture();
    let dossier = fixture
        .services
        .dossiers
        .create(
            NewDossier {
                kind: DossierKind::BilanCompetences,
                entreprise_id: fixture.entreprise.id,
                beneficiary: beneficiary(None),
                consultant_id: None,
                hours_planned: 10,
                start_date: None,
                end_date: None,
                notes: String::new(),
            },
            &fixture.consultant,
            Utc::now(),
        )
        .expect("created by consultant");
    assert_eq!(dossier.consultant_id, Some(fixture.consultant.user_id));

    let outcome = fixture
        .services
        .dossiers
        .transition(dossier.id, DossierStatus::Phase1, None, &fixture.consultant, Utc::now())
        .expect("phase1");
    assert!(outcome.effects.emails.is_empty());
    assert!(fixture.mailer.sent().is_empty());
}

#[test]
fn mail_outage_does_not_undo_the_transition() {
    let fixture = fixture();
    let dossier = fixture.formation();
    fixture.mailer.set_failing(true);

    let outcome = fixture
        .services
        .dossiers
        .transition(dossier.id, DossierStatus::EnAttenteValidation, None, &fixture.rh, Utc::now())
        .expect("transition persists");
    assert_eq!(outcome.dossier.status, DossierStatus::EnAttenteValidation);
    assert_eq!(outcome.effects.failures.len(), 1);

    let emails = fixture
        .services
        .dossiers
        .emails(dossier.id, &fixture.admin)
        .expect("email log");
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].status, EmailStatus::Failed);
    assert_eq!(emails[0].recipient, "rh@acme.fr");
}

#[test]
fn stale_status_is_rejected_by_the_store() {
    let fixture = fixture();
    let dossier = fixture.bilan();
    fixture
        .services
        .dossiers
        .transition(dossier.id, DossierStatus::Phase1, None, &fixture.consultant, Utc::now())
        .expect("phase1");

    let mut outdated = dossier.clone();
    outdated.status = DossierStatus::Phase1;
    let entry = crate::domain::HistoriqueEntry::new(
        dossier.id,
        fixture.admin.user_id,
        HistoriqueAction::StatusChange,
        Utc::now(),
    );
    match fixture
        .store
        .update_dossier(&outdated, DossierStatus::Nouveau, &entry)
    {
        Err(RepositoryError::Stale) => {}
        other => panic!("expected stale write, got {other:?}"),
    }
    assert_eq!(fixture.store.history(dossier.id).expect("history").len(), 2);
}

#[test]
fn hours_respect_plan_and_bilan_ceiling() {
    let fixture = fixture();
    let dossier = fixture.bilan();
    let dossiers = &fixture.services.dossiers;

    match dossiers.record_hours(dossier.id, Some(30), 0, &fixture.consultant, Utc::now()) {
        Err(ServiceError::Dossier(DossierError::BilanHoursExceeded(30))) => {}
        other => panic!("expected ceiling error, got {other:?}"),
    }
    match dossiers.record_hours(dossier.id, None, 25, &fixture.consultant, Utc::now()) {
        Err(ServiceError::Dossier(DossierError::CompletedExceedsPlanned { .. })) => {}
        other => panic!("expected over-completion error, got {other:?}"),
    }

    let updated = dossiers
        .record_hours(dossier.id, None, 6, &fixture.consultant, Utc::now())
        .expect("hours recorded");
    assert_eq!(updated.hours_completed, 6);
    assert_eq!(updated.hours_remaining(), 18);

    let history = dossiers.history(dossier.id, &fixture.admin).expect("history");
    let last = history.last().expect("entry");
    assert_eq!(last.action, HistoriqueAction::HoursUpdate);
    assert_eq!(last.old_value.as_deref(), Some("0/24h"));
    assert_eq!(last.new_value.as_deref(), Some("6/24h"));
}

#[test]
fn unchanged_notes_write_nothing() {
    let fixture = fixture();
    let dossier = fixture.formation();
    let dossiers = &fixture.services.dossiers;

    dossiers
        .update_notes(dossier.id, "Formation CACES ", &fixture.rh, Utc::now())
        .expect("same notes");
    dossiers
        .update_notes(dossier.id, "Session de juin", &fixture.rh, Utc::now())
        .expect("notes updated");

    let history = dossiers.history(dossier.id, &fixture.admin).expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].action, HistoriqueAction::NoteUpdate);
}

#[test]
fn failed_upload_records_nothing() {
    let fixture = fixture();
    let dossier = fixture.formation();
    let request = UploadRequest {
        dossier_id: dossier.id,
        name: "convention.pdf".to_string(),
        kind: DocumentKind::Convention,
        content_type: None,
        bytes: b"%PDF-1.4 convention".to_vec(),
    };

    fixture.storage.set_failing(true);
    match fixture
        .services
        .documents
        .upload(request.clone(), &fixture.rh, Utc::now())
    {
        Err(ServiceError::Gateway(_)) => {}
        other => panic!("expected storage failure, got {other:?}"),
    }
    let listed = fixture
        .services
        .documents
        .list(dossier.id, &fixture.rh)
        .expect("list");
    assert!(listed.is_empty());

    fixture.storage.set_failing(false);
    let document = fixture
        .services
        .documents
        .upload(request, &fixture.rh, Utc::now())
        .expect("uploaded");
    assert_eq!(document.content_type, "application/pdf");
    assert_eq!(document.size_bytes, 19);

    let history = fixture
        .services
        .dossiers
        .history(dossier.id, &fixture.admin)
        .expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].action, HistoriqueAction::DocumentAdded);
}

#[test]
fn oversized_uploads_are_refused() {
    let fixture = fixture();
    let dossier = fixture.formation();
    let limit = crate::config::UploadConfig::DEFAULT_MAX_BYTES;

    match fixture.services.documents.upload(
        UploadRequest {
            dossier_id: dossier.id,
            name: "scan.png".to_string(),
            kind: DocumentKind::FeuillePresence,
            content_type: Some("image/png".to_string()),
            bytes: vec![0; limit + 1],
        },
        &fixture.rh,
        Utc::now(),
    ) {
        Err(ServiceError::Validation(message)) => assert!(message.contains("limit")),
        other => panic!("expected size error, got {other:?}"),
    }
    assert!(fixture.storage.is_empty());
}

#[test]
fn visibility_follows_role_and_company() {
    let fixture = fixture();
    let bilan = fixture.bilan();
    let formation = fixture.formation();
    let dossiers = &fixture.services.dossiers;

    let outsider = Actor {
        user_id: UserId::new(),
        role: Role::Rh,
        entreprise_id: Some(EntrepriseId::new()),
    };
    assert!(dossiers
        .list(&DossierFilter::default(), &outsider)
        .expect("list")
        .is_empty());
    assert!(matches!(
        dossiers.get(bilan.id, &outsider),
        Err(ServiceError::Forbidden(_))
    ));

    let consultant_view = dossiers
        .list(&DossierFilter::default(), &fixture.consultant)
        .expect("list");
    assert_eq!(consultant_view.len(), 1);
    assert_eq!(consultant_view[0].id, bilan.id);

    let filtered = dossiers
        .list(
            &DossierFilter {
                kind: Some(DossierKind::FormationOpco),
                ..DossierFilter::default()
            },
            &fixture.admin,
        )
        .expect("list");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, formation.id);
}

#[test]
fn export_lists_visible_dossiers_with_company() {
    let fixture = fixture();
    let bilan = fixture.bilan();
    fixture.formation();

    let csv = fixture
        .services
        .dossiers
        .export_csv(&DossierFilter::default(), &fixture.consultant)
        .expect("export");

    let mut reader = csv::Reader::from_reader(csv.as_bytes());
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), CSV_HEADERS.to_vec());

    let rows: Vec<csv::StringRecord> = reader
        .records()
        .collect::<Result<_, _>>()
        .expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][0], bilan.reference.as_str());
    assert_eq!(&rows[0][3], "Acme Industrie");
    assert_eq!(&rows[0][4], ACME_SIRET);
    assert_eq!(&rows[0][9], "2025-03-03");
}

#[test]
fn company_staff_cannot_open_dossiers_elsewhere() {
    let fixture = fixture();
    let other = fixture
        .services
        .entreprises
        .register(
            crate::services::RegisterEntreprise {
                siret: OTHER_SIRET.to_string(),
                raison_sociale: Some("Autre SARL".to_string()),
                ..crate::services::RegisterEntreprise::default()
            },
            &fixture.admin,
            Utc::now(),
        )
        .expect("registered");

    let request = NewDossier {
        kind: DossierKind::FormationOpco,
        entreprise_id: other.id,
        beneficiary: beneficiary(None),
        consultant_id: None,
        hours_planned: 7,
        start_date: None,
        end_date: None,
        notes: String::new(),
    };
    assert!(matches!(
        fixture.services.dossiers.create(request, &fixture.rh, Utc::now()),
        Err(ServiceError::Forbidden(_))
    ));
}
