//! Case-file status workflow: legal transitions, role gates and the side effects
//! each transition triggers.

mod effects;
mod status;

pub use effects::{side_effects, EffectContext, EmailTemplate, PdfKind, SideEffect};
pub use status::{DossierKind, DossierStatus, UnknownValue};

use serde::Serialize;

use crate::domain::Role;

/// A validated move between two statuses of the same track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub kind: DossierKind,
    pub from: DossierStatus,
    pub to: DossierStatus,
}

impl Transition {
    /// Checks that `to` is a legal successor of `from` on the track of `kind`.
    pub fn plan(
        kind: DossierKind,
        from: DossierStatus,
        to: DossierStatus,
    ) -> Result<Self, WorkflowError> {
        if !kind.owns(to) {
            return Err(WorkflowError::WrongTrack { kind, status: to });
        }
        if from == to {
            return Err(WorkflowError::Unchanged(from));
        }
        if from.is_terminal() {
            return Err(WorkflowError::Terminal(from));
        }
        if !from.allowed_next(kind).contains(&to) {
            return Err(WorkflowError::NotAllowed { from, to });
        }
        Ok(Self { kind, from, to })
    }

    /// Moves that send a dossier back for rework.
    pub fn is_backward(&self) -> bool {
        let track = self.kind.track();
        let position = |status: DossierStatus| track.iter().position(|candidate| *candidate == status);
        matches!((position(self.from), position(self.to)), (Some(from), Some(to)) if to < from)
    }

    /// Applies the role gate and the comment requirement to a planned move.
    pub fn authorize(&self, role: Role, comment: Option<&str>) -> Result<(), WorkflowError> {
        if !role_may_apply(role, self) {
            return Err(WorkflowError::Forbidden { role, to: self.to });
        }

        let has_comment = comment.is_some_and(|text| !text.trim().is_empty());
        if self.is_backward() && !has_comment {
            return Err(WorkflowError::CommentRequired { to: self.to });
        }
        if self.to == DossierStatus::Refuse && !has_comment {
            return Err(WorkflowError::CommentRequired { to: self.to });
        }

        Ok(())
    }
}

fn role_may_apply(role: Role, transition: &Transition) -> bool {
    use DossierStatus::*;

    match role {
        Role::Admin => true,
        Role::Consultant => transition.kind == DossierKind::BilanCompetences,
        Role::Rh => matches!(
            (transition.from, transition.to),
            (Brouillon, EnAttenteValidation)
        ),
        Role::User => false,
    }
}

/// Runs [`Transition::plan`] then [`Transition::authorize`] for `role`.
///
/// `plan` alone answers whether `from -> to` is legal on the track of `kind`; this wrapper
/// adds the role gate and the comment rule applied to requests.
pub fn validate_transition(
    kind: DossierKind,
    from: DossierStatus,
    to: DossierStatus,
    role: Role,
    comment: Option<&str>,
) -> Result<Transition, WorkflowError> {
    let transition = Transition::plan(kind, from, to)?;
    transition.authorize(role, comment)?;
    Ok(transition)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("dossier is already in status {0}")]
    Unchanged(DossierStatus),
    #[error("status {status} does not belong to the {kind} track")]
    WrongTrack {
        kind: DossierKind,
        status: DossierStatus,
    },
    #[error("status {0} is terminal")]
    Terminal(DossierStatus),
    #[error("cannot move a dossier from {from} to {to}")]
    NotAllowed {
        from: DossierStatus,
        to: DossierStatus,
    },
    #[error("moving a dossier to {to} requires a comment")]
    CommentRequired { to: DossierStatus },
    #[error("role {role} may not move a dossier to {to}")]
    Forbidden { role: Role, to: DossierStatus },
    #[error("a dossier reaches {0} only by issuing its invoice")]
    InvoiceRequired(DossierStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use DossierKind::*;
    use DossierStatus::*;

    #[test]
    fn bilan_track_advances_one_phase_at_a_time() {
        let path = [Nouveau, Phase1, Phase2, Phase3, Facture];
        for pair in path.windows(2) {
            let transition =
                validate_transition(BilanCompetences, pair[0], pair[1], Role::Consultant, None)
                    .expect("forward step allowed");
            assert!(!transition.is_backward());
        }

        assert_eq!(
            Transition::plan(BilanCompetences, Nouveau, Phase2),
            Err(WorkflowError::NotAllowed {
                from: Nouveau,
                to: Phase2
            })
        );
    }

    #[test]
    fn opco_track_branches_on_the_funding_decision() {
        assert!(Transition::plan(FormationOpco, EnvoyeOpco, Accepte).is_ok());
        assert!(Transition::plan(FormationOpco, EnvoyeOpco, Refuse).is_ok());
        assert!(Transition::plan(FormationOpco, Accepte, Facture).is_ok());
        assert_eq!(
            Transition::plan(FormationOpco, Refuse, Facture),
            Err(WorkflowError::Terminal(Refuse))
        );
    }

    #[test]
    fn rejects_statuses_from_the_other_track() {
        assert_eq!(
            Transition::plan(FormationOpco, Brouillon, Phase1),
            Err(WorkflowError::WrongTrack {
                kind: FormationOpco,
                status: Phase1
            })
        );
    }

    #[test]
    fn rejects_same_status_and_terminal_moves() {
        assert_eq!(
            Transition::plan(BilanCompetences, Phase2, Phase2),
            Err(WorkflowError::Unchanged(Phase2))
        );
        assert_eq!(
            Transition::plan(BilanCompetences, Facture, Phase3),
            Err(WorkflowError::Terminal(Facture))
        );
    }

    #[test]
    fn returning_for_rework_requires_a_comment() {
        let transition =
            Transition::plan(FormationOpco, EnAttenteValidation, Brouillon).expect("legal");
        assert!(transition.is_backward());
        assert_eq!(
            transition.authorize(Role::Admin, Some("  ")),
            Err(WorkflowError::CommentRequired { to: Brouillon })
        );
        assert!(transition
            .authorize(Role::Admin, Some("Convention non signée"))
            .is_ok());
    }

    #[test]
    fn refusal_requires_a_comment() {
        let transition = Transition::plan(FormationOpco, EnvoyeOpco, Refuse).expect("legal");
        assert!(transition.authorize(Role::Admin, None).is_err());
        assert!(transition
            .authorize(Role::Admin, Some("Hors critères de prise en charge"))
            .is_ok());
    }

    #[test]
    fn role_gates_follow_responsibilities() {
        let submit = Transition::plan(FormationOpco, Brouillon, EnAttenteValidation).expect("legal");
        assert!(submit.authorize(Role::Rh, None).is_ok());
        assert!(submit.authorize(Role::Consultant, None).is_err());

        let validate = Transition::plan(FormationOpco, EnAttenteValidation, Valide).expect("legal");
        assert_eq!(
            validate.authorize(Role::Rh, None),
            Err(WorkflowError::Forbidden {
                role: Role::Rh,
                to: Valide
            })
        );
        assert!(validate.authorize(Role::Admin, None).is_ok());

        let phase = Transition::plan(BilanCompetences, Nouveau, Phase1).expect("legal");
        assert!(phase.authorize(Role::User, None).is_err());
        assert!(phase.authorize(Role::Rh, None).is_err());
    }
}
