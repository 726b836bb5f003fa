use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{DossierStatus, Transition};

/// Notification templates sent as a consequence of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    ConvocationBeneficiaire,
    SyntheseDisponible,
    ValidationRequise,
    DemandeOpco,
    DecisionOpco,
    FactureEmise,
}

impl EmailTemplate {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConvocationBeneficiaire => "convocation_beneficiaire",
            Self::SyntheseDisponible => "synthese_disponible",
            Self::ValidationRequise => "validation_requise",
            Self::DemandeOpco => "demande_opco",
            Self::DecisionOpco => "decision_opco",
            Self::FactureEmise => "facture_emise",
        }
    }
}

/// Documents rendered as a consequence of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdfKind {
    Synthese,
    DemandePriseEnCharge,
    Facture,
}

impl PdfKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synthese => "synthese",
            Self::DemandePriseEnCharge => "demande_prise_en_charge",
            Self::Facture => "facture",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    Email {
        template: EmailTemplate,
        recipient: String,
    },
    GeneratePdf {
        kind: PdfKind,
    },
}

/// Addresses known for a dossier at the time of the transition.
#[derive(Debug, Clone, Default)]
pub struct EffectContext {
    pub reference: String,
    pub beneficiary_email: Option<String>,
    pub entreprise_email: Option<String>,
    pub opco_email: Option<String>,
}

#[derive(Clone, Copy)]
enum Audience {
    Beneficiary,
    Entreprise,
    Opco,
}

impl Audience {
    fn address(self, context: &EffectContext) -> Option<&str> {
        let address = match self {
            Self::Beneficiary => context.beneficiary_email.as_deref(),
            Self::Entreprise => context.entreprise_email.as_deref(),
            Self::Opco => context.opco_email.as_deref(),
        };
        address.map(str::trim).filter(|value| !value.is_empty())
    }

    fn label(self) -> &'static str {
        match self {
            Self::Beneficiary => "beneficiary",
            Self::Entreprise => "entreprise",
            Self::Opco => "opco",
        }
    }
}

/// Side effects to dispatch once `transition` has been persisted.
///
/// PDFs come first so that a notification can reference the rendered document.
/// E-mails whose audience has no known address are skipped.
pub fn side_effects(transition: &Transition, context: &EffectContext) -> Vec<SideEffect> {
    use DossierStatus::*;

    let (pdf, email) = match transition.to {
        Phase1 => (None, Some((EmailTemplate::ConvocationBeneficiaire, Audience::Beneficiary))),
        Phase3 => (
            Some(PdfKind::Synthese),
            Some((EmailTemplate::SyntheseDisponible, Audience::Beneficiary)),
        ),
        EnAttenteValidation => (None, Some((EmailTemplate::ValidationRequise, Audience::Entreprise))),
        EnvoyeOpco => (
            Some(PdfKind::DemandePriseEnCharge),
            Some((EmailTemplate::DemandeOpco, Audience::Opco)),
        ),
        Accepte | Refuse => (None, Some((EmailTemplate::DecisionOpco, Audience::Entreprise))),
        Facture => (
            Some(PdfKind::Facture),
            Some((EmailTemplate::FactureEmise, Audience::Entreprise)),
        ),
        Nouveau | Phase2 | Brouillon | Valide => (None, None),
    };

    let mut effects = Vec::with_capacity(2);
    if let Some(kind) = pdf {
        effects.push(SideEffect::GeneratePdf { kind });
    }
    if let Some((template, audience)) = email {
        match audience.address(context) {
            Some(recipient) => effects.push(SideEffect::Email {
                template,
                recipient: recipient.to_string(),
            }),
            None => warn!(
                dossier = %context.reference,
                template = template.as_str(),
                audience = audience.label(),
                "no recipient address, notification skipped"
            ),
        }
    }
    effects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::DossierKind;

    fn context() -> EffectContext {
        EffectContext {
            reference: "DOS-2025-00001".to_string(),
            beneficiary_email: Some("claire.martin@example.fr".to_string()),
            entreprise_email: Some("rh@acme.fr".to_string()),
            opco_email: None,
        }
    }

    fn transition(kind: DossierKind, from: DossierStatus, to: DossierStatus) -> Transition {
        Transition::plan(kind, from, to).expect("legal transition")
    }

    #[test]
    fn phase_three_renders_synthesis_then_notifies_beneficiary() {
        let effects = side_effects(
            &transition(
                DossierKind::BilanCompetences,
                DossierStatus::Phase2,
                DossierStatus::Phase3,
            ),
            &context(),
        );

        assert_eq!(
            effects,
            vec![
                SideEffect::GeneratePdf {
                    kind: PdfKind::Synthese
                },
                SideEffect::Email {
                    template: EmailTemplate::SyntheseDisponible,
                    recipient: "claire.martin@example.fr".to_string(),
                },
            ]
        );
    }

    #[test]
    fn missing_opco_address_keeps_the_pdf_and_skips_the_email() {
        let effects = side_effects(
            &transition(
                DossierKind::FormationOpco,
                DossierStatus::Valide,
                DossierStatus::EnvoyeOpco,
            ),
            &context(),
        );

        assert_eq!(
            effects,
            vec![SideEffect::GeneratePdf {
                kind: PdfKind::DemandePriseEnCharge
            }]
        );
    }

    #[test]
    fn intermediate_phases_are_silent() {
        let effects = side_effects(
            &transition(
                DossierKind::BilanCompetences,
                DossierStatus::Phase1,
                DossierStatus::Phase2,
            ),
            &context(),
        );
        assert!(effects.is_empty());
    }
}
