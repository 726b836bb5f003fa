use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The two products handled by the back office, each with its own status track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DossierKind {
    BilanCompetences,
    FormationOpco,
}

impl DossierKind {
    pub const fn initial_status(self) -> DossierStatus {
        match self {
            Self::BilanCompetences => DossierStatus::Nouveau,
            Self::FormationOpco => DossierStatus::Brouillon,
        }
    }

    /// Statuses of the track in workflow order.
    pub const fn track(self) -> &'static [DossierStatus] {
        match self {
            Self::BilanCompetences => &[
                DossierStatus::Nouveau,
                DossierStatus::Phase1,
                DossierStatus::Phase2,
                DossierStatus::Phase3,
                DossierStatus::Facture,
            ],
            Self::FormationOpco => &[
                DossierStatus::Brouillon,
                DossierStatus::EnAttenteValidation,
                DossierStatus::Valide,
                DossierStatus::EnvoyeOpco,
                DossierStatus::Accepte,
                DossierStatus::Refuse,
                DossierStatus::Facture,
            ],
        }
    }

    pub fn owns(self, status: DossierStatus) -> bool {
        self.track().contains(&status)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BilanCompetences => "bilan_competences",
            Self::FormationOpco => "formation_opco",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::BilanCompetences => "Bilan de compétences",
            Self::FormationOpco => "Formation financée OPCO",
        }
    }
}

impl fmt::Display for DossierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DossierKind {
    type Err = UnknownValue;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "bilan_competences" => Ok(Self::BilanCompetences),
            "formation_opco" => Ok(Self::FormationOpco),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DossierStatus {
    Nouveau,
    Phase1,
    Phase2,
    Phase3,
    Brouillon,
    EnAttenteValidation,
    Valide,
    EnvoyeOpco,
    Accepte,
    Refuse,
    Facture,
}

impl DossierStatus {
    pub const ALL: [Self; 11] = [
        Self::Nouveau,
        Self::Phase1,
        Self::Phase2,
        Self::Phase3,
        Self::Brouillon,
        Self::EnAttenteValidation,
        Self::Valide,
        Self::EnvoyeOpco,
        Self::Accepte,
        Self::Refuse,
        Self::Facture,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nouveau => "nouveau",
            Self::Phase1 => "phase1",
            Self::Phase2 => "phase2",
            Self::Phase3 => "phase3",
            Self::Brouillon => "brouillon",
            Self::EnAttenteValidation => "en_attente_validation",
            Self::Valide => "valide",
            Self::EnvoyeOpco => "envoye_opco",
            Self::Accepte => "accepte",
            Self::Refuse => "refuse",
            Self::Facture => "facture",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Nouveau => "Nouveau",
            Self::Phase1 => "Phase préliminaire",
            Self::Phase2 => "Phase d'investigation",
            Self::Phase3 => "Phase de conclusion",
            Self::Brouillon => "Brouillon",
            Self::EnAttenteValidation => "En attente de validation",
            Self::Valide => "Validé",
            Self::EnvoyeOpco => "Envoyé à l'OPCO",
            Self::Accepte => "Accepté",
            Self::Refuse => "Refusé",
            Self::Facture => "Facturé",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Facture | Self::Refuse)
    }

    /// Legal successors of this status on the given track.
    pub fn allowed_next(self, kind: DossierKind) -> &'static [DossierStatus] {
        use DossierStatus::*;

        if !kind.owns(self) {
            return &[];
        }

        match self {
            Nouveau => &[Phase1],
            Phase1 => &[Phase2],
            Phase2 => &[Phase3],
            Phase3 => &[Facture],
            Brouillon => &[EnAttenteValidation],
            EnAttenteValidation => &[Valide, Brouillon],
            Valide => &[EnvoyeOpco],
            EnvoyeOpco => &[Accepte, Refuse],
            Accepte => &[Facture],
            Refuse | Facture => &[],
        }
    }
}

impl fmt::Display for DossierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DossierStatus {
    type Err = UnknownValue;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == raw)
            .ok_or_else(|| UnknownValue(raw.to_string()))
    }
}

/// Raised when a stored or submitted enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value '{0}'")]
pub struct UnknownValue(pub String);
