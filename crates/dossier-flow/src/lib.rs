//! Back office for French professional-training funding case files: companies,
//! dossiers moving through a status workflow with an append-only audit trail,
//! documents, invoices and notification e-mails.

pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod repository;
pub mod services;
pub mod telemetry;
pub mod workflow;

#[cfg(test)]
mod tests;
