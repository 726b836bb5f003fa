mod common;
mod dossiers;
mod factures;
