mod cli;
mod infra;
mod routes;
mod server;
mod tasks;

use dossier_flow::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
