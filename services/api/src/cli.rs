use crate::server;
use crate::tasks::{create_admin, migrate, CreateAdminArgs};
use clap::{Args, Parser, Subcommand};
use dossier_flow::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "dossier-flow",
    about = "Run and administer the OPCO dossier back office",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Apply pending database migrations and exit
    Migrate,
    /// Create an administrator account
    CreateAdmin(CreateAdminArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Migrate => migrate(),
        Command::CreateAdmin(args) => create_admin(args),
    }
}
