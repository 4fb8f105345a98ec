use clap::{Parser, ValueEnum};
use sea_orm::Database;
use sea_orm_migration::prelude::*;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Action {
    Up,
    Down,
    Fresh,
    Status,
}

/// Applies the document store schema.
#[derive(Debug, Parser)]
#[command(name = "migration")]
struct Args {
    #[arg(value_enum, default_value = "up")]
    action: Action,
    /// Database connection string.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:./tally.db?mode=rwc"
    )]
    database_url: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let db = Database::connect(&args.database_url).await?;

    match args.action {
        Action::Up => migration::Migrator::up(&db, None).await?,
        Action::Down => migration::Migrator::down(&db, None).await?,
        Action::Fresh => migration::Migrator::fresh(&db).await?,
        Action::Status => migration::Migrator::status(&db).await?,
    }

    Ok(())
}
