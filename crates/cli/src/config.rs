use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use engine::Currency;
use serde::Deserialize;

use crate::error::Result;

const DEFAULT_CONFIG_PATH: &str = "config/cli.toml";
const DEFAULT_STATE_PATH: &str = "config/cli_state.json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    /// Sign-in token; falls back to the one saved in the state file.
    pub token: Option<String>,
    pub state_path: String,
    pub level: String,
    /// Seconds to wait for the first snapshot of both collections.
    pub sync_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            token: None,
            state_path: DEFAULT_STATE_PATH.to_string(),
            level: "warn".to_string(),
            sync_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "tally_cli", disable_version_flag = true)]
#[command(about = "Record sales and expenses in USD or VES and follow the totals")]
pub struct Cli {
    /// Optional config file path (TOML).
    #[arg(long)]
    config: Option<String>,
    /// Override base URL (e.g. http://127.0.0.1:3000).
    #[arg(long)]
    base_url: Option<String>,
    /// Override the sign-in token.
    #[arg(long)]
    token: Option<String>,
    /// Override the local state file.
    #[arg(long)]
    state_path: Option<String>,
    /// Override the log level.
    #[arg(long)]
    level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add or remove sales.
    Sale(Sale),
    /// Add or remove expenses.
    Expense(Expense),
    /// List records, newest first.
    List {
        #[arg(value_enum)]
        kind: Option<Kind>,
    },
    /// Show sales, expenses and net profit in both currencies.
    Totals,
    /// Show or set the VES-per-USD exchange rate.
    Rate(Rate),
    /// Write a collection as CSV.
    Export {
        #[arg(value_enum)]
        kind: Kind,
        /// Output file; stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Follow totals and notifications until interrupted.
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Kind {
    Sales,
    Expenses,
}

#[derive(Debug, Args)]
pub struct Sale {
    #[command(subcommand)]
    pub command: SaleCommand,
}

#[derive(Debug, Subcommand)]
pub enum SaleCommand {
    Add(SaleAddArgs),
    Rm { id: String },
}

#[derive(Debug, Args)]
pub struct SaleAddArgs {
    /// Sale date (YYYY-MM-DD).
    #[arg(long)]
    pub date: String,
    #[arg(long)]
    pub product: String,
    #[arg(long)]
    pub quantity: Option<f64>,
    /// Unit amount.
    #[arg(long)]
    pub amount: Option<f64>,
    #[arg(long, default_value = "USD")]
    pub currency: Currency,
}

#[derive(Debug, Args)]
pub struct Expense {
    #[command(subcommand)]
    pub command: ExpenseCommand,
}

#[derive(Debug, Subcommand)]
pub enum ExpenseCommand {
    Add(ExpenseAddArgs),
    Rm { id: String },
}

#[derive(Debug, Args)]
pub struct ExpenseAddArgs {
    /// Expense date (YYYY-MM-DD).
    #[arg(long)]
    pub date: String,
    #[arg(long)]
    pub category: String,
    #[arg(long)]
    pub amount: Option<f64>,
    #[arg(long, default_value = "USD")]
    pub currency: Currency,
}

#[derive(Debug, Args)]
pub struct Rate {
    #[command(subcommand)]
    pub command: RateCommand,
}

#[derive(Debug, Subcommand)]
pub enum RateCommand {
    Show,
    /// Set the rate. Anything that is not a positive number sets it to 0.
    Set { value: String },
}

pub fn load() -> Result<(AppConfig, Command)> {
    let cli = Cli::parse();
    let config = resolve(&cli)?;
    Ok((config, cli.command))
}

fn resolve(cli: &Cli) -> Result<AppConfig> {
    let config_path = cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    let mut builder = config::Config::builder();
    builder = builder.add_source(config::File::with_name(config_path).required(false));
    builder = builder.add_source(config::Environment::with_prefix("TALLY_CLI"));
    let mut settings: AppConfig = builder.build()?.try_deserialize()?;

    if let Some(base_url) = &cli.base_url {
        settings.base_url = base_url.clone();
    }
    if let Some(token) = &cli.token {
        settings.token = Some(token.clone());
    }
    if let Some(state_path) = &cli.state_path {
        settings.state_path = state_path.clone();
    }
    if let Some(level) = &cli.level {
        settings.level = level.clone();
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "tally_cli",
            "--config",
            "does/not/exist",
            "--base-url",
            "http://ledger.local:8080",
            "--level",
            "debug",
            "totals",
        ])
        .unwrap();
        let config = resolve(&cli).unwrap();

        assert_eq!(config.base_url, "http://ledger.local:8080");
        assert_eq!(config.level, "debug");
        assert_eq!(config.state_path, DEFAULT_STATE_PATH);
        assert_eq!(config.token, None);
        assert!(matches!(cli.command, Command::Totals));
    }

    #[test]
    fn parses_a_sale() {
        let cli = Cli::try_parse_from([
            "tally_cli",
            "sale",
            "add",
            "--date",
            "2024-01-01",
            "--product",
            "Widget",
            "--quantity",
            "2",
            "--amount",
            "10",
            "--currency",
            "ves",
        ])
        .unwrap();

        let Command::Sale(Sale {
            command: SaleCommand::Add(args),
        }) = cli.command
        else {
            panic!("expected sale add");
        };
        assert_eq!(args.product, "Widget");
        assert_eq!(args.quantity, Some(2.0));
        assert_eq!(args.currency, Currency::Ves);
    }

    #[test]
    fn rejects_unknown_currency() {
        let res = Cli::try_parse_from([
            "tally_cli",
            "expense",
            "add",
            "--date",
            "2024-01-01",
            "--category",
            "Rent",
            "--currency",
            "EUR",
        ]);
        assert!(res.is_err());
    }
}
