use std::{io::Write, path::Path, sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use engine::{
    Currency, ExchangeRate, ExpenseDraft, ExpenseRecord, Ledger, LedgerConfig, LedgerRecord,
    NotificationKind, ProfitStatus, RecordId, SaleDraft, SaleRecord, Totals,
};
use serde::Serialize;

use crate::{
    client::HttpRemote,
    config::{AppConfig, Command, ExpenseCommand, Kind, RateCommand, SaleCommand},
    error::{AppError, Result},
    local_state::LocalState,
};

mod client;
mod config;
mod error;
mod local_state;

type HttpLedger = Ledger<HttpRemote, HttpRemote>;

#[tokio::main]
async fn main() -> Result<()> {
    let (config, command) = config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "tally_cli={level},engine={level}",
            level = config.level
        ))
        .with_writer(std::io::stderr)
        .init();

    let mut state = LocalState::load(&config.state_path)?;

    // The exchange rate is local only; no need to reach the server.
    if let Command::Rate(rate) = &command {
        match &rate.command {
            RateCommand::Show => println!("{}", state.exchange_rate),
            RateCommand::Set { value } => {
                state.exchange_rate = value.parse().unwrap_or(ExchangeRate::UNSET);
                state.save(&config.state_path)?;
                if !state.exchange_rate.is_usable() {
                    eprintln!("warning: rate is not a positive number, VES amounts convert to $0.00");
                }
                println!("{}", state.exchange_rate);
            }
        }
        return Ok(());
    }

    let remote = Arc::new(HttpRemote::new(&config.base_url)?);
    let ledger = Ledger::new(
        remote.clone(),
        remote.clone(),
        LedgerConfig {
            exchange_rate: state.exchange_rate,
            ..LedgerConfig::default()
        },
    );

    connect(&ledger, &config, &state).await?;
    if remote.token() != state.token {
        state.token = remote.token();
        state.save(&config.state_path)?;
    }

    let result = run(&ledger, command).await;
    ledger.shutdown();
    result
}

/// Signs in with the configured or saved token, falling back to a fresh
/// anonymous identity, then waits for both collections.
async fn connect(ledger: &HttpLedger, config: &AppConfig, state: &LocalState) -> Result<()> {
    let token = config.token.as_deref().or(state.token.as_deref());
    let owner = match ledger.start(token).await {
        Ok(owner) => owner,
        Err(err) if token.is_some() => {
            tracing::warn!("saved token rejected ({err}), signing in anonymously");
            ledger.start(None).await?
        }
        Err(err) => return Err(err.into()),
    };
    tracing::info!(%owner, "connected");

    tokio::time::timeout(
        Duration::from_secs(config.sync_timeout_secs),
        ledger.wait_synced(),
    )
    .await
    .map_err(|_| AppError::SyncTimeout(config.sync_timeout_secs))
}

async fn run(ledger: &HttpLedger, command: Command) -> Result<()> {
    match command {
        Command::Sale(sale) => match sale.command {
            SaleCommand::Add(args) => {
                let id = ledger
                    .add_sale(SaleDraft {
                        date: args.date,
                        product: args.product,
                        quantity: args.quantity,
                        amount: args.amount,
                        currency: args.currency,
                    })
                    .await?;
                print_notification(ledger);
                println!("{id}");
            }
            SaleCommand::Rm { id } => {
                ledger.delete_sale(&RecordId::new(id)).await?;
                print_notification(ledger);
            }
        },
        Command::Expense(expense) => match expense.command {
            ExpenseCommand::Add(args) => {
                let id = ledger
                    .add_expense(ExpenseDraft {
                        date: args.date,
                        category: args.category,
                        amount: args.amount,
                        currency: args.currency,
                    })
                    .await?;
                print_notification(ledger);
                println!("{id}");
            }
            ExpenseCommand::Rm { id } => {
                ledger.delete_expense(&RecordId::new(id)).await?;
                print_notification(ledger);
            }
        },
        Command::List { kind } => {
            if kind != Some(Kind::Expenses) {
                println!("Sales");
                print_records(&ledger.sales_snapshot(), sale_line);
            }
            if kind != Some(Kind::Sales) {
                println!("Expenses");
                print_records(&ledger.expenses_snapshot(), expense_line);
            }
        }
        Command::Totals => print_totals(&ledger.totals(), ledger.exchange_rate()),
        Command::Export { kind, output } => {
            let out: Box<dyn Write> = match &output {
                Some(path) => Box::new(create_file(path)?),
                None => Box::new(std::io::stdout().lock()),
            };
            let mut writer = csv::Writer::from_writer(out);
            match kind {
                Kind::Sales => {
                    for sale in ledger.sales_snapshot().iter() {
                        writer.serialize(SaleRow::from(sale))?;
                    }
                }
                Kind::Expenses => {
                    for expense in ledger.expenses_snapshot().iter() {
                        writer.serialize(ExpenseRow::from(expense))?;
                    }
                }
            }
            writer.flush()?;
        }
        Command::Watch => watch(ledger).await?,
        Command::Rate(_) => {}
    }
    Ok(())
}

fn create_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(std::fs::File::create(path)?)
}

async fn watch(ledger: &HttpLedger) -> Result<()> {
    let mut totals = ledger.watch_totals();
    let mut notification = ledger.watch_notification();
    let mut session = ledger.session().watch_state();

    print_totals(&ledger.totals(), ledger.exchange_rate());
    loop {
        tokio::select! {
            changed = totals.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *totals.borrow_and_update();
                print_totals(&current, ledger.exchange_rate());
            }
            changed = notification.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(current) = notification.borrow_and_update().clone() {
                    eprintln!("{}", notification_line(current.kind, &current.message));
                }
            }
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = session.borrow_and_update().clone();
                tracing::info!(state = ?current, "session changed");
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn print_notification(ledger: &HttpLedger) {
    if let Some(current) = ledger.notification() {
        eprintln!("{}", notification_line(current.kind, &current.message));
    }
}

fn notification_line(kind: NotificationKind, message: &str) -> String {
    match kind {
        NotificationKind::Success => format!("ok: {message}"),
        NotificationKind::Error => format!("error: {message}"),
    }
}

fn print_records<R: LedgerRecord>(records: &[R], line: fn(&R) -> String) {
    if records.is_empty() {
        println!("  (none)");
    }
    for record in records {
        println!("  {}", line(record));
    }
}

fn sale_line(sale: &SaleRecord) -> String {
    format!(
        "{}  {}  {} x {} = {}  [{}]",
        sale.date,
        sale.product,
        sale.quantity,
        engine::Money::new(sale.amount, sale.currency).format(),
        sale.total().format(),
        sale.id
    )
}

fn expense_line(expense: &ExpenseRecord) -> String {
    format!(
        "{}  {}  {}  [{}]",
        expense.date,
        expense.category,
        expense.total().format(),
        expense.id
    )
}

fn status_label(status: ProfitStatus) -> &'static str {
    match status {
        ProfitStatus::Profit => "profit",
        ProfitStatus::Loss => "loss",
    }
}

fn totals_lines(totals: &Totals, rate: ExchangeRate) -> Vec<String> {
    let mut lines = vec![format!("Rate:       {rate}")];
    for currency in [Currency::Usd, Currency::Ves] {
        lines.push(format!(
            "{}  sales {}  expenses {}  net {} ({})",
            currency.code(),
            totals.sales(currency).format(),
            totals.expenses(currency).format(),
            totals.net_profit(currency).format(),
            status_label(totals.status(currency)),
        ));
    }
    lines
}

fn print_totals(totals: &Totals, rate: ExchangeRate) {
    for line in totals_lines(totals, rate) {
        println!("{line}");
    }
}

#[derive(Serialize)]
struct SaleRow<'a> {
    id: &'a str,
    date: NaiveDate,
    product: &'a str,
    quantity: f64,
    amount: f64,
    currency: Currency,
    total: f64,
    created_at: DateTime<Utc>,
}

impl<'a> From<&'a SaleRecord> for SaleRow<'a> {
    fn from(sale: &'a SaleRecord) -> Self {
        Self {
            id: sale.id.as_str(),
            date: sale.date,
            product: &sale.product,
            quantity: sale.quantity,
            amount: sale.amount,
            currency: sale.currency,
            total: sale.total().amount,
            created_at: sale.created_at,
        }
    }
}

#[derive(Serialize)]
struct ExpenseRow<'a> {
    id: &'a str,
    date: NaiveDate,
    category: &'a str,
    amount: f64,
    currency: Currency,
    created_at: DateTime<Utc>,
}

impl<'a> From<&'a ExpenseRecord> for ExpenseRow<'a> {
    fn from(expense: &'a ExpenseRecord) -> Self {
        Self {
            id: expense.id.as_str(),
            date: expense.date,
            category: &expense.category,
            amount: expense.amount,
            currency: expense.currency,
            created_at: expense.created_at,
        }
    }
}
