//! Dual-currency totals derived from the two snapshots and the current rate.

use serde::Serialize;
use tokio::sync::watch;

use crate::{
    Currency, ExchangeRate, ExpenseRecord, Money, SaleRecord,
    money::{to_usd, to_ves},
    store::Snapshot,
};

/// Sign category of a net amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfitStatus {
    Profit,
    Loss,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Totals {
    pub sales_usd: f64,
    pub sales_ves: f64,
    pub expenses_usd: f64,
    pub expenses_ves: f64,
    pub net_profit_usd: f64,
    pub net_profit_ves: f64,
}

impl Totals {
    /// Converts and sums every record under `rate`. O(n) in the record count.
    #[must_use]
    pub fn compute(sales: &[SaleRecord], expenses: &[ExpenseRecord], rate: ExchangeRate) -> Self {
        let (sales_usd, sales_ves) = sales.iter().fold((0.0, 0.0), |(usd, ves), sale| {
            (
                usd + to_usd(sale.amount, sale.currency, rate) * sale.quantity,
                ves + to_ves(sale.amount, sale.currency, rate) * sale.quantity,
            )
        });
        let (expenses_usd, expenses_ves) =
            expenses.iter().fold((0.0, 0.0), |(usd, ves), expense| {
                (
                    usd + to_usd(expense.amount, expense.currency, rate),
                    ves + to_ves(expense.amount, expense.currency, rate),
                )
            });

        Self {
            sales_usd,
            sales_ves,
            expenses_usd,
            expenses_ves,
            net_profit_usd: sales_usd - expenses_usd,
            net_profit_ves: sales_ves - expenses_ves,
        }
    }

    #[must_use]
    pub fn sales(&self, currency: Currency) -> Money {
        match currency {
            Currency::Usd => Money::usd(self.sales_usd),
            Currency::Ves => Money::ves(self.sales_ves),
        }
    }

    #[must_use]
    pub fn expenses(&self, currency: Currency) -> Money {
        match currency {
            Currency::Usd => Money::usd(self.expenses_usd),
            Currency::Ves => Money::ves(self.expenses_ves),
        }
    }

    #[must_use]
    pub fn net_profit(&self, currency: Currency) -> Money {
        match currency {
            Currency::Usd => Money::usd(self.net_profit_usd),
            Currency::Ves => Money::ves(self.net_profit_ves),
        }
    }

    #[must_use]
    pub fn status(&self, currency: Currency) -> ProfitStatus {
        if self.net_profit(currency).amount >= 0.0 {
            ProfitStatus::Profit
        } else {
            ProfitStatus::Loss
        }
    }
}

/// Keeps a [`Totals`] channel in sync with its three inputs.
///
/// Recomputes whenever a snapshot or the rate changes; the task ends when
/// every input sender is gone or all totals receivers are dropped.
pub(crate) fn spawn_totals(
    mut sales: watch::Receiver<Snapshot<SaleRecord>>,
    mut expenses: watch::Receiver<Snapshot<ExpenseRecord>>,
    mut rate: watch::Receiver<ExchangeRate>,
) -> watch::Receiver<Totals> {
    let compute = |sales: &watch::Receiver<Snapshot<SaleRecord>>,
                   expenses: &watch::Receiver<Snapshot<ExpenseRecord>>,
                   rate: &watch::Receiver<ExchangeRate>| {
        let sales = sales.borrow().records.clone();
        let expenses = expenses.borrow().records.clone();
        Totals::compute(&sales, &expenses, *rate.borrow())
    };

    let (tx, rx) = watch::channel(compute(&sales, &expenses, &rate));
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = sales.changed() => if changed.is_err() { break },
                changed = expenses.changed() => if changed.is_err() { break },
                changed = rate.changed() => if changed.is_err() { break },
                () = tx.closed() => break,
            }
            let totals = compute(&sales, &expenses, &rate);
            tx.send_replace(totals);
        }
    });
    rx
}
