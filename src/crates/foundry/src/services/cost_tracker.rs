//! Reservation-based cost tracking
//!
//! Spend is reserved before a provider is called and reconciled once the
//! actual cost is known. Amounts are kept in integer micro-dollars.

use crate::error::{FoundryError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const MICROS_PER_USD: f64 = 1_000_000.0;

fn to_micros(usd: f64) -> u64 {
    (usd.max(0.0) * MICROS_PER_USD).round() as u64
}

fn to_usd(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_USD
}

/// Ceiling and running totals for one budget scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    ceiling: u64,
    spent: u64,
    reserved: u64,
    overrun: u64,
}

impl Budget {
    pub fn new(cost_limit_usd: f64) -> Self {
        Self {
            ceiling: to_micros(cost_limit_usd),
            spent: 0,
            reserved: 0,
            overrun: 0,
        }
    }

    pub fn ceiling_usd(&self) -> f64 {
        to_usd(self.ceiling)
    }

    /// Committed spend; never above the ceiling
    pub fn spent_usd(&self) -> f64 {
        to_usd(self.spent)
    }

    /// Held by outstanding reservations
    pub fn reserved_usd(&self) -> f64 {
        to_usd(self.reserved)
    }

    /// Actual cost that could not be charged because the ceiling was reached
    pub fn overrun_usd(&self) -> f64 {
        to_usd(self.overrun)
    }

    pub fn remaining_usd(&self) -> f64 {
        to_usd(self.available())
    }

    /// Committed spend as a percentage of the ceiling
    pub fn usage_percentage(&self) -> f64 {
        if self.ceiling == 0 {
            return 100.0;
        }
        (self.spent as f64 / self.ceiling as f64) * 100.0
    }

    fn available(&self) -> u64 {
        self.ceiling.saturating_sub(self.spent + self.reserved)
    }
}

/// Result of reconciling a reservation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Charge {
    pub charged_usd: f64,
    pub overrun_usd: f64,
}

#[derive(Debug)]
struct Ledger {
    budget: Budget,
    outstanding: HashMap<u64, u64>,
    next_id: u64,
}

impl Ledger {
    fn release(&mut self, id: u64) -> bool {
        match self.outstanding.remove(&id) {
            Some(amount) => {
                self.budget.reserved -= amount;
                true
            }
            None => false,
        }
    }
}

/// Single source of truth for spend. Cloning shares the same ledger.
#[derive(Debug, Clone)]
pub struct CostTracker {
    ledger: Arc<Mutex<Ledger>>,
    alert_threshold: f64,
}

impl CostTracker {
    pub fn new(budget: Budget) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(Ledger {
                budget,
                outstanding: HashMap::new(),
                next_id: 1,
            })),
            alert_threshold: 100.0,
        }
    }

    pub fn with_limit(cost_limit_usd: f64) -> Self {
        Self::new(Budget::new(cost_limit_usd))
    }

    /// Log a warning once committed spend crosses this percentage
    pub fn with_alert_threshold(mut self, percentage: f64) -> Self {
        self.alert_threshold = percentage;
        self
    }

    /// Hold `estimated_cost` against the ceiling.
    ///
    /// This is the only operation that can refuse spend.
    pub fn reserve(&self, estimated_cost: f64) -> Result<ReservationToken> {
        if !estimated_cost.is_finite() || estimated_cost < 0.0 {
            return Err(FoundryError::Validation(format!(
                "Invalid cost estimate: {}",
                estimated_cost
            )));
        }
        let amount = to_micros(estimated_cost);

        let mut ledger = self.ledger.lock();
        let available = ledger.budget.available();
        if amount > available {
            debug!(
                requested = estimated_cost,
                remaining = to_usd(available),
                "Reservation refused"
            );
            return Err(FoundryError::BudgetExceeded {
                requested: estimated_cost,
                remaining: to_usd(available),
            });
        }

        let id = ledger.next_id;
        ledger.next_id += 1;
        ledger.budget.reserved += amount;
        ledger.outstanding.insert(id, amount);
        debug!(reservation = id, amount = estimated_cost, "Reserved budget");

        Ok(ReservationToken {
            id,
            amount,
            ledger: Some(self.ledger.clone()),
        })
    }

    /// Reconcile a reservation with the actual cost.
    ///
    /// Cost beyond the reservation is charged only while it fits under the
    /// ceiling; the rest is recorded as overrun.
    pub fn commit(&self, mut token: ReservationToken, actual_cost: f64) -> Result<Charge> {
        self.ensure_owned(&token)?;
        let actual = to_micros(actual_cost);

        let mut ledger = self.ledger.lock();
        let before = ledger.budget.usage_percentage();
        ledger.release(token.id);
        let charged = actual.min(ledger.budget.available());
        let overrun = actual - charged;
        ledger.budget.spent += charged;
        ledger.budget.overrun += overrun;
        let after = ledger.budget.usage_percentage();
        token.ledger = None;

        if overrun > 0 {
            warn!(
                reservation = token.id,
                actual_usd = actual_cost,
                overrun_usd = to_usd(overrun),
                "Actual cost exceeded remaining budget"
            );
        }
        if before < self.alert_threshold && after >= self.alert_threshold {
            warn!(
                usage_percentage = after,
                remaining_usd = ledger.budget.remaining_usd(),
                "Budget alert threshold reached"
            );
        }

        Ok(Charge {
            charged_usd: to_usd(charged),
            overrun_usd: to_usd(overrun),
        })
    }

    /// Give a reservation back without spending
    pub fn release(&self, mut token: ReservationToken) -> Result<()> {
        self.ensure_owned(&token)?;
        self.ledger.lock().release(token.id);
        token.ledger = None;
        debug!(reservation = token.id, "Released reservation");
        Ok(())
    }

    /// Budget not yet spent or reserved
    pub fn remaining(&self) -> f64 {
        self.ledger.lock().budget.remaining_usd()
    }

    pub fn snapshot(&self) -> Budget {
        self.ledger.lock().budget
    }

    /// Outstanding reservations
    pub fn outstanding(&self) -> usize {
        self.ledger.lock().outstanding.len()
    }

    /// Whether two trackers draw from the same ledger
    pub fn shares_ledger_with(&self, other: &CostTracker) -> bool {
        Arc::ptr_eq(&self.ledger, &other.ledger)
    }

    fn ensure_owned(&self, token: &ReservationToken) -> Result<()> {
        match &token.ledger {
            Some(ledger) if Arc::ptr_eq(ledger, &self.ledger) => Ok(()),
            _ => Err(FoundryError::Validation(format!(
                "Reservation {} does not belong to this tracker",
                token.id
            ))),
        }
    }
}

/// Move-only handle to a held reservation. Dropping it unsettled releases
/// the hold, so an abandoned invocation never leaks budget.
#[derive(Debug)]
pub struct ReservationToken {
    id: u64,
    amount: u64,
    ledger: Option<Arc<Mutex<Ledger>>>,
}

impl Drop for ReservationToken {
    fn drop(&mut self) {
        if let Some(ledger) = self.ledger.take() {
            if ledger.lock().release(self.id) {
                debug!(reservation = self.id, "Released dropped reservation");
            }
        }
    }
}
