//! Budget enforcement and cost calculation

mod cost_tracker;
mod pricing;

pub use cost_tracker::{Budget, Charge, CostTracker, ReservationToken};
pub use pricing::PricingTable;
