//! Trial campaigns: scheduling and execution of the configuration cross-product.

pub mod plan;
pub mod runner;

pub use plan::{CampaignPlan, PlannedTrial};
pub use runner::{CampaignReport, CampaignRunner, CellTally};
