//! Mitigation tradeoff analysis and result reporting.

pub mod report;
pub mod tradeoff;

pub use report::{Combination, ResultSummary, analyze_and_write, analyze_campaign};
pub use tradeoff::{CurvePoint, MitigationCurve, TradeoffAnalysis, analyze_tradeoff, median, overhead};
