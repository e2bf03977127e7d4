//! Schema evolution
//!
//! - `EvolutionAnalyzer` classifies proposed changes as safe, warning or
//!   breaking against persisted instance counts
//! - `EvolutionRecord` and `EvolutionLog` keep the append-only history of
//!   applied changes, with the data needed to roll each one back

mod analyzer;
mod record;
mod report;

pub use analyzer::{AssignmentChange, EvolutionAnalyzer};
pub use record::{
    EvolutionAction, EvolutionLog, EvolutionRecord, FileEvolutionLog, MemoryEvolutionLog,
    RollbackData,
};
pub use report::{ClassImpact, ImpactReport, SafetyLevel};
