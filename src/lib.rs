// Bidrag Behandling - Period Reconciliation Core Library
// Exposes all modules for use in the CLI, calling services, and tests

pub mod error;
pub mod period;         // Period model: spans, identities, kinds
pub mod policy;         // Kind policy table (JSON-configurable)
pub mod merger;         // Interval Merger
pub mod reconciliation; // Period Reconciler
pub mod recalculation;  // Effective-Date Recalculator
pub mod orchestrator;   // Ingest + effective-date change sequencing
pub mod store;          // In-memory period store + audit events
pub mod files;          // Raw CSV / period JSON loading

// Re-export commonly used types
pub use error::{PeriodError, Result};
pub use period::{
    CaseRef, DateSpan, EntityKind, EntityRef, IngestionMode,
    Period, PeriodId, PeriodSource, RawSubPeriod,
    sort_periods,
};
pub use policy::{InclusionRule, KindPolicy, PolicyEntry, PolicyTable};
pub use merger::{merge, IntervalMerger, MergeOutcome};
pub use reconciliation::{validate_period_set, PeriodReconciler, ReconcileResult};
pub use recalculation::{included, recalculate, window, EffectiveDateRecalculator, WindowPosition};
pub use orchestrator::{IngestOutcome, Orchestrator, PeriodStore, RawDataProvider};
pub use store::{Event, InMemoryPeriodStore};
pub use files::{load_periods_json, load_raw_csv, CsvRawDataProvider};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
