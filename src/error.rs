//! Error types for the period engine

use chrono::NaiveDate;
use thiserror::Error;

use crate::period::{DateSpan, EntityKind, EntityRef};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, PeriodError>;

/// Data-integrity and collaborator failures.
///
/// None of these are retryable: the same inputs reproduce the same error.
#[derive(Error, Debug)]
pub enum PeriodError {
    /// Two periods of one entity overlap after reconciliation or recalculation
    #[error("overlapping periods for {entity_ref}: {first} and {second}")]
    OverlapIntegrity {
        entity_ref: EntityRef,
        first: DateSpan,
        second: DateSpan,
    },

    /// A raw sub-period ends before it starts
    #[error("invalid interval {from}..{to} (source: {})", .source_ref.as_deref().unwrap_or("unknown"))]
    InvalidInterval {
        from: NaiveDate,
        to: NaiveDate,
        source_ref: Option<String>,
    },

    /// More than one open-ended period for one entity
    #[error("{count} open-ended periods for {entity_ref}, at most one allowed")]
    MultipleOpenPeriods { entity_ref: EntityRef, count: usize },

    /// A period belongs to another entity than the one being reconciled
    #[error("period belongs to {found}, expected {expected}")]
    EntityMismatch { expected: EntityRef, found: EntityRef },

    /// Periods of different kinds passed for one reconciliation
    #[error("mixed period kinds for {entity_ref}: expected {expected}, found {found}")]
    KindMismatch {
        entity_ref: EntityRef,
        expected: EntityKind,
        found: EntityKind,
    },

    /// Policy file parse or validation error
    #[error("policy error: {0}")]
    Policy(String),

    /// Period store or raw-data provider failure
    #[error("collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),
}

impl PeriodError {
    /// Integrity errors indicate a defect in stored data or manual edits
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            PeriodError::OverlapIntegrity { .. } | PeriodError::MultipleOpenPeriods { .. }
        )
    }
}
