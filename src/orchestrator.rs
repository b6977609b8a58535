// 🎼 Reconciliation Orchestrator - Ingestion and effective-date changes
//
// ingest:                   merge → reconcile → (window against effective date) → diff
// on_effective_date_changed: recalculate every kind → diff
//
// The orchestrator only reads through the period store. Persisting the
// returned instructions is the caller's job (or `commit`).

use crate::error::{PeriodError, Result};
use crate::merger::IntervalMerger;
use crate::period::{CaseRef, EntityKind, EntityRef, IngestionMode, Period, RawSubPeriod};
use crate::policy::PolicyTable;
use crate::recalculation::EffectiveDateRecalculator;
use crate::reconciliation::{PeriodReconciler, ReconcileResult};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Period persistence, implemented by the calling service
pub trait PeriodStore {
    /// Stored periods of one entity and kind
    fn load_periods(&self, entity_ref: &EntityRef, kind: EntityKind) -> anyhow::Result<Vec<Period>>;

    /// Stored periods of one kind across every entity of a case
    fn load_case_periods(&self, case_ref: &CaseRef, kind: EntityKind) -> anyhow::Result<Vec<Period>>;

    /// The case's current effective date, if one is set
    fn effective_date(&self, case_ref: &CaseRef) -> anyhow::Result<Option<NaiveDate>>;

    /// Persist instructions: delete, then update, then create
    fn apply_result(&self, result: &ReconcileResult) -> anyhow::Result<()>;
}

impl<T: PeriodStore + ?Sized> PeriodStore for &T {
    fn load_periods(&self, entity_ref: &EntityRef, kind: EntityKind) -> anyhow::Result<Vec<Period>> {
        (**self).load_periods(entity_ref, kind)
    }

    fn load_case_periods(&self, case_ref: &CaseRef, kind: EntityKind) -> anyhow::Result<Vec<Period>> {
        (**self).load_case_periods(case_ref, kind)
    }

    fn effective_date(&self, case_ref: &CaseRef) -> anyhow::Result<Option<NaiveDate>> {
        (**self).effective_date(case_ref)
    }

    fn apply_result(&self, result: &ReconcileResult) -> anyhow::Result<()> {
        (**self).apply_result(result)
    }
}

impl<T: PeriodStore + ?Sized> PeriodStore for Arc<T> {
    fn load_periods(&self, entity_ref: &EntityRef, kind: EntityKind) -> anyhow::Result<Vec<Period>> {
        (**self).load_periods(entity_ref, kind)
    }

    fn load_case_periods(&self, case_ref: &CaseRef, kind: EntityKind) -> anyhow::Result<Vec<Period>> {
        (**self).load_case_periods(case_ref, kind)
    }

    fn effective_date(&self, case_ref: &CaseRef) -> anyhow::Result<Option<NaiveDate>> {
        (**self).effective_date(case_ref)
    }

    fn apply_result(&self, result: &ReconcileResult) -> anyhow::Result<()> {
        (**self).apply_result(result)
    }
}

/// Registry data source per entity kind (income registry, population registry...)
pub trait RawDataProvider {
    fn fetch(&self, entity_ref: &EntityRef, kind: EntityKind) -> anyhow::Result<Vec<RawSubPeriod>>;
}

// ============================================================================
// INGEST OUTCOME
// ============================================================================

#[derive(Debug)]
pub struct IngestOutcome {
    pub result: ReconcileResult,

    /// Raw sub-periods excluded from the merge
    pub rejected: Vec<PeriodError>,

    /// Zero-length raw sub-periods dropped
    pub dropped: usize,
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Sequences merger, reconciler and recalculator per entity kind.
///
/// Holds no mutable state. Calls touching the same case (a re-ingestion
/// racing an effective-date change) must be serialized by the caller, e.g.
/// under the case's transaction or lock.
pub struct Orchestrator<S> {
    store: S,
    policies: PolicyTable,
    reconciler: PeriodReconciler,
    recalculator: EffectiveDateRecalculator,
}

impl<S: PeriodStore> Orchestrator<S> {
    pub fn new(store: S) -> Self {
        Self::with_policies(store, PolicyTable::new())
    }

    pub fn with_policies(store: S, policies: PolicyTable) -> Self {
        Orchestrator {
            store,
            recalculator: EffectiveDateRecalculator::new(policies.clone()),
            policies,
            reconciler: PeriodReconciler::new(),
        }
    }

    /// Merge raw sub-periods and reconcile them against the stored periods.
    ///
    /// When the case has an effective date, the resulting set is windowed
    /// against it before the instructions are computed. The date is read from
    /// the store: `on_effective_date_changed` does not record it, so the caller
    /// must store the new date before the next `ingest`, or new periods are
    /// windowed against the old one.
    pub fn ingest(
        &self,
        entity_ref: &EntityRef,
        kind: EntityKind,
        raw: &[RawSubPeriod],
        mode: IngestionMode,
    ) -> Result<IngestOutcome> {
        let merged = IntervalMerger::new(kind, self.policies.get(kind)).merge(entity_ref, raw);
        let existing = self.store.load_periods(entity_ref, kind)?;

        let mut next = self
            .reconciler
            .next_period_set(entity_ref, &merged.periods, &existing, mode)?;

        if let Some(effective_date) = self.store.effective_date(&entity_ref.case_ref)? {
            next = self.recalculator.recalculate(effective_date, &next)?;
        }

        let result = ReconcileResult::diff(&existing, &next);

        info!(
            entity = %entity_ref,
            kind = %kind,
            mode = ?mode,
            rejected = merged.rejected.len(),
            "Ingested {} raw sub-periods: {}",
            raw.len(),
            result.summary()
        );

        Ok(IngestOutcome {
            result,
            rejected: merged.rejected,
            dropped: merged.dropped,
        })
    }

    /// Fetch from a registry provider, then ingest
    pub fn ingest_from<P: RawDataProvider + ?Sized>(
        &self,
        provider: &P,
        entity_ref: &EntityRef,
        kind: EntityKind,
        mode: IngestionMode,
    ) -> Result<IngestOutcome> {
        let raw = provider.fetch(entity_ref, kind)?;
        self.ingest(entity_ref, kind, &raw, mode)
    }

    /// Recalculate every kind's periods of the case against a new effective date.
    ///
    /// Returns instructions only; the case's stored effective date is left to
    /// the caller (see `ingest`).
    pub fn on_effective_date_changed(
        &self,
        case_ref: &CaseRef,
        effective_date: NaiveDate,
    ) -> Result<BTreeMap<EntityKind, ReconcileResult>> {
        let mut results = BTreeMap::new();

        for kind in EntityKind::ALL {
            let periods = self.store.load_case_periods(case_ref, kind)?;
            let recalculated = self.recalculator.recalculate(effective_date, &periods)?;
            results.insert(kind, ReconcileResult::diff(&periods, &recalculated));
        }

        info!(
            case = %case_ref,
            effective_date = %effective_date,
            updates = results.values().map(|r| r.update.len()).sum::<usize>(),
            "Recalculated case periods"
        );

        Ok(results)
    }

    /// Hand instructions to the period store
    pub fn commit(&self, result: &ReconcileResult) -> Result<()> {
        self.store.apply_result(result)?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
