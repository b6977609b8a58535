// ⚖️ Period Reconciler - Fresh registry periods vs stored periods
//
// Following the rules:
//   manual periods are never altered, new ingested periods are carved around them
//   FirstTime: every stored ingested period is replaced
//   Update:    exact bounds kept, overlapping bounds rewritten in place,
//              the rest created or deleted
//
// The result must stay disjoint with at most one open period, the last.
// Anything else is surfaced as an integrity error, never repaired.

use crate::error::{PeriodError, Result};
use crate::period::{sort_periods, EntityKind, EntityRef, IngestionMode, Period, PeriodId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error};

// ============================================================================
// RECONCILE RESULT
// ============================================================================

/// Instructions for the period store, applied as delete, update, create
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub create: Vec<Period>,
    pub update: Vec<Period>,
    pub delete: Vec<PeriodId>,
}

impl ReconcileResult {
    /// Instructions turning `existing` into `next`, matched by period id
    pub fn diff(existing: &[Period], next: &[Period]) -> Self {
        let existing_by_id: HashMap<&PeriodId, &Period> =
            existing.iter().map(|p| (&p.id, p)).collect();
        let next_ids: HashSet<&PeriodId> = next.iter().map(|p| &p.id).collect();

        let mut result = ReconcileResult::default();

        for period in next {
            match existing_by_id.get(&period.id) {
                None => result.create.push(period.clone()),
                Some(stored) if *stored != period => result.update.push(period.clone()),
                Some(_) => {}
            }
        }

        result.delete = existing
            .iter()
            .filter(|p| !next_ids.contains(&p.id))
            .map(|p| p.id.clone())
            .collect();

        result
    }

    /// The period set after applying these instructions to `periods`
    pub fn apply_to(&self, periods: &[Period]) -> Vec<Period> {
        let deleted: HashSet<&PeriodId> = self.delete.iter().collect();
        let updated: HashMap<&PeriodId, &Period> =
            self.update.iter().map(|p| (&p.id, p)).collect();

        let mut next: Vec<Period> = periods
            .iter()
            .filter(|p| !deleted.contains(&p.id))
            .map(|p| updated.get(&p.id).map_or_else(|| p.clone(), |u| (*u).clone()))
            .collect();
        next.extend(self.create.iter().cloned());

        sort_periods(&mut next);
        next
    }

    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn instruction_count(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} to delete",
            self.create.len(),
            self.update.len(),
            self.delete.len()
        )
    }
}

// ============================================================================
// PERIOD RECONCILER
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodReconciler;

impl PeriodReconciler {
    pub fn new() -> Self {
        PeriodReconciler
    }

    /// Reconcile one entity's new canonical periods against its stored periods.
    ///
    /// Example:
    /// ```
    /// use bidrag_behandling::{DateSpan, EntityKind, EntityRef, IngestionMode, Period, PeriodReconciler};
    /// use chrono::NaiveDate;
    ///
    /// let entity = EntityRef::new("case-1", "income-salary");
    /// let span = DateSpan::closed(
    ///     NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
    ///     NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
    /// );
    /// let stored = vec![Period::ingested(entity.clone(), EntityKind::Income, span, serde_json::Value::Null)];
    /// let fresh = stored.clone();
    ///
    /// let result = PeriodReconciler::new()
    ///     .reconcile(&entity, &fresh, &stored, IngestionMode::Update)
    ///     .unwrap();
    /// assert!(result.is_empty());
    /// ```
    pub fn reconcile(
        &self,
        entity_ref: &EntityRef,
        new_periods: &[Period],
        existing: &[Period],
        mode: IngestionMode,
    ) -> Result<ReconcileResult> {
        let next = self.next_period_set(entity_ref, new_periods, existing, mode)?;
        let result = ReconcileResult::diff(existing, &next);

        debug!(
            entity = %entity_ref,
            mode = ?mode,
            "Reconciled periods: {}",
            result.summary()
        );

        Ok(result)
    }

    /// The full, validated period set after reconciliation
    pub fn next_period_set(
        &self,
        entity_ref: &EntityRef,
        new_periods: &[Period],
        existing: &[Period],
        mode: IngestionMode,
    ) -> Result<Vec<Period>> {
        check_ownership(entity_ref, new_periods, existing)?;

        let manual: Vec<Period> = existing.iter().filter(|p| p.is_manual()).cloned().collect();
        let stored_ingested: Vec<Period> = {
            let mut stored: Vec<Period> =
                existing.iter().filter(|p| !p.is_manual()).cloned().collect();
            sort_periods(&mut stored);
            stored
        };

        let carved = carve_around_manual(new_periods, &manual);

        let (kept, created) = match mode {
            IngestionMode::FirstTime => self.replace_all(carved, &stored_ingested),
            IngestionMode::Update => self.update_in_place(carved, &stored_ingested),
        };

        let mut reserved: HashSet<PeriodId> = manual.iter().map(|p| p.id.clone()).collect();
        reserved.extend(kept.iter().map(|p| p.id.clone()));

        let mut next = manual;
        next.extend(kept);
        next.extend(with_unique_ids(created, &mut reserved));
        sort_periods(&mut next);

        validate_period_set(entity_ref, &next)?;
        Ok(next)
    }

    /// FirstTime: stored ingested periods are discarded. A new period identical
    /// to a stored one (same id, span and payload) keeps the stored record.
    fn replace_all(&self, carved: Vec<Period>, stored: &[Period]) -> (Vec<Period>, Vec<Period>) {
        let mut kept = Vec::new();
        let mut created = Vec::new();

        for period in carved {
            let identical = stored.iter().find(|s| {
                s.id == period.id && s.span == period.span && s.payload == period.payload
            });

            match identical {
                Some(stored) => kept.push(stored.clone()),
                None => created.push(period),
            }
        }

        (kept, created)
    }

    /// Update: exact bounds first, then overlapping bounds, then create.
    /// Stored ingested periods left unclaimed are dropped from the set.
    fn update_in_place(&self, carved: Vec<Period>, stored: &[Period]) -> (Vec<Period>, Vec<Period>) {
        let mut claimed = vec![false; stored.len()];
        let mut slots: Vec<Option<Period>> = vec![None; carved.len()];

        // Pass 1: same bounds, no churn
        for (i, period) in carved.iter().enumerate() {
            let exact = (0..stored.len()).find(|&j| !claimed[j] && stored[j].span == period.span);

            if let Some(j) = exact {
                claimed[j] = true;
                let mut kept = stored[j].clone();
                kept.payload = period.payload.clone();
                slots[i] = Some(kept);
            }
        }

        // Pass 2: boundary rewrite, identity preserved
        for (i, period) in carved.iter().enumerate() {
            if slots[i].is_some() {
                continue;
            }

            let overlapping =
                (0..stored.len()).find(|&j| !claimed[j] && stored[j].span.overlaps(&period.span));

            if let Some(j) = overlapping {
                claimed[j] = true;
                let mut rewritten = stored[j].clone();
                rewritten.rewrite_span(period.span);
                rewritten.payload = period.payload.clone();
                slots[i] = Some(rewritten);
            }
        }

        let mut kept = Vec::new();
        let mut created = Vec::new();
        for (period, slot) in carved.into_iter().zip(slots) {
            match slot {
                Some(existing) => kept.push(existing),
                None => created.push(period),
            }
        }

        (kept, created)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Every period must belong to `entity_ref` and share one kind
fn check_ownership(entity_ref: &EntityRef, new_periods: &[Period], existing: &[Period]) -> Result<()> {
    let mut expected_kind: Option<EntityKind> = None;

    for period in new_periods.iter().chain(existing) {
        if &period.entity_ref != entity_ref {
            return Err(PeriodError::EntityMismatch {
                expected: entity_ref.clone(),
                found: period.entity_ref.clone(),
            });
        }

        match expected_kind {
            None => expected_kind = Some(period.kind),
            Some(kind) if kind != period.kind => {
                return Err(PeriodError::KindMismatch {
                    entity_ref: entity_ref.clone(),
                    expected: kind,
                    found: period.kind,
                });
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// Split or trim new periods wherever they would overlap a manual period
fn carve_around_manual(new_periods: &[Period], manual: &[Period]) -> Vec<Period> {
    let mut carved = Vec::with_capacity(new_periods.len());

    for period in new_periods {
        let mut pieces = vec![period.span];
        for manual_period in manual {
            pieces = pieces
                .into_iter()
                .flat_map(|piece| piece.subtract(&manual_period.span))
                .collect();
        }

        if pieces.len() == 1 && pieces[0] == period.span {
            carved.push(period.clone());
        } else {
            carved.extend(pieces.into_iter().map(|span| period.carved(span)));
        }
    }

    sort_periods(&mut carved);
    carved
}

/// Derived ids can collide with a surviving period whose span was rewritten
fn with_unique_ids(mut created: Vec<Period>, reserved: &mut HashSet<PeriodId>) -> Vec<Period> {
    for period in created.iter_mut() {
        let base = period.id.clone();
        let mut suffix = 1;
        while !reserved.insert(period.id.clone()) {
            period.id = PeriodId(format!("{}-{}", base, suffix));
            suffix += 1;
        }
    }
    created
}

/// Sorted, pairwise disjoint, at most one open period (the last)
pub fn validate_period_set(entity_ref: &EntityRef, periods: &[Period]) -> Result<()> {
    let open = periods.iter().filter(|p| p.is_open()).count();
    if open > 1 {
        error!(entity = %entity_ref, open, "Multiple open-ended periods");
        return Err(PeriodError::MultipleOpenPeriods {
            entity_ref: entity_ref.clone(),
            count: open,
        });
    }

    for pair in periods.windows(2) {
        if pair[0].span.overlaps(&pair[1].span) {
            error!(
                entity = %entity_ref,
                first = %pair[0].span,
                second = %pair[1].span,
                "Overlapping periods"
            );
            return Err(PeriodError::OverlapIntegrity {
                entity_ref: entity_ref.clone(),
                first: pair[0].span,
                second: pair[1].span,
            });
        }
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
