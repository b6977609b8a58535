// 🗄️ In-Memory Period Store - Reference collaborator
//
// Holds every case's periods and effective dates behind RwLocks and keeps an
// audit trail: "Every change is an event". Calling services persist to their
// own database; this store backs the CLI and tests.

use crate::orchestrator::PeriodStore;
use crate::period::{sort_periods, CaseRef, EntityKind, EntityRef, Period, PeriodId};
use crate::reconciliation::ReconcileResult;
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

// ============================================================================
// AUDIT EVENT
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub period_id: PeriodId,
    pub entity_ref: EntityRef,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(event_type: &str, period: &Period, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            period_id: period.id.clone(),
            entity_ref: period.entity_ref.clone(),
            data: serde_json::json!({
                "kind": period.kind,
                "span": period.span,
                "from": period.from,
                "to": period.to,
                "included_in_calculation": period.included_in_calculation,
            }),
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

pub struct InMemoryPeriodStore {
    periods: Arc<RwLock<Vec<Period>>>,
    effective_dates: Arc<RwLock<HashMap<CaseRef, NaiveDate>>>,
    events: Arc<RwLock<Vec<Event>>>,
    actor: String,
}

impl InMemoryPeriodStore {
    pub fn new() -> Self {
        Self::with_actor("period_engine")
    }

    /// Store recording `actor` on every audit event
    pub fn with_actor(actor: &str) -> Self {
        InMemoryPeriodStore {
            periods: Arc::new(RwLock::new(Vec::new())),
            effective_dates: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(RwLock::new(Vec::new())),
            actor: actor.to_string(),
        }
    }

    /// Seed a stored period (e.g. a case worker's manual edit)
    pub fn insert(&self, period: Period) -> Result<()> {
        let mut periods = self.periods.write().map_err(|_| poisoned())?;
        if periods.iter().any(|p| p.id == period.id) {
            bail!("period {} already stored", period.id);
        }

        self.record(vec![Event::new("period_inserted", &period, &self.actor)])?;
        periods.push(period);
        Ok(())
    }

    pub fn set_effective_date(&self, case_ref: CaseRef, date: NaiveDate) -> Result<()> {
        let mut dates = self.effective_dates.write().map_err(|_| poisoned())?;
        dates.insert(case_ref, date);
        Ok(())
    }

    /// Every stored period, sorted
    pub fn all_periods(&self) -> Result<Vec<Period>> {
        let periods = self.periods.read().map_err(|_| poisoned())?;
        let mut all = periods.clone();
        sort_periods(&mut all);
        Ok(all)
    }

    pub fn events(&self) -> Result<Vec<Event>> {
        Ok(self.events.read().map_err(|_| poisoned())?.clone())
    }

    /// Audit trail of one period, oldest first
    pub fn events_for_period(&self, id: &PeriodId) -> Result<Vec<Event>> {
        let events = self.events.read().map_err(|_| poisoned())?;
        Ok(events.iter().filter(|e| &e.period_id == id).cloned().collect())
    }

    fn select<F>(&self, filter: F) -> Result<Vec<Period>>
    where
        F: Fn(&Period) -> bool,
    {
        let periods = self.periods.read().map_err(|_| poisoned())?;
        let mut selected: Vec<Period> = periods.iter().filter(|p| filter(p)).cloned().collect();
        sort_periods(&mut selected);
        Ok(selected)
    }

    fn record(&self, new_events: Vec<Event>) -> Result<()> {
        let mut events = self.events.write().map_err(|_| poisoned())?;
        events.extend(new_events);
        Ok(())
    }
}

impl Default for InMemoryPeriodStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("period store lock poisoned")
}

impl PeriodStore for InMemoryPeriodStore {
    fn load_periods(&self, entity_ref: &EntityRef, kind: EntityKind) -> Result<Vec<Period>> {
        self.select(|p| &p.entity_ref == entity_ref && p.kind == kind)
    }

    fn load_case_periods(&self, case_ref: &CaseRef, kind: EntityKind) -> Result<Vec<Period>> {
        self.select(|p| &p.entity_ref.case_ref == case_ref && p.kind == kind)
    }

    fn effective_date(&self, case_ref: &CaseRef) -> Result<Option<NaiveDate>> {
        let dates = self.effective_dates.read().map_err(|_| poisoned())?;
        Ok(dates.get(case_ref).copied())
    }

    /// All-or-nothing: the instructions are checked against a copy first
    fn apply_result(&self, result: &ReconcileResult) -> Result<()> {
        let mut periods = self.periods.write().map_err(|_| poisoned())?;
        let mut next = periods.clone();
        let mut events = Vec::with_capacity(result.instruction_count());

        for id in &result.delete {
            let position = next
                .iter()
                .position(|p| &p.id == id)
                .ok_or_else(|| anyhow!("cannot delete unknown period {}", id))?;
            let removed = next.remove(position);
            events.push(Event::new("period_deleted", &removed, &self.actor));
        }

        for updated in &result.update {
            let slot = next
                .iter_mut()
                .find(|p| p.id == updated.id)
                .ok_or_else(|| anyhow!("cannot update unknown period {}", updated.id))?;
            if slot.entity_ref != updated.entity_ref {
                bail!("period {} cannot move to another entity", updated.id);
            }
            *slot = updated.clone();
            events.push(Event::new("period_updated", updated, &self.actor));
        }

        for created in &result.create {
            if next.iter().any(|p| p.id == created.id) {
                bail!("period {} already stored", created.id);
            }
            next.push(created.clone());
            events.push(Event::new("period_created", created, &self.actor));
        }

        *periods = next;
        drop(periods);

        debug!("Applied instructions: {}", result.summary());
        self.record(events)
    }
}

// ============================================================================
// TESTS
// ============================================================================
