// 🏷️ Kind Policies - Policies as Data
// Per-kind merge and inclusion nuances, so one merge/reconcile algorithm
// serves household members, marital status, income and custody alike.

use crate::error::{PeriodError, Result};
use crate::period::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

// ============================================================================
// POLICY DEFINITION
// ============================================================================

/// What the recalculation reports for a period ending before the effective date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionRule {
    /// Excluded and its date range cleared
    ClearExcluded,

    /// Excluded but its date range still reported
    KeepExcludedBounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPolicy {
    /// Merge spans where one starts the day after the other ends (same payload)
    pub merge_adjacent: bool,

    pub inclusion: InclusionRule,
}

impl KindPolicy {
    pub fn default_for(kind: EntityKind) -> Self {
        match kind {
            EntityKind::HouseholdMember | EntityKind::MaritalStatus | EntityKind::Custody => {
                KindPolicy {
                    merge_adjacent: true,
                    inclusion: InclusionRule::ClearExcluded,
                }
            }
            // Consecutive income records are distinct facts
            EntityKind::Income => KindPolicy {
                merge_adjacent: false,
                inclusion: InclusionRule::ClearExcluded,
            },
        }
    }
}

/// One entry of a policy file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub kind: EntityKind,

    #[serde(default)]
    pub merge_adjacent: Option<bool>,

    #[serde(default)]
    pub inclusion: Option<InclusionRule>,

    /// Description/notes about this override
    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// POLICY TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    policies: BTreeMap<EntityKind, KindPolicy>,
}

impl PolicyTable {
    /// Built-in defaults for every kind
    pub fn new() -> Self {
        PolicyTable {
            policies: EntityKind::ALL
                .into_iter()
                .map(|kind| (kind, KindPolicy::default_for(kind)))
                .collect(),
        }
    }

    /// Load overrides from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            PeriodError::Policy(format!(
                "failed to read policy file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let entries: Vec<PolicyEntry> = serde_json::from_str(content)
            .map_err(|e| PeriodError::Policy(format!("failed to parse policy JSON: {}", e)))?;

        Self::from_entries(entries)
    }

    /// Apply entries on top of the defaults; a kind may appear once
    pub fn from_entries(entries: Vec<PolicyEntry>) -> Result<Self> {
        let mut table = PolicyTable::new();
        let mut seen = Vec::new();

        for entry in entries {
            if seen.contains(&entry.kind) {
                return Err(PeriodError::Policy(format!(
                    "duplicate policy entry for {}",
                    entry.kind
                )));
            }
            seen.push(entry.kind);

            let policy = table
                .policies
                .entry(entry.kind)
                .or_insert_with(|| KindPolicy::default_for(entry.kind));
            if let Some(merge_adjacent) = entry.merge_adjacent {
                policy.merge_adjacent = merge_adjacent;
            }
            if let Some(inclusion) = entry.inclusion {
                policy.inclusion = inclusion;
            }

            info!(
                kind = %entry.kind,
                merge_adjacent = policy.merge_adjacent,
                inclusion = ?policy.inclusion,
                "Policy override applied: {}",
                entry.description.as_deref().unwrap_or("no description")
            );
        }

        Ok(table)
    }

    pub fn get(&self, kind: EntityKind) -> KindPolicy {
        self.policies
            .get(&kind)
            .copied()
            .unwrap_or_else(|| KindPolicy::default_for(kind))
    }

    pub fn set(&mut self, kind: EntityKind, policy: KindPolicy) {
        self.policies.insert(kind, policy);
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
