// ⏰ Period Model - Date intervals owned by a case
//
// Every periodized fact on a case (who lives with whom, marital status,
// income, custody) shares one shape:
// 1. Span: the canonical interval as ingested or entered by a case worker
// 2. Window: the bounds reported to calculation after the effective date
// 3. Source: whether a case worker or an external registry produced it

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// DATE SPAN
// ============================================================================

/// Closed date interval `[from, to]`, `to = None` means open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub from: NaiveDate,
    pub to: Option<NaiveDate>,
}

impl DateSpan {
    pub fn new(from: NaiveDate, to: Option<NaiveDate>) -> Self {
        DateSpan { from, to }
    }

    pub fn closed(from: NaiveDate, to: NaiveDate) -> Self {
        DateSpan { from, to: Some(to) }
    }

    pub fn open(from: NaiveDate) -> Self {
        DateSpan { from, to: None }
    }

    pub fn is_open(&self) -> bool {
        self.to.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && self.to.map_or(true, |to| date <= to)
    }

    /// Ends strictly before `date`
    pub fn ends_before(&self, date: NaiveDate) -> bool {
        self.to.map_or(false, |to| to < date)
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        let self_reaches = self.to.map_or(true, |to| other.from <= to);
        let other_reaches = other.to.map_or(true, |to| self.from <= to);
        self_reaches && other_reaches
    }

    /// `next` starts on the day after this span ends
    pub fn is_adjacent_to(&self, next: &DateSpan) -> bool {
        self.to.and_then(|to| to.succ_opt()) == Some(next.from)
    }

    /// Parts of this span not covered by `other` (zero, one or two pieces)
    pub fn subtract(&self, other: &DateSpan) -> Vec<DateSpan> {
        if !self.overlaps(other) {
            return vec![*self];
        }

        let mut pieces = Vec::with_capacity(2);

        if self.from < other.from {
            pieces.push(DateSpan::new(self.from, other.from.pred_opt()));
        }

        if let Some(other_to) = other.to {
            let self_continues = self.to.map_or(true, |to| to > other_to);
            if self_continues {
                if let Some(start) = other_to.succ_opt() {
                    pieces.push(DateSpan::new(start, self.to));
                }
            }
        }

        pieces
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to {
            Some(to) => write!(f, "{}..{}", self.from, to),
            None => write!(f, "{}..", self.from),
        }
    }
}

/// Order span ends with `None` as +infinity
pub fn cmp_end(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(&b),
    }
}

/// Later of two span ends, `None` wins
pub fn max_end(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Option<NaiveDate> {
    match cmp_end(a, b) {
        Ordering::Less => b,
        _ => a,
    }
}

// ============================================================================
// IDENTITIES
// ============================================================================

/// Opaque case identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseRef(pub String);

impl CaseRef {
    pub fn new(value: impl Into<String>) -> Self {
        CaseRef(value.into())
    }
}

impl fmt::Display for CaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The periodized entity inside a case (one household member, one income type...).
///
/// Periods point at their entity through this reference only; the case is
/// reached by `case_ref`, never through a live back-pointer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub case_ref: CaseRef,
    pub key: String,
}

impl EntityRef {
    pub fn new(case_ref: impl Into<String>, key: impl Into<String>) -> Self {
        EntityRef {
            case_ref: CaseRef::new(case_ref),
            key: key.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.case_ref, self.key)
    }
}

/// Opaque period identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodId(pub String);

impl PeriodId {
    pub fn new(value: impl Into<String>) -> Self {
        PeriodId(value.into())
    }

    /// Deterministic id for an engine-created period.
    ///
    /// Same entity, kind and span always give the same id, so re-ingesting
    /// identical data produces identical periods.
    pub fn derive(entity_ref: &EntityRef, kind: EntityKind, span: &DateSpan) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}",
            entity_ref,
            kind.as_str(),
            span.from,
            span.to.map(|to| to.to_string()).unwrap_or_default()
        ));
        PeriodId(format!("{:x}", hasher.finalize()))
    }
}

impl fmt::Display for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// ENTITY KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Household member living with the applicant
    HouseholdMember,

    /// Marital status of the applicant
    MaritalStatus,

    /// One income record (per income type)
    Income,

    /// Custody / visitation time
    Custody,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::HouseholdMember,
        EntityKind::MaritalStatus,
        EntityKind::Income,
        EntityKind::Custody,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::HouseholdMember => "household_member",
            EntityKind::MaritalStatus => "marital_status",
            EntityKind::Income => "income",
            EntityKind::Custody => "custody",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown entity kind: {}", s))
    }
}

// ============================================================================
// SOURCE & INGESTION MODE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodSource {
    /// Entered or edited by a case worker - never touched by re-ingestion
    Manual,

    /// Derived from external registry data
    Ingested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionMode {
    /// No prior ingested data for the entity: replace every ingested period
    FirstTime,

    /// Re-ingestion: diff against the stored ingested periods
    Update,
}

impl FromStr for IngestionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "first-time" => Ok(IngestionMode::FirstTime),
            "update" => Ok(IngestionMode::Update),
            other => Err(format!("unknown ingestion mode: {}", other)),
        }
    }
}

// ============================================================================
// PERIOD
// ============================================================================

/// A stored period.
///
/// `span` is what merging, reconciliation and the non-overlap invariant work
/// on. `from`/`to` are the bounds reported to calculation, written by the
/// effective-date recalculation (`from = None` when the range is not reported).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub id: PeriodId,
    pub entity_ref: EntityRef,
    pub kind: EntityKind,
    pub span: DateSpan,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub included_in_calculation: bool,
    pub source: PeriodSource,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Period {
    /// Create an ingested period with a deterministic id
    pub fn ingested(
        entity_ref: EntityRef,
        kind: EntityKind,
        span: DateSpan,
        payload: serde_json::Value,
    ) -> Self {
        Period {
            id: PeriodId::derive(&entity_ref, kind, &span),
            entity_ref,
            kind,
            span,
            from: Some(span.from),
            to: span.to,
            included_in_calculation: true,
            source: PeriodSource::Ingested,
            payload,
        }
    }

    /// Create a period entered by a case worker
    pub fn manual(
        id: PeriodId,
        entity_ref: EntityRef,
        kind: EntityKind,
        span: DateSpan,
        payload: serde_json::Value,
    ) -> Self {
        Period {
            id,
            entity_ref,
            kind,
            span,
            from: Some(span.from),
            to: span.to,
            included_in_calculation: true,
            source: PeriodSource::Manual,
            payload,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.source == PeriodSource::Manual
    }

    pub fn is_open(&self) -> bool {
        self.span.is_open()
    }

    /// Rewrite the span in place, keeping identity; the window follows the span
    pub fn rewrite_span(&mut self, span: DateSpan) {
        self.span = span;
        self.from = Some(span.from);
        self.to = span.to;
        self.included_in_calculation = true;
    }

    /// Copy of this ingested period cut down to `span`, with its own id
    pub fn carved(&self, span: DateSpan) -> Period {
        Period::ingested(self.entity_ref.clone(), self.kind, span, self.payload.clone())
    }
}

/// Sort by entity and kind, then span start, then span end (open last)
pub fn sort_periods(periods: &mut [Period]) {
    periods.sort_by(|a, b| {
        a.entity_ref
            .cmp(&b.entity_ref)
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.span.from.cmp(&b.span.from))
            .then_with(|| cmp_end(a.span.to, b.span.to))
    });
}

// ============================================================================
// RAW SUB-PERIOD
// ============================================================================

/// Registry-provided interval, consumed by the merger and never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSubPeriod {
    pub from: NaiveDate,
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub source_ref: Option<String>,
}

impl RawSubPeriod {
    pub fn new(from: NaiveDate, to: Option<NaiveDate>) -> Self {
        RawSubPeriod {
            from,
            to,
            payload: serde_json::Value::Null,
            source_ref: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn span(&self) -> DateSpan {
        DateSpan::new(self.from, self.to)
    }
}

// ============================================================================
// TESTS
// ============================================================================
