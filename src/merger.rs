// 🔗 Interval Merger - Raw registry sub-periods → canonical periods
// The input is cut into segments at every start and every day-after-end.
// Each segment takes the payload of the last sub-period (in priority order)
// covering it. Segments then join:
//   same payload, one sub-period spans the seam → always
//   same payload, seam between two sub-periods  → when the kind merges adjacent
//   different payload                           → never

use crate::error::PeriodError;
use crate::period::{cmp_end, DateSpan, EntityKind, EntityRef, Period, RawSubPeriod};
use crate::policy::KindPolicy;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

// ============================================================================
// MERGE OUTCOME
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MergeOutcome {
    /// Disjoint periods ordered by start
    pub periods: Vec<Period>,

    /// Sub-periods excluded from the merge (`InvalidInterval`)
    #[serde(skip)]
    pub rejected: Vec<PeriodError>,

    /// Zero-length sub-periods dropped
    pub dropped: usize,
}

impl MergeOutcome {
    pub fn has_rejections(&self) -> bool {
        !self.rejected.is_empty()
    }
}

// ============================================================================
// INTERVAL MERGER
// ============================================================================

pub struct IntervalMerger {
    kind: EntityKind,
    policy: KindPolicy,
}

impl IntervalMerger {
    pub fn new(kind: EntityKind, policy: KindPolicy) -> Self {
        IntervalMerger { kind, policy }
    }

    /// Merger with the built-in policy for `kind`
    pub fn for_kind(kind: EntityKind) -> Self {
        Self::new(kind, KindPolicy::default_for(kind))
    }

    /// Merge one entity's sub-periods into the minimal disjoint covering set.
    ///
    /// Gaps in the input stay gaps. Where sub-periods with different payloads
    /// overlap, the later-starting one takes over from its start and the
    /// earlier one resumes after it ends, so every covered day keeps exactly
    /// one payload.
    pub fn merge(&self, entity_ref: &EntityRef, raw: &[RawSubPeriod]) -> MergeOutcome {
        let mut rejected = Vec::new();
        let mut dropped = 0;
        let mut valid: Vec<&RawSubPeriod> = Vec::with_capacity(raw.len());

        for sub in raw {
            match sub.to {
                Some(to) if to < sub.from => {
                    warn!(
                        entity = %entity_ref,
                        kind = %self.kind,
                        from = %sub.from,
                        to = %to,
                        "Rejecting sub-period that ends before it starts"
                    );
                    rejected.push(PeriodError::InvalidInterval {
                        from: sub.from,
                        to,
                        source_ref: sub.source_ref.clone(),
                    });
                }
                Some(to) if to == sub.from => dropped += 1,
                _ => valid.push(sub),
            }
        }

        // Priority order: start ascending, longest first. On overlapping days
        // the sub-period later in this order wins.
        valid.sort_by(|a, b| {
            a.from
                .cmp(&b.from)
                .then_with(|| cmp_end(b.to, a.to))
                .then_with(|| a.payload.to_string().cmp(&b.payload.to_string()))
        });

        let mut bounds: Vec<NaiveDate> = Vec::with_capacity(valid.len() * 2);
        for sub in &valid {
            bounds.push(sub.from);
            if let Some(next) = sub.to.and_then(|to| to.succ_opt()) {
                bounds.push(next);
            }
        }
        bounds.sort();
        bounds.dedup();

        let mut runs: Vec<(DateSpan, &serde_json::Value)> = Vec::new();
        let mut superseded = 0;

        for (i, &start) in bounds.iter().enumerate() {
            let Some(winner) = valid.iter().rev().find(|s| s.span().contains(start)) else {
                continue;
            };
            let end = match bounds.get(i + 1) {
                Some(next) => next.pred_opt(),
                None => winner.to,
            };
            let segment = DateSpan::new(start, end);

            if let Some((current, payload)) = runs.last_mut() {
                if current.is_adjacent_to(&segment) {
                    if **payload == winner.payload {
                        // Same payload carried across `start` by one sub-period
                        let bridged = valid.iter().any(|s| {
                            s.from < start && s.span().contains(start) && s.payload == winner.payload
                        });

                        if bridged || self.policy.merge_adjacent {
                            current.to = segment.to;
                            continue;
                        }
                    } else if valid.iter().any(|s| s.from < start && s.span().contains(start)) {
                        superseded += 1;
                    }
                }
            }

            runs.push((segment, &winner.payload));
        }

        let periods: Vec<Period> = runs
            .into_iter()
            .map(|(span, payload)| {
                Period::ingested(entity_ref.clone(), self.kind, span, payload.clone())
            })
            .collect();

        debug!(
            entity = %entity_ref,
            kind = %self.kind,
            input = raw.len(),
            merged = periods.len(),
            rejected = rejected.len(),
            dropped,
            superseded,
            "Merged sub-periods"
        );

        MergeOutcome {
            periods,
            rejected,
            dropped,
        }
    }
}

/// Merge with the built-in policy for `kind`
pub fn merge(entity_ref: &EntityRef, kind: EntityKind, raw: &[RawSubPeriod]) -> MergeOutcome {
    IntervalMerger::for_kind(kind).merge(entity_ref, raw)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn raw(from: NaiveDate, to: Option<NaiveDate>) -> RawSubPeriod {
        RawSubPeriod::new(from, to)
    }

    fn entity() -> EntityRef {
        EntityRef::new("case-1", "child-a")
    }

    fn spans(outcome: &MergeOutcome) -> Vec<DateSpan> {
        outcome.periods.iter().map(|p| p.span).collect()
    }

    /// Every day in `[start, end]` is covered by the output iff covered by the input
    fn assert_same_coverage(input: &[RawSubPeriod], output: &[Period], start: NaiveDate, end: NaiveDate) {
        let mut day = start;
        while day <= end {
            let in_input = input
                .iter()
                .filter(|s| s.to.map_or(true, |to| to > s.from))
                .any(|s| s.span().contains(day));
            let hits = output.iter().filter(|p| p.span.contains(day)).count();

            assert!(hits <= 1, "{} covered {} times", day, hits);
            assert_eq!(in_input, hits == 1, "coverage differs on {}", day);
            day = day.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_adjacent_halves_merge_into_one_period() {
        let input = vec![
            raw(d(2023, 1, 1), Some(d(2023, 6, 30))),
            raw(d(2023, 7, 1), Some(d(2023, 12, 31))),
        ];

        let outcome = merge(&entity(), EntityKind::HouseholdMember, &input);

        assert_eq!(spans(&outcome), vec![DateSpan::closed(d(2023, 1, 1), d(2023, 12, 31))]);
        assert_eq!(outcome.periods[0].kind, EntityKind::HouseholdMember);
        assert!(outcome.periods[0].included_in_calculation);
    }

    #[test]
    fn test_adjacent_income_records_stay_apart() {
        let input = vec![
            raw(d(2023, 1, 1), Some(d(2023, 6, 30))),
            raw(d(2023, 7, 1), Some(d(2023, 12, 31))),
        ];

        let outcome = merge(&entity(), EntityKind::Income, &input);

        assert_eq!(outcome.periods.len(), 2);
    }

    #[test]
    fn test_adjacent_with_different_payload_stay_apart() {
        let input = vec![
            raw(d(2023, 1, 1), Some(d(2023, 6, 30))).with_payload(json!({"status": "married"})),
            raw(d(2023, 7, 1), None).with_payload(json!({"status": "separated"})),
        ];

        let outcome = merge(&entity(), EntityKind::MaritalStatus, &input);

        assert_eq!(outcome.periods.len(), 2);
        assert_eq!(outcome.periods[1].payload, json!({"status": "separated"}));
        assert!(outcome.periods[1].is_open());
    }

    #[test]
    fn test_overlaps_merge_and_gaps_remain() {
        let input = vec![
            raw(d(2023, 3, 1), Some(d(2023, 5, 31))),
            raw(d(2023, 1, 1), Some(d(2023, 3, 15))),
            raw(d(2023, 9, 1), Some(d(2023, 10, 31))),
            raw(d(2023, 4, 1), Some(d(2023, 4, 30))),
        ];

        let outcome = merge(&entity(), EntityKind::HouseholdMember, &input);

        assert_eq!(
            spans(&outcome),
            vec![
                DateSpan::closed(d(2023, 1, 1), d(2023, 5, 31)),
                DateSpan::closed(d(2023, 9, 1), d(2023, 10, 31)),
            ]
        );
        assert_same_coverage(&input, &outcome.periods, d(2022, 12, 1), d(2024, 1, 31));
    }

    #[test]
    fn test_open_sub_period_swallows_later_ones() {
        let input = vec![
            raw(d(2023, 1, 1), None),
            raw(d(2023, 1, 1), Some(d(2023, 2, 28))),
            raw(d(2024, 6, 1), Some(d(2024, 8, 31))),
        ];

        let outcome = merge(&entity(), EntityKind::Custody, &input);

        assert_eq!(spans(&outcome), vec![DateSpan::open(d(2023, 1, 1))]);
    }

    #[test]
    fn test_nested_payload_change_splits_run() {
        let input = vec![
            raw(d(2023, 1, 1), Some(d(2023, 12, 31))).with_payload(json!("long")),
            raw(d(2023, 1, 1), Some(d(2023, 1, 31))).with_payload(json!("short")),
            raw(d(2023, 5, 1), Some(d(2023, 5, 31))).with_payload(json!("may")),
        ];

        let outcome = merge(&entity(), EntityKind::Income, &input);

        assert_eq!(
            spans(&outcome),
            vec![
                DateSpan::closed(d(2023, 1, 1), d(2023, 1, 31)),
                DateSpan::closed(d(2023, 2, 1), d(2023, 4, 30)),
                DateSpan::closed(d(2023, 5, 1), d(2023, 5, 31)),
                DateSpan::closed(d(2023, 6, 1), d(2023, 12, 31)),
            ]
        );
        let payloads: Vec<_> = outcome.periods.iter().map(|p| p.payload.clone()).collect();
        assert_eq!(payloads, vec![json!("short"), json!("long"), json!("may"), json!("long")]);
        assert_same_coverage(&input, &outcome.periods, d(2022, 12, 1), d(2024, 1, 31));
    }

    #[test]
    fn test_overlapping_status_change_keeps_both_statuses() {
        let input = vec![
            raw(d(2020, 1, 1), Some(d(2023, 6, 30))).with_payload(json!({"status": "married"})),
            raw(d(2023, 6, 30), None).with_payload(json!({"status": "separated"})),
        ];

        let outcome = merge(&EntityRef::new("case-1", "spouse"), EntityKind::MaritalStatus, &input);

        assert_eq!(
            spans(&outcome),
            vec![
                DateSpan::closed(d(2020, 1, 1), d(2023, 6, 29)),
                DateSpan::open(d(2023, 6, 30)),
            ]
        );
        assert_eq!(outcome.periods[0].payload, json!({"status": "married"}));
        assert_eq!(outcome.periods[1].payload, json!({"status": "separated"}));
    }

    #[test]
    fn test_overlapping_same_payload_merges_without_adjacency() {
        let input = vec![
            raw(d(2023, 1, 1), Some(d(2023, 6, 30))).with_payload(json!({"amount": 1})),
            raw(d(2023, 3, 1), Some(d(2023, 9, 30))).with_payload(json!({"amount": 1})),
        ];

        let outcome = merge(&entity(), EntityKind::Income, &input);

        assert_eq!(spans(&outcome), vec![DateSpan::closed(d(2023, 1, 1), d(2023, 9, 30))]);
    }

    #[test]
    fn test_zero_length_dropped_and_invalid_rejected() {
        let mut backwards = raw(d(2023, 5, 1), Some(d(2023, 4, 1)));
        backwards.source_ref = Some("folkeregister:42".to_string());

        let input = vec![
            raw(d(2023, 1, 1), Some(d(2023, 1, 1))),
            backwards,
            raw(d(2023, 2, 1), Some(d(2023, 2, 28))),
        ];

        let outcome = merge(&entity(), EntityKind::HouseholdMember, &input);

        assert_eq!(spans(&outcome), vec![DateSpan::closed(d(2023, 2, 1), d(2023, 2, 28))]);
        assert_eq!(outcome.dropped, 1);
        assert!(outcome.has_rejections());
        match &outcome.rejected[0] {
            PeriodError::InvalidInterval { from, to, source_ref } => {
                assert_eq!(*from, d(2023, 5, 1));
                assert_eq!(*to, d(2023, 4, 1));
                assert_eq!(source_ref.as_deref(), Some("folkeregister:42"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let input = vec![
            raw(d(2023, 6, 1), Some(d(2023, 8, 31))),
            raw(d(2023, 1, 1), Some(d(2023, 2, 28))),
            raw(d(2023, 8, 15), None),
            raw(d(2023, 2, 10), Some(d(2023, 3, 31))),
        ];
        let mut reversed = input.clone();
        reversed.reverse();

        let a = merge(&entity(), EntityKind::HouseholdMember, &input);
        let b = merge(&entity(), EntityKind::HouseholdMember, &reversed);

        assert_eq!(a.periods, b.periods);
        assert_same_coverage(&input, &a.periods, d(2022, 12, 1), d(2024, 3, 31));
    }

    #[test]
    fn test_ids_are_stable_across_runs() {
        let input = vec![raw(d(2023, 1, 1), Some(d(2023, 12, 31)))];

        let first = merge(&entity(), EntityKind::Income, &input);
        let second = merge(&entity(), EntityKind::Income, &input);

        assert_eq!(first.periods[0].id, second.periods[0].id);
    }

    #[test]
    fn test_empty_input() {
        let outcome = merge(&entity(), EntityKind::Custody, &[]);
        assert!(outcome.periods.is_empty());
        assert!(!outcome.has_rejections());
    }
}
