// 📅 Effective-Date Recalculation - Which periods count from the virkningstidspunkt
//
// Computed from each period's span, never from previously reported bounds:
//   span ends before the date      → excluded
//   span starts before the date    → included, reported from the date
//   span starts on/after the date  → included, reported as is

use crate::error::{PeriodError, Result};
use crate::period::{sort_periods, DateSpan, EntityKind, EntityRef, Period};
use crate::policy::{InclusionRule, PolicyTable};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPosition {
    /// Ends before the effective date
    Before,

    /// Starts before and ends on/after the effective date (or is open)
    Straddling,

    /// Starts on or after the effective date
    Within,
}

impl WindowPosition {
    pub fn of(span: &DateSpan, effective_date: NaiveDate) -> Self {
        if span.ends_before(effective_date) {
            WindowPosition::Before
        } else if span.from < effective_date {
            WindowPosition::Straddling
        } else {
            WindowPosition::Within
        }
    }
}

/// Window one period against the effective date
pub fn window(period: &Period, effective_date: NaiveDate, rule: InclusionRule) -> Period {
    let mut windowed = period.clone();

    match WindowPosition::of(&period.span, effective_date) {
        WindowPosition::Before => {
            windowed.included_in_calculation = false;
            match rule {
                InclusionRule::ClearExcluded => {
                    windowed.from = None;
                    windowed.to = None;
                }
                InclusionRule::KeepExcludedBounds => {
                    windowed.from = Some(period.span.from);
                    windowed.to = period.span.to;
                }
            }
        }
        WindowPosition::Straddling => {
            windowed.included_in_calculation = true;
            windowed.from = Some(effective_date);
            windowed.to = period.span.to;
        }
        WindowPosition::Within => {
            windowed.included_in_calculation = true;
            windowed.from = Some(period.span.from);
            windowed.to = period.span.to;
        }
    }

    windowed
}

pub struct EffectiveDateRecalculator {
    policies: PolicyTable,
}

impl EffectiveDateRecalculator {
    pub fn new(policies: PolicyTable) -> Self {
        EffectiveDateRecalculator { policies }
    }

    /// Recompute inclusion and reported bounds of every period.
    ///
    /// Output is sorted by entity and span start. Fails when one entity has
    /// more than one period containing the effective date.
    pub fn recalculate(&self, effective_date: NaiveDate, periods: &[Period]) -> Result<Vec<Period>> {
        let mut sorted = periods.to_vec();
        sort_periods(&mut sorted);

        let mut straddling: HashMap<(&EntityRef, EntityKind), DateSpan> = HashMap::new();
        let mut recalculated = Vec::with_capacity(sorted.len());

        for period in &sorted {
            if WindowPosition::of(&period.span, effective_date) == WindowPosition::Straddling {
                let key = (&period.entity_ref, period.kind);
                if let Some(first) = straddling.get(&key) {
                    error!(
                        entity = %period.entity_ref,
                        kind = %period.kind,
                        effective_date = %effective_date,
                        "More than one period straddles the effective date"
                    );
                    return Err(PeriodError::OverlapIntegrity {
                        entity_ref: period.entity_ref.clone(),
                        first: *first,
                        second: period.span,
                    });
                }
                straddling.insert(key, period.span);
            }

            let rule = self.policies.get(period.kind).inclusion;
            recalculated.push(window(period, effective_date, rule));
        }

        debug!(
            effective_date = %effective_date,
            periods = recalculated.len(),
            excluded = recalculated.iter().filter(|p| !p.included_in_calculation).count(),
            "Recalculated periods"
        );

        Ok(recalculated)
    }
}

impl Default for EffectiveDateRecalculator {
    fn default() -> Self {
        Self::new(PolicyTable::new())
    }
}

/// Recalculate with the built-in policies
pub fn recalculate(effective_date: NaiveDate, periods: &[Period]) -> Result<Vec<Period>> {
    EffectiveDateRecalculator::default().recalculate(effective_date, periods)
}

/// Periods taking part in the next calculation run
pub fn included(periods: &[Period]) -> Vec<&Period> {
    periods.iter().filter(|p| p.included_in_calculation).collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::PeriodId;
    use crate::policy::KindPolicy;
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn income(key: &str, from: NaiveDate, to: Option<NaiveDate>) -> Period {
        Period::ingested(
            EntityRef::new("case-1", key),
            EntityKind::Income,
            DateSpan::new(from, to),
            json!({"amount": 450000}),
        )
    }

    fn scenario_periods() -> Vec<Period> {
        vec![
            income("salary", d(2023, 1, 1), Some(d(2023, 6, 30))),
            income("capital", d(2023, 8, 1), Some(d(2024, 7, 31))),
            income("benefits", d(2023, 1, 1), Some(d(2024, 7, 31))),
            income("pension", d(2024, 1, 1), None),
        ]
    }

    fn by_key<'a>(periods: &'a [Period], key: &str) -> &'a Period {
        periods.iter().find(|p| p.entity_ref.key == key).unwrap()
    }

    #[test]
    fn test_income_periods_against_effective_date() {
        let result = recalculate(d(2023, 7, 1), &scenario_periods()).unwrap();

        let salary = by_key(&result, "salary");
        assert!(!salary.included_in_calculation);
        assert_eq!((salary.from, salary.to), (None, None));

        let capital = by_key(&result, "capital");
        assert!(capital.included_in_calculation);
        assert_eq!((capital.from, capital.to), (Some(d(2023, 8, 1)), Some(d(2024, 7, 31))));

        let benefits = by_key(&result, "benefits");
        assert!(benefits.included_in_calculation);
        assert_eq!((benefits.from, benefits.to), (Some(d(2023, 7, 1)), Some(d(2024, 7, 31))));
        assert_eq!(benefits.span.from, d(2023, 1, 1), "span is never trimmed");

        let pension = by_key(&result, "pension");
        assert!(pension.included_in_calculation);
        assert_eq!((pension.from, pension.to), (Some(d(2024, 1, 1)), None));

        assert_eq!(included(&result).len(), 3);
    }

    #[test]
    fn test_recalculation_is_idempotent() {
        let date = d(2023, 7, 1);
        let once = recalculate(date, &scenario_periods()).unwrap();
        let twice = recalculate(date, &once).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_moving_date_back_restores_periods() {
        let later = recalculate(d(2024, 9, 1), &scenario_periods()).unwrap();
        assert_eq!(included(&later).len(), 1);

        let earlier = recalculate(d(2023, 1, 1), &later).unwrap();
        let untouched = recalculate(d(2023, 1, 1), &scenario_periods()).unwrap();

        assert_eq!(earlier, untouched);
        assert_eq!(included(&earlier).len(), 4);
    }

    #[test]
    fn test_boundary_days() {
        let date = d(2023, 7, 1);
        let ends_day_before = income("a", d(2023, 1, 1), Some(d(2023, 6, 30)));
        let ends_on_date = income("b", d(2023, 1, 1), Some(d(2023, 7, 1)));
        let starts_on_date = income("c", d(2023, 7, 1), None);

        assert_eq!(WindowPosition::of(&ends_day_before.span, date), WindowPosition::Before);
        assert_eq!(WindowPosition::of(&ends_on_date.span, date), WindowPosition::Straddling);
        assert_eq!(WindowPosition::of(&starts_on_date.span, date), WindowPosition::Within);

        let trimmed = window(&ends_on_date, date, InclusionRule::ClearExcluded);
        assert_eq!((trimmed.from, trimmed.to), (Some(date), Some(date)));
    }

    #[test]
    fn test_keep_excluded_bounds_policy() {
        let mut policies = PolicyTable::new();
        policies.set(
            EntityKind::Custody,
            KindPolicy {
                merge_adjacent: true,
                inclusion: InclusionRule::KeepExcludedBounds,
            },
        );
        let custody = Period::manual(
            PeriodId::new("m-1"),
            EntityRef::new("case-1", "child-a"),
            EntityKind::Custody,
            DateSpan::closed(d(2022, 1, 1), d(2022, 12, 31)),
            json!({"nights_per_month": 4}),
        );

        let result = EffectiveDateRecalculator::new(policies)
            .recalculate(d(2023, 1, 1), &[custody])
            .unwrap();

        assert!(!result[0].included_in_calculation);
        assert_eq!(result[0].from, Some(d(2022, 1, 1)));
        assert_eq!(result[0].to, Some(d(2022, 12, 31)));
    }

    #[test]
    fn test_two_straddling_periods_fail() {
        let periods = vec![
            income("salary", d(2023, 1, 1), Some(d(2023, 12, 31))),
            income("salary", d(2023, 5, 1), None),
        ];

        let err = recalculate(d(2023, 7, 1), &periods).unwrap_err();
        assert!(matches!(err, PeriodError::OverlapIntegrity { .. }));
    }

    #[test]
    fn test_straddles_counted_per_entity() {
        let periods = vec![
            income("salary", d(2023, 1, 1), None),
            income("capital", d(2023, 1, 1), None),
        ];

        let result = recalculate(d(2023, 7, 1), &periods).unwrap();
        assert!(result.iter().all(|p| p.from == Some(d(2023, 7, 1))));
    }

    #[test]
    fn test_output_sorted_by_start() {
        let mut periods = vec![
            income("salary", d(2024, 1, 1), None),
            income("salary", d(2023, 1, 1), Some(d(2023, 12, 31))),
        ];
        periods.reverse();
        periods.swap(0, 1);

        let result = recalculate(d(2022, 1, 1), &periods).unwrap();
        assert!(result[0].span.from < result[1].span.from);
    }
}
