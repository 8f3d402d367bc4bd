use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One leg of a scheduled run: train for `steps`, shrinking the population
/// to `target_population` along the way, with the layered topologies using
/// `target_flag` as their layer multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ScheduleEntry {
    pub steps: usize,
    pub target_population: usize,
    pub target_flag: usize,
}

impl ScheduleEntry {
    pub fn new(steps: usize, target_population: usize, target_flag: usize) -> Self {
        ScheduleEntry {
            steps,
            target_population,
            target_flag,
        }
    }
}

/// When to retire models while running one schedule entry.
///
/// Retirements are spread evenly: with `n_diff` models to drop over `steps`
/// steps, one goes at the end of every `steps / n_diff` steps until the
/// target is met.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetirementPlan {
    target_population: usize,
    interval: usize,
}

impl RetirementPlan {
    /// Returns `None` when the entry does not shrink the population.
    pub fn new(current_population: usize, entry: &ScheduleEntry) -> Option<Self> {
        let n_diff = current_population.checked_sub(entry.target_population)?;
        if n_diff == 0 {
            return None;
        }
        Some(RetirementPlan {
            target_population: entry.target_population,
            // fewer steps than retirements: drop one per step
            interval: (entry.steps / n_diff).max(1),
        })
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    pub fn target_population(&self) -> usize {
        self.target_population
    }

    /// Whether the model count should drop after `step` (0-indexed) given the
    /// current live population.
    pub fn retires_at(&self, step: usize, live_population: usize) -> bool {
        live_population > self.target_population && (step + 1) % self.interval == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_plan_without_shrink() {
        assert!(RetirementPlan::new(8, &ScheduleEntry::new(10, 8, 5)).is_none());
        assert!(RetirementPlan::new(8, &ScheduleEntry::new(10, 12, 5)).is_none());
    }

    #[test]
    fn test_retirements_fall_on_interval_boundaries() {
        let plan = RetirementPlan::new(10, &ScheduleEntry::new(10, 8, 5)).unwrap();
        assert_eq!(plan.interval(), 5);
        let mut live = 10;
        let mut retired_at = vec![];
        for step in 0..10 {
            if plan.retires_at(step, live) {
                live -= 1;
                retired_at.push(step);
            }
        }
        assert_eq!(retired_at, vec![4, 9]);
        assert_eq!(live, 8);
    }

    #[test]
    fn test_uneven_division_stops_at_target() {
        // interval 2 would hit five boundaries, only four are needed
        let plan = RetirementPlan::new(10, &ScheduleEntry::new(10, 6, 5)).unwrap();
        let mut live = 10;
        for step in 0..10 {
            if plan.retires_at(step, live) {
                live -= 1;
            }
        }
        assert_eq!(live, 6);
    }

    #[test]
    fn test_short_entry_retires_every_step() {
        let plan = RetirementPlan::new(10, &ScheduleEntry::new(2, 5, 5)).unwrap();
        assert_eq!(plan.interval(), 1);
        assert!(plan.retires_at(0, 10));
        assert!(plan.retires_at(1, 9));
    }
}
