//! Task weighting for reminder selection.
//!
//! A reminder draw is proportional to weight, never an argmax, so low
//! priority tasks still surface now and then.

use chrono::{DateTime, Utc};
use rand::Rng;

use nudge_core::types::{TaskItem, TaskPriority};

/// Priority base weight times a due-date multiplier.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightPolicy;

impl WeightPolicy {
    pub fn priority_base(&self, priority: TaskPriority) -> f64 {
        match priority {
            TaskPriority::Critical => 8.0,
            TaskPriority::High => 4.0,
            TaskPriority::Medium => 2.0,
            TaskPriority::Low | TaskPriority::None => 1.0,
        }
    }

    /// Closer deadlines boost the weight; overdue counts as due now.
    pub fn due_multiplier(&self, due: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(due) = due else { return 1.0 };
        let days = (due - now).num_seconds() as f64 / 86_400.0;
        if days < 1.0 {
            4.0
        } else if days < 3.0 {
            2.5
        } else if days < 7.0 {
            1.75
        } else if days < 14.0 {
            1.25
        } else {
            1.0
        }
    }

    /// Completed tasks carry no weight and never fire.
    pub fn weight(&self, task: &TaskItem, now: DateTime<Utc>) -> f64 {
        if task.completed {
            return 0.0;
        }
        self.priority_base(task.priority) * self.due_multiplier(task.due_date, now)
    }

    /// Weighted random pick. None when nothing is eligible.
    pub fn choose<'a>(
        &self,
        tasks: &'a [TaskItem],
        now: DateTime<Utc>,
        rng: &mut impl Rng,
    ) -> Option<&'a TaskItem> {
        let weights: Vec<f64> = tasks.iter().map(|t| self.weight(t, now)).collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return None;
        }

        let mut draw = rng.gen_range(0.0..total);
        for (task, weight) in tasks.iter().zip(&weights) {
            if *weight <= 0.0 {
                continue;
            }
            if draw < *weight {
                return Some(task);
            }
            draw -= *weight;
        }
        // Float rounding can leave the draw a hair past the last band.
        tasks
            .iter()
            .zip(&weights)
            .rev()
            .find(|(_, w)| **w > 0.0)
            .map(|(task, _)| task)
    }
}
