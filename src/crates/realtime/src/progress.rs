//! Progress aggregation
//!
//! [`aggregate`] reduces an ordered step list to one overall percentage and a
//! "current step" index; [`TaskProgressView`] is the render-ready value built
//! from a whole [`TaskSnapshot`]. Both are pure, so feeding the same snapshot
//! twice yields the same view.

use crate::types::{StepRecord, StepStatus, TaskSnapshot, TaskStatus};
use serde::{Deserialize, Serialize};

/// Output of [`aggregate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepAggregate {
    /// Mean step progress, 0..=100
    pub overall_progress: u8,
    /// Index of the step to highlight
    pub current_step_index: usize,
}

/// Progress a step contributes to the mean.
fn step_progress(step: &StepRecord) -> u64 {
    match step.status {
        StepStatus::Completed => 100,
        _ => u64::from(step.progress.min(100)),
    }
}

/// Reduce ordered steps to overall progress and the current step.
///
/// Every step weighs the same; completed steps count as 100 and the others
/// count what they report. The current step is the first running one, else
/// the one after the last completed step, else 0. An empty list yields zeros.
pub fn aggregate(steps: &[StepRecord]) -> StepAggregate {
    if steps.is_empty() {
        return StepAggregate::default();
    }

    let count = steps.len() as u64;
    let total: u64 = steps.iter().map(step_progress).sum();
    // round half up: (2 * total + count) / (2 * count)
    let mean = (2 * total + count) / (2 * count);

    let current_step_index = steps
        .iter()
        .position(|step| step.status == StepStatus::Running)
        .or_else(|| {
            steps
                .iter()
                .rposition(|step| step.status == StepStatus::Completed)
                .map(|index| index + 1)
        })
        .unwrap_or(0);

    StepAggregate {
        overall_progress: mean.min(100) as u8,
        current_step_index,
    }
}

/// Render-ready progress of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgressView {
    /// Task identifier
    pub task_id: String,

    /// Task status as last reported
    pub status: TaskStatus,

    /// Overall progress, 0..=100
    pub overall_progress: u8,

    /// Index into `steps`; equals `steps.len()` once every step is done
    pub current_step_index: usize,

    /// Name of the current step, if the index points at one
    pub current_step_name: Option<String>,

    /// Steps sorted by order
    pub steps: Vec<StepRecord>,

    /// First failure message among the steps
    pub error_message: Option<String>,
}

impl TaskProgressView {
    /// View shown before any update has arrived
    pub fn empty(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            overall_progress: 0,
            current_step_index: 0,
            current_step_name: None,
            steps: Vec::new(),
            error_message: None,
        }
    }

    /// Build the view for a snapshot.
    ///
    /// Step-derived progress wins over the server-supplied figure; without
    /// steps the server figure is used, falling back to 100 for a completed
    /// task and 0 otherwise.
    pub fn from_snapshot(snapshot: &TaskSnapshot) -> Self {
        let mut steps = snapshot.steps.clone();
        steps.sort_by_key(|step| step.order);

        let aggregate = aggregate(&steps);
        let overall_progress = if steps.is_empty() {
            match (snapshot.overall_progress, snapshot.status) {
                (Some(progress), _) => progress.min(100) as u8,
                (None, TaskStatus::Completed) => 100,
                (None, _) => 0,
            }
        } else {
            aggregate.overall_progress
        };

        let current_step_name = steps
            .get(aggregate.current_step_index)
            .map(|step| step.name.clone());
        let error_message = steps
            .iter()
            .filter(|step| step.status == StepStatus::Failed)
            .find_map(|step| step.error_message.clone());

        Self {
            task_id: snapshot.task_id.clone(),
            status: snapshot.status,
            overall_progress,
            current_step_index: aggregate.current_step_index,
            current_step_name,
            steps,
            error_message,
        }
    }

    /// Whether the task has finished
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn step(status: StepStatus, progress: u32) -> StepRecord {
        StepRecord::new("step", 0, status, progress)
    }

    #[test]
    fn test_aggregate_mixed_steps() {
        let steps = vec![
            step(StepStatus::Completed, 100),
            step(StepStatus::Running, 40),
            step(StepStatus::Pending, 0),
        ];

        let result = aggregate(&steps);

        assert_eq!(result.overall_progress, 47);
        assert_eq!(result.current_step_index, 1);
    }

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(
            aggregate(&[]),
            StepAggregate {
                overall_progress: 0,
                current_step_index: 0
            }
        );
    }

    #[test]
    fn test_completed_counts_as_full() {
        // Servers sometimes leave progress at 0 on completed steps
        let steps = vec![step(StepStatus::Completed, 0), step(StepStatus::Pending, 0)];
        let result = aggregate(&steps);
        assert_eq!(result.overall_progress, 50);
        assert_eq!(result.current_step_index, 1);
    }

    #[test]
    fn test_current_step_past_end_when_all_completed() {
        let steps = vec![
            step(StepStatus::Completed, 100),
            step(StepStatus::Completed, 100),
        ];
        let result = aggregate(&steps);
        assert_eq!(result.overall_progress, 100);
        assert_eq!(result.current_step_index, 2);
    }

    #[test]
    fn test_first_running_step_wins() {
        let steps = vec![
            step(StepStatus::Completed, 100),
            step(StepStatus::Running, 10),
            step(StepStatus::Running, 90),
        ];
        assert_eq!(aggregate(&steps).current_step_index, 1);
    }

    #[test]
    fn test_no_running_or_completed_points_at_start() {
        let steps = vec![step(StepStatus::Pending, 0), step(StepStatus::Failed, 30)];
        let result = aggregate(&steps);
        assert_eq!(result.current_step_index, 0);
        assert_eq!(result.overall_progress, 15);
    }

    #[test]
    fn test_rounds_half_up() {
        let steps = vec![step(StepStatus::Running, 1), step(StepStatus::Pending, 0)];
        assert_eq!(aggregate(&steps).overall_progress, 1);
    }

    #[test]
    fn test_out_of_range_progress_is_clamped() {
        let steps = vec![step(StepStatus::Running, 250)];
        assert_eq!(aggregate(&steps).overall_progress, 100);
    }

    #[test]
    fn test_view_from_snapshot_sorts_and_names_current_step() {
        let snapshot = TaskSnapshot::new("task-1", TaskStatus::Running).with_steps(vec![
            StepRecord::new("embed", 3, StepStatus::Pending, 0),
            StepRecord::new("upload", 1, StepStatus::Completed, 100),
            StepRecord::new("parse", 2, StepStatus::Running, 40),
        ]);

        let view = TaskProgressView::from_snapshot(&snapshot);

        assert_eq!(view.overall_progress, 47);
        assert_eq!(view.current_step_index, 1);
        assert_eq!(view.current_step_name.as_deref(), Some("parse"));
        assert_eq!(view.steps[0].name, "upload");
    }

    #[test]
    fn test_view_without_steps_uses_server_progress() {
        let snapshot = TaskSnapshot::new("t", TaskStatus::Running).with_overall_progress(63);
        assert_eq!(TaskProgressView::from_snapshot(&snapshot).overall_progress, 63);

        let done = TaskSnapshot::new("t", TaskStatus::Completed);
        assert_eq!(TaskProgressView::from_snapshot(&done).overall_progress, 100);

        let queued = TaskSnapshot::new("t", TaskStatus::Pending);
        assert_eq!(TaskProgressView::from_snapshot(&queued).overall_progress, 0);
    }

    #[test]
    fn test_view_surfaces_step_error() {
        let snapshot = TaskSnapshot::new("t", TaskStatus::Failed).with_steps(vec![
            StepRecord::new("upload", 1, StepStatus::Completed, 100),
            StepRecord::new("parse", 2, StepStatus::Failed, 20).with_error("bad pdf"),
        ]);

        let view = TaskProgressView::from_snapshot(&snapshot);

        assert!(view.is_terminal());
        assert_eq!(view.error_message.as_deref(), Some("bad pdf"));
        assert_eq!(view.current_step_name.as_deref(), Some("parse"));
    }

    #[test]
    fn test_same_snapshot_twice_gives_same_view() {
        let snapshot = TaskSnapshot::new("t", TaskStatus::Running).with_steps(vec![
            StepRecord::new("a", 2, StepStatus::Running, 10),
            StepRecord::new("b", 1, StepStatus::Completed, 100),
        ]);

        let first = TaskProgressView::from_snapshot(&snapshot);
        let second = TaskProgressView::from_snapshot(&snapshot);

        assert_eq!(first, second);
    }

    fn arb_status() -> impl Strategy<Value = StepStatus> {
        prop_oneof![
            Just(StepStatus::Pending),
            Just(StepStatus::Running),
            Just(StepStatus::Completed),
            Just(StepStatus::Failed),
        ]
    }

    proptest! {
        #[test]
        fn prop_aggregate_stays_in_bounds(
            raw in prop::collection::vec((arb_status(), 0u32..=100), 0..20)
        ) {
            let steps: Vec<_> = raw.iter().map(|(s, p)| step(*s, *p)).collect();
            let result = aggregate(&steps);

            prop_assert!(result.overall_progress <= 100);
            prop_assert!(result.current_step_index <= steps.len());
            prop_assert_eq!(result, aggregate(&steps));
        }

        #[test]
        fn prop_completing_a_step_never_lowers_progress(
            raw in prop::collection::vec((arb_status(), 0u32..=100), 1..20),
            pick in any::<prop::sample::Index>(),
        ) {
            let mut steps: Vec<_> = raw.iter().map(|(s, p)| step(*s, *p)).collect();
            let before = aggregate(&steps).overall_progress;

            let i = pick.index(steps.len());
            steps[i].status = StepStatus::Completed;
            steps[i].progress = 100;

            prop_assert!(aggregate(&steps).overall_progress >= before);
        }
    }
}
