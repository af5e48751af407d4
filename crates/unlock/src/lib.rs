#![deny(warnings)]

//! Unlock resolution: which steps are open and which one is next.
//!
//! Both sets are derived on every call from the catalog and the progress
//! set; nothing is cached, so a fresh read always reflects the latest
//! completion.

use journey_core::{Catalog, Step, StepId};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::trace;

/// Result of looking up the next actionable step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CurrentStep<'a> {
    /// Lowest-order unlocked step that is not completed yet.
    Step(&'a Step),
    /// Every step is completed.
    Complete,
}

impl<'a> CurrentStep<'a> {
    pub fn step(self) -> Option<&'a Step> {
        match self {
            CurrentStep::Step(s) => Some(s),
            CurrentStep::Complete => None,
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(self, CurrentStep::Complete)
    }
}

/// Steps open for entry: the first step, any step whose predecessor is
/// completed, and every completed step.
pub fn unlocked_steps(catalog: &Catalog, progress: &BTreeSet<StepId>) -> BTreeSet<StepId> {
    let mut open = BTreeSet::new();
    for step in catalog.steps() {
        let prev_done = catalog
            .predecessor(step)
            .map_or(true, |prev| progress.contains(&prev.id));
        if prev_done || progress.contains(&step.id) {
            open.insert(step.id.clone());
        }
    }
    trace!(open = open.len(), completed = progress.len(), "resolved unlocked steps");
    open
}

/// Minimum-order member of `unlocked` absent from `progress`.
pub fn current_step<'a>(
    catalog: &'a Catalog,
    unlocked: &BTreeSet<StepId>,
    progress: &BTreeSet<StepId>,
) -> CurrentStep<'a> {
    catalog
        .steps()
        .iter()
        .find(|s| unlocked.contains(&s.id) && !progress.contains(&s.id))
        .map_or(CurrentStep::Complete, CurrentStep::Step)
}

/// Whether every catalog step is in `progress`. Unknown ids are ignored.
pub fn is_journey_complete(catalog: &Catalog, progress: &BTreeSet<StepId>) -> bool {
    catalog.ids().all(|id| progress.contains(id))
}

/// Whether `id` may be entered right now.
pub fn is_unlocked(catalog: &Catalog, progress: &BTreeSet<StepId>, id: &str) -> bool {
    let Some(step) = catalog.get(id) else {
        return false;
    };
    progress.contains(id)
        || catalog
            .predecessor(step)
            .map_or(true, |prev| progress.contains(&prev.id))
}

/// Display status of a single step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Locked,
    Open,
    Completed,
}

/// One row of the summary list.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepSummary {
    pub id: StepId,
    pub order: u32,
    pub status: StepStatus,
    pub heart_found: bool,
}

/// Whole-journey snapshot for the summary/tickets view.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JourneyStatus {
    pub steps: Vec<StepSummary>,
    pub completed: usize,
    pub total: usize,
    pub hearts_found: usize,
    pub current: Option<StepId>,
    pub complete: bool,
}

/// Summarize progress and collectibles against the catalog.
pub fn journey_status(
    catalog: &Catalog,
    progress: &BTreeSet<StepId>,
    hearts: &BTreeSet<StepId>,
) -> JourneyStatus {
    let unlocked = unlocked_steps(catalog, progress);
    let current = current_step(catalog, &unlocked, progress);
    let steps: Vec<StepSummary> = catalog
        .steps()
        .iter()
        .map(|s| {
            let status = if progress.contains(&s.id) {
                StepStatus::Completed
            } else if unlocked.contains(&s.id) {
                StepStatus::Open
            } else {
                StepStatus::Locked
            };
            StepSummary {
                id: s.id.clone(),
                order: s.order,
                status,
                heart_found: hearts.contains(&s.id),
            }
        })
        .collect();
    JourneyStatus {
        completed: steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count(),
        hearts_found: steps.iter().filter(|s| s.heart_found).count(),
        total: catalog.len(),
        current: current.step().map(|s| s.id.clone()),
        complete: current.is_complete(),
        steps,
    }
}
