//! Decides whether a meal plan can be finalized, and with which options.

use chrono::{DateTime, Utc};
use supper_types::models::{MealPlan, MealPlanStatus};
use tracing::debug;

use crate::tally::{Tally, tally_event};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOutcome {
    pub event_id: String,
    pub option_id: String,
    pub tiebroken: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Every event is resolvable; mark these options chosen and the plan finalized.
    Finalize(Vec<EventOutcome>),
    /// At least one event is still open for voting. Nothing should be written.
    Pending { open_events: Vec<String> },
    /// An event has no options to choose from.
    Blocked { event_id: String },
    AlreadyFinalized,
}

/// An event is resolvable once the voting deadline has passed or every
/// participating household has cast a complete ballot for it. The plan is
/// finalized only when all of its events are resolvable.
pub fn decide(plan: &MealPlan, now: DateTime<Utc>) -> Decision {
    if plan.status == MealPlanStatus::Finalized {
        return Decision::AlreadyFinalized;
    }

    let households = plan.participating_households();
    let deadline_passed = plan.voting_deadline <= now;
    let mut outcomes = Vec::with_capacity(plan.events.len());
    let mut open_events = Vec::new();

    for event in plan.events.iter().filter(|e| e.archived_at.is_none()) {
        let Some(Tally { winner, tiebroken, complete_ballots, .. }) = tally_event(&plan.id, event, &households) else {
            return Decision::Blocked { event_id: event.id.clone() };
        };

        let all_voted = complete_ballots == households.len();
        if !deadline_passed && !all_voted {
            open_events.push(event.id.clone());
            continue;
        }

        debug!(meal_plan_id = %plan.id, event_id = %event.id, option_id = %winner, tiebroken, "event resolved");
        outcomes.push(EventOutcome { event_id: event.id.clone(), option_id: winner, tiebroken });
    }

    // A plan with no live events has nothing to finalize either.
    if !open_events.is_empty() || outcomes.is_empty() {
        return Decision::Pending { open_events };
    }
    Decision::Finalize(outcomes)
}
