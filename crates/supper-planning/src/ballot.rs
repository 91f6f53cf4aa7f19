use std::collections::HashSet;

use supper_types::models::{BallotInput, MealPlanEvent, MealPlanOptionVote};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BallotError {
    #[error("option {0} does not belong to this event")]
    UnknownOption(String),
    #[error("rank {rank} is out of range for {options} options")]
    RankOutOfRange { rank: u32, options: usize },
}

impl BallotError {
    /// The input field the error refers to, for the error code.
    pub fn field(&self, index: usize) -> String {
        match self {
            BallotError::UnknownOption(_) => format!("votes[{}].belongsToMealPlanOption", index),
            BallotError::RankOutOfRange { .. } => format!("votes[{}].rank", index),
        }
    }
}

/// Checks a ballot against the event it is cast on. Returns the index of the
/// offending vote with the error. Ranks run from 0 to N-1 for N options.
pub fn check_ballot(event: &MealPlanEvent, ballot: &BallotInput) -> Result<(), (usize, BallotError)> {
    let options: HashSet<&str> = event.options.iter().map(|o| o.id.as_str()).collect();
    for (i, vote) in ballot.votes.iter().enumerate() {
        if !options.contains(vote.belongs_to_meal_plan_option.as_str()) {
            return Err((i, BallotError::UnknownOption(vote.belongs_to_meal_plan_option.clone())));
        }
        if !vote.abstain && vote.rank as usize >= options.len() {
            return Err((i, BallotError::RankOutOfRange { rank: vote.rank, options: options.len() }));
        }
    }
    Ok(())
}

/// A household's ballot for one event, assembled from its stored votes.
#[derive(Debug, Clone)]
pub struct HouseholdBallot<'a> {
    pub household_id: &'a str,
    pub votes: Vec<&'a MealPlanOptionVote>,
}

impl HouseholdBallot<'_> {
    /// A ballot is complete when it covers every option of the event.
    pub fn is_complete(&self, event: &MealPlanEvent) -> bool {
        let covered: HashSet<&str> = self.votes.iter().map(|v| v.belongs_to_meal_plan_option.as_str()).collect();
        event.options.iter().all(|o| covered.contains(o.id.as_str()))
    }
}

/// Groups an event's votes by participating household. Votes from
/// households that do not participate are dropped.
pub fn ballots_for<'a>(event: &'a MealPlanEvent, households: &'a [String]) -> Vec<HouseholdBallot<'a>> {
    households
        .iter()
        .map(|h| HouseholdBallot {
            household_id: h.as_str(),
            votes: event
                .options
                .iter()
                .flat_map(|o| o.votes.iter())
                .filter(|v| v.by_household == *h && v.archived_at.is_none())
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use supper_types::models::{BallotEntry, MealPlanOption};

    fn event(options: &[&str]) -> MealPlanEvent {
        MealPlanEvent {
            id: "e1".into(),
            options: options
                .iter()
                .map(|id| MealPlanOption { id: id.to_string(), ..Default::default() })
                .collect(),
            ..Default::default()
        }
    }

    fn entry(option: &str, rank: u32) -> BallotEntry {
        BallotEntry { belongs_to_meal_plan_option: option.into(), rank, abstain: false, notes: String::new() }
    }

    #[test]
    fn rank_must_fit_the_option_count() {
        let e = event(&["o1", "o2"]);
        let ok = BallotInput { votes: vec![entry("o1", 0), entry("o2", 1)] };
        assert!(check_ballot(&e, &ok).is_ok());

        let bad = BallotInput { votes: vec![entry("o1", 0), entry("o2", 2)] };
        let (i, err) = check_ballot(&e, &bad).unwrap_err();
        assert_eq!(i, 1);
        assert_eq!(err.field(i), "votes[1].rank");
    }

    #[test]
    fn options_from_other_events_are_rejected() {
        let e = event(&["o1"]);
        let bad = BallotInput { votes: vec![entry("o9", 0)] };
        assert!(matches!(check_ballot(&e, &bad), Err((0, BallotError::UnknownOption(_)))));
    }

    #[test]
    fn ballots_are_complete_only_when_covering_every_option() {
        let mut e = event(&["o1", "o2"]);
        e.options[0].votes.push(MealPlanOptionVote {
            by_household: "h1".into(),
            belongs_to_meal_plan_option: "o1".into(),
            ..Default::default()
        });
        let households = vec!["h1".to_string()];
        let ballots = ballots_for(&e, &households);
        assert!(!ballots[0].is_complete(&e));

        e.options[1].votes.push(MealPlanOptionVote {
            by_household: "h1".into(),
            belongs_to_meal_plan_option: "o2".into(),
            rank: 1,
            ..Default::default()
        });
        let ballots = ballots_for(&e, &households);
        assert!(ballots[0].is_complete(&e));
    }
}
