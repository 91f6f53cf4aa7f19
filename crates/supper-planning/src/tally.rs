//! Positional (Borda) tally with a plan-seeded tie-break.
//!
//! Each complete ballot gives an option `N - rank` points, where `N` is the
//! event's option count and rank 0 is the favourite. Abstentions and
//! households without a complete ballot contribute nothing.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use supper_types::models::MealPlanEvent;

use crate::ballot::ballots_for;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    /// Points per option ID, in the event's option order.
    pub scores: Vec<(String, u64)>,
    pub winner: String,
    pub tiebroken: bool,
    pub complete_ballots: usize,
}

/// Tallies one event. Returns `None` for an event without options.
pub fn tally_event(plan_id: &str, event: &MealPlanEvent, households: &[String]) -> Option<Tally> {
    if event.options.is_empty() {
        return None;
    }
    let n = event.options.len() as u64;
    let mut points: HashMap<&str, u64> = event.options.iter().map(|o| (o.id.as_str(), 0)).collect();

    let mut complete = 0;
    for ballot in ballots_for(event, households) {
        if !ballot.is_complete(event) {
            continue;
        }
        complete += 1;
        for vote in ballot.votes.iter().filter(|v| !v.abstain) {
            if let Some(p) = points.get_mut(vote.belongs_to_meal_plan_option.as_str()) {
                *p += n.saturating_sub(u64::from(vote.rank));
            }
        }
    }

    let scores: Vec<(String, u64)> = event
        .options
        .iter()
        .map(|o| (o.id.clone(), points.get(o.id.as_str()).copied().unwrap_or(0)))
        .collect();
    let best = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
    let mut leaders: Vec<&str> = scores.iter().filter(|(_, s)| *s == best).map(|(id, _)| id.as_str()).collect();

    let (winner, tiebroken) = if leaders.len() == 1 {
        (leaders[0].to_string(), false)
    } else {
        leaders.sort_unstable();
        (break_tie(plan_id, &event.id, &leaders).to_string(), true)
    };

    Some(Tally { scores, winner, tiebroken, complete_ballots: complete })
}

/// Picks uniformly among `tied` (sorted by ID) with an RNG seeded from the
/// plan and event IDs, so re-running finalization picks the same option.
fn break_tie<'a>(plan_id: &str, event_id: &str, tied: &[&'a str]) -> &'a str {
    let mut hasher = Sha256::new();
    hasher.update(plan_id.as_bytes());
    hasher.update(b":");
    hasher.update(event_id.as_bytes());
    let digest = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);

    let mut rng = StdRng::seed_from_u64(u64::from_be_bytes(seed));
    tied[rng.random_range(0..tied.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use supper_types::models::{MealPlanOption, MealPlanOptionVote};

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

    fn vote(e: &mut MealPlanEvent, household: &str, option: &str, rank: u32) {
        let opt = e.options.iter_mut().find(|o| o.id == option).unwrap();
        opt.votes.push(MealPlanOptionVote {
            by_household: household.into(),
            belongs_to_meal_plan_option: option.into(),
            rank,
            ..Default::default()
        });
    }

    fn households(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unanimous_first_choice_wins() {
        let mut e = event(&["m1", "m2"]);
        for h in ["h1", "h2"] {
            vote(&mut e, h, "m1", 0);
            vote(&mut e, h, "m2", 1);
        }
        let t = tally_event("p1", &e, &households(&["h1", "h2"])).unwrap();
        assert_eq!(t.winner, "m1");
        assert!(!t.tiebroken);
        assert_eq!(t.scores, vec![("m1".to_string(), 4), ("m2".to_string(), 2)]);
        assert_eq!(t.complete_ballots, 2);
    }

    #[test]
    fn incomplete_ballots_are_ignored() {
        let mut e = event(&["m1", "m2", "m3"]);
        vote(&mut e, "h1", "m3", 0);
        vote(&mut e, "h1", "m1", 1);
        vote(&mut e, "h1", "m2", 2);
        // h2 only ranked one option
        vote(&mut e, "h2", "m2", 0);
        let t = tally_event("p1", &e, &households(&["h1", "h2"])).unwrap();
        assert_eq!(t.winner, "m3");
        assert_eq!(t.complete_ballots, 1);
    }

    #[test]
    fn tie_break_is_deterministic_per_plan() {
        let mut e = event(&["m1", "m2"]);
        vote(&mut e, "h1", "m1", 0);
        vote(&mut e, "h1", "m2", 1);
        vote(&mut e, "h2", "m2", 0);
        vote(&mut e, "h2", "m1", 1);
        let hh = households(&["h1", "h2"]);

        let first = tally_event("plan-a", &e, &hh).unwrap();
        assert!(first.tiebroken);
        for _ in 0..10 {
            assert_eq!(tally_event("plan-a", &e, &hh).unwrap().winner, first.winner);
        }
    }

    #[test]
    fn tie_break_ignores_option_order() {
        let e1 = event(&["m1", "m2", "m3"]);
        let e2 = event(&["m3", "m1", "m2"]);
        let hh = households(&["h1"]);
        assert_eq!(tally_event("p", &e1, &hh).unwrap().winner, tally_event("p", &e2, &hh).unwrap().winner);
    }

    #[test]
    fn votes_from_outside_households_do_not_count() {
        let mut e = event(&["m1", "m2"]);
        vote(&mut e, "h1", "m2", 0);
        vote(&mut e, "h1", "m1", 1);
        vote(&mut e, "stranger", "m1", 0);
        vote(&mut e, "stranger", "m2", 1);
        let t = tally_event("p", &e, &households(&["h1"])).unwrap();
        assert_eq!(t.winner, "m2");
    }

    #[test]
    fn events_without_options_have_no_tally() {
        assert!(tally_event("p", &event(&[]), &households(&["h1"])).is_none());
    }
}
