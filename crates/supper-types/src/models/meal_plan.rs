//! Meal plans, their events, the candidate options per event and the
//! ranked votes households cast on them.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::merge::{self, Updatable};
use crate::string_enum;
use crate::validation::{self, Validate, ValidationError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealPlanStatus {
    #[default]
    AwaitingVotes,
    Finalized,
}

string_enum!(MealPlanStatus {
    AwaitingVotes => "awaiting_votes",
    Finalized => "finalized",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealName {
    Breakfast,
    SecondBreakfast,
    Brunch,
    Lunch,
    Supper,
    #[default]
    Dinner,
    Snack,
}

string_enum!(MealName {
    Breakfast => "breakfast",
    SecondBreakfast => "second_breakfast",
    Brunch => "brunch",
    Lunch => "lunch",
    Supper => "supper",
    Dinner => "dinner",
    Snack => "snack",
});

// -- Meal plans --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlan {
    pub id: String,
    pub notes: String,
    pub status: MealPlanStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub voting_deadline: DateTime<Utc>,
    pub belongs_to_household: String,
    /// Additional households whose members may vote on this plan.
    #[serde(default)]
    pub shared_with_households: Vec<String>,
    #[serde(default)]
    pub events: Vec<MealPlanEvent>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl MealPlan {
    /// The owning household followed by every household the plan is shared with.
    pub fn participating_households(&self) -> Vec<String> {
        let mut households = vec![self.belongs_to_household.clone()];
        for h in &self.shared_with_households {
            if !households.contains(h) {
                households.push(h.clone());
            }
        }
        households
    }

    pub fn is_visible_to(&self, household_id: &str) -> bool {
        self.belongs_to_household == household_id || self.shared_with_households.iter().any(|h| h == household_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanCreationInput {
    #[serde(default)]
    pub notes: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub voting_deadline: DateTime<Utc>,
    #[serde(default)]
    pub shared_with_households: Vec<String>,
    pub events: Vec<MealPlanEventCreationInput>,
}

impl Validate for MealPlanCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::max_length("notes", &self.notes, 4096)?;
        shared_households(&self.shared_with_households)?;
        if self.events.is_empty() {
            return Err(ValidationError::new("events", "a meal plan needs at least one event"));
        }
        self.events.validate().map_err(|e| e.nested("events"))?;
        for (i, event) in self.events.iter().enumerate() {
            if event.options.is_empty() {
                return Err(ValidationError::new(
                    format!("events[{}].options", i),
                    "each event needs at least one option",
                ));
            }
        }
        Ok(())
    }
}

impl MealPlanCreationInput {
    pub fn into_entity(
        self,
        next_id: &mut impl FnMut() -> String,
        household_id: &str,
        now: DateTime<Utc>,
    ) -> MealPlan {
        let plan_id = next_id();
        let events = self
            .events
            .into_iter()
            .map(|e| e.into_entity(next_id, &plan_id, now))
            .collect();
        MealPlan {
            id: plan_id,
            notes: self.notes,
            status: MealPlanStatus::AwaitingVotes,
            voting_deadline: self.voting_deadline,
            belongs_to_household: household_id.to_string(),
            shared_with_households: self
                .shared_with_households
                .into_iter()
                .filter(|h| h != household_id)
                .collect(),
            events,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub voting_deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_with_households: Option<Vec<String>>,
}

impl Validate for MealPlanUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("notes", self.notes.as_deref(), 0, 4096)?;
        if let Some(shared) = &self.shared_with_households {
            shared_households(shared)?;
        }
        Ok(())
    }
}

impl Updatable for MealPlan {
    type Input = MealPlanUpdateInput;

    fn apply(&mut self, input: MealPlanUpdateInput) {
        merge::string(&mut self.notes, input.notes);
        merge::value(&mut self.voting_deadline, input.voting_deadline);
        if let Some(shared) = input.shared_with_households {
            let owner = self.belongs_to_household.clone();
            self.shared_with_households = shared.into_iter().filter(|h| *h != owner).collect();
        }
    }

    fn to_update_input(&self) -> MealPlanUpdateInput {
        MealPlanUpdateInput {
            notes: Some(self.notes.clone()),
            voting_deadline: Some(self.voting_deadline),
            shared_with_households: Some(self.shared_with_households.clone()),
        }
    }
}

fn shared_households(households: &[String]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for (i, h) in households.iter().enumerate() {
        validation::id_ref(&format!("sharedWithHouseholds[{}]", i), h)?;
        if !seen.insert(h) {
            return Err(ValidationError::new(format!("sharedWithHouseholds[{}]", i), "duplicate household"));
        }
    }
    Ok(())
}

// -- Events --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanEvent {
    pub id: String,
    pub notes: String,
    pub meal_type: MealName,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub starts_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ends_at: DateTime<Utc>,
    pub belongs_to_meal_plan: String,
    #[serde(default)]
    pub options: Vec<MealPlanOption>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanEventCreationInput {
    #[serde(default)]
    pub notes: String,
    pub meal_type: MealName,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub starts_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub options: Vec<MealPlanOptionCreationInput>,
}

impl Validate for MealPlanEventCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::max_length("notes", &self.notes, 4096)?;
        if self.ends_at <= self.starts_at {
            return Err(ValidationError::new("endsAt", "must be after startsAt"));
        }
        self.options.validate().map_err(|e| e.nested("options"))?;
        let mut meals = HashSet::new();
        for (i, option) in self.options.iter().enumerate() {
            if !meals.insert(&option.meal_id) {
                return Err(ValidationError::new(format!("options[{}].mealID", i), "duplicate meal"));
            }
        }
        Ok(())
    }
}

impl MealPlanEventCreationInput {
    pub fn into_entity(self, next_id: &mut impl FnMut() -> String, plan_id: &str, now: DateTime<Utc>) -> MealPlanEvent {
        let event_id = next_id();
        let options = self
            .options
            .into_iter()
            .map(|o| o.into_entity(next_id(), &event_id, now))
            .collect();
        MealPlanEvent {
            id: event_id,
            notes: self.notes,
            meal_type: self.meal_type,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            belongs_to_meal_plan: plan_id.to_string(),
            options,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanEventUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_type: Option<MealName>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ends_at: Option<DateTime<Utc>>,
}

impl Validate for MealPlanEventUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("notes", self.notes.as_deref(), 0, 4096)
    }
}

impl Updatable for MealPlanEvent {
    type Input = MealPlanEventUpdateInput;

    fn apply(&mut self, input: MealPlanEventUpdateInput) {
        merge::string(&mut self.notes, input.notes);
        merge::value(&mut self.meal_type, input.meal_type);
        merge::value(&mut self.starts_at, input.starts_at);
        merge::value(&mut self.ends_at, input.ends_at);
    }

    fn to_update_input(&self) -> MealPlanEventUpdateInput {
        MealPlanEventUpdateInput {
            notes: Some(self.notes.clone()),
            meal_type: Some(self.meal_type),
            starts_at: Some(self.starts_at),
            ends_at: Some(self.ends_at),
        }
    }
}

impl MealPlanEvent {
    pub fn check(&self) -> Result<(), ValidationError> {
        if self.ends_at <= self.starts_at {
            return Err(ValidationError::new("endsAt", "must be after startsAt"));
        }
        Ok(())
    }
}

// -- Options --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanOption {
    pub id: String,
    #[serde(rename = "mealID")]
    pub meal_id: String,
    pub notes: String,
    #[serde(default)]
    pub assigned_cook: Option<String>,
    pub chosen: bool,
    pub tiebroken: bool,
    pub belongs_to_meal_plan_event: String,
    #[serde(default)]
    pub votes: Vec<MealPlanOptionVote>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanOptionCreationInput {
    #[serde(rename = "mealID")]
    pub meal_id: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub assigned_cook: Option<String>,
}

impl Validate for MealPlanOptionCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::id_ref("mealID", &self.meal_id)?;
        validation::optional_id_ref("assignedCook", self.assigned_cook.as_deref())?;
        validation::max_length("notes", &self.notes, 4096)
    }
}

impl MealPlanOptionCreationInput {
    pub fn into_entity(self, id: String, event_id: &str, now: DateTime<Utc>) -> MealPlanOption {
        MealPlanOption {
            id,
            meal_id: self.meal_id,
            notes: self.notes,
            assigned_cook: self.assigned_cook,
            chosen: false,
            tiebroken: false,
            belongs_to_meal_plan_event: event_id.to_string(),
            votes: Vec::new(),
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanOptionUpdateInput {
    #[serde(default, rename = "mealID", skip_serializing_if = "Option::is_none")]
    pub meal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "crate::nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub assigned_cook: Option<Option<String>>,
}

impl Validate for MealPlanOptionUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(meal) = &self.meal_id {
            if !meal.is_empty() {
                validation::id_ref("mealID", meal)?;
            }
        }
        if let Some(Some(cook)) = &self.assigned_cook {
            validation::id_ref("assignedCook", cook)?;
        }
        validation::optional_length("notes", self.notes.as_deref(), 0, 4096)
    }
}

impl Updatable for MealPlanOption {
    type Input = MealPlanOptionUpdateInput;

    fn apply(&mut self, input: MealPlanOptionUpdateInput) {
        merge::string(&mut self.meal_id, input.meal_id);
        merge::string(&mut self.notes, input.notes);
        merge::nullable(&mut self.assigned_cook, input.assigned_cook);
    }

    fn to_update_input(&self) -> MealPlanOptionUpdateInput {
        MealPlanOptionUpdateInput {
            meal_id: Some(self.meal_id.clone()),
            notes: Some(self.notes.clone()),
            assigned_cook: Some(self.assigned_cook.clone()),
        }
    }
}

// -- Votes --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanOptionVote {
    pub id: String,
    /// 0 is the most preferred option.
    pub rank: u32,
    pub abstain: bool,
    pub notes: String,
    pub by_user: String,
    pub by_household: String,
    pub belongs_to_meal_plan_option: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotEntry {
    pub belongs_to_meal_plan_option: String,
    #[serde(default)]
    pub rank: u32,
    #[serde(default)]
    pub abstain: bool,
    #[serde(default)]
    pub notes: String,
}

/// A household's ranking of an event's options, cast in one request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotInput {
    pub votes: Vec<BallotEntry>,
}

impl Validate for BallotInput {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.votes.is_empty() {
            return Err(ValidationError::new("votes", "a ballot needs at least one vote"));
        }
        let mut options = HashSet::new();
        let mut ranks = HashSet::new();
        for (i, vote) in self.votes.iter().enumerate() {
            validation::id_ref(&format!("votes[{}].belongsToMealPlanOption", i), &vote.belongs_to_meal_plan_option)?;
            validation::max_length(&format!("votes[{}].notes", i), &vote.notes, 1024)?;
            if !options.insert(&vote.belongs_to_meal_plan_option) {
                return Err(ValidationError::new(
                    format!("votes[{}].belongsToMealPlanOption", i),
                    "an option may only be ranked once",
                ));
            }
            if !vote.abstain && !ranks.insert(vote.rank) {
                return Err(ValidationError::new(format!("votes[{}].rank", i), "ranks must not tie"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanOptionVoteUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstain: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Validate for MealPlanOptionVoteUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("notes", self.notes.as_deref(), 0, 1024)
    }
}

impl Updatable for MealPlanOptionVote {
    type Input = MealPlanOptionVoteUpdateInput;

    fn apply(&mut self, input: MealPlanOptionVoteUpdateInput) {
        merge::value(&mut self.rank, input.rank);
        merge::value(&mut self.abstain, input.abstain);
        merge::string(&mut self.notes, input.notes);
    }

    fn to_update_input(&self) -> MealPlanOptionVoteUpdateInput {
        MealPlanOptionVoteUpdateInput {
            rank: Some(self.rank),
            abstain: Some(self.abstain),
            notes: Some(self.notes.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn counter() -> impl FnMut() -> String {
        let mut n = 0;
        move || {
            n += 1;
            format!("id{}", n)
        }
    }

    fn event(options: &[&str]) -> MealPlanEventCreationInput {
        let start = Utc::now() + Duration::days(1);
        MealPlanEventCreationInput {
            notes: String::new(),
            meal_type: MealName::Dinner,
            starts_at: start,
            ends_at: start + Duration::hours(1),
            options: options
                .iter()
                .map(|m| MealPlanOptionCreationInput { meal_id: m.to_string(), ..Default::default() })
                .collect(),
        }
    }

    #[test]
    fn plans_need_events_with_options() {
        let mut input = MealPlanCreationInput {
            notes: "wk1".into(),
            voting_deadline: Utc::now() + Duration::days(3),
            shared_with_households: vec![],
            events: vec![],
        };
        assert_eq!(input.validate().unwrap_err().field, "events");

        input.events.push(event(&[]));
        assert_eq!(input.validate().unwrap_err().field, "events[0].options");

        input.events[0] = event(&["m1", "m2"]);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn event_must_end_after_it_starts() {
        let mut e = event(&["m1"]);
        e.ends_at = e.starts_at;
        assert_eq!(e.validate().unwrap_err().field, "endsAt");
    }

    #[test]
    fn new_plans_await_votes_and_drop_self_share() {
        let input = MealPlanCreationInput {
            notes: String::new(),
            voting_deadline: Utc::now(),
            shared_with_households: vec!["h1".into(), "h2".into()],
            events: vec![event(&["m1", "m2"])],
        };
        let plan = input.into_entity(&mut counter(), "h1", Utc::now());
        assert_eq!(plan.status, MealPlanStatus::AwaitingVotes);
        assert_eq!(plan.shared_with_households, vec!["h2".to_string()]);
        assert_eq!(plan.participating_households(), vec!["h1".to_string(), "h2".to_string()]);
        assert_eq!(plan.events[0].options.len(), 2);
        assert!(plan.events[0].options.iter().all(|o| !o.chosen));
        assert!(plan.is_visible_to("h2"));
        assert!(!plan.is_visible_to("h3"));
    }

    #[test]
    fn status_parses_from_the_wire_form() {
        let json = serde_json::to_string(&MealPlanStatus::AwaitingVotes).unwrap();
        assert_eq!(json, "\"awaiting_votes\"");
        assert_eq!("finalized".parse::<MealPlanStatus>().unwrap(), MealPlanStatus::Finalized);
    }

    #[test]
    fn ballots_reject_tied_ranks_unless_abstaining() {
        let entry = |option: &str, rank: u32, abstain: bool| BallotEntry {
            belongs_to_meal_plan_option: option.into(),
            rank,
            abstain,
            notes: String::new(),
        };
        let tied = BallotInput { votes: vec![entry("o1", 0, false), entry("o2", 0, false)] };
        assert_eq!(tied.validate().unwrap_err().field, "votes[1].rank");

        let abstained = BallotInput { votes: vec![entry("o1", 0, false), entry("o2", 0, true)] };
        assert!(abstained.validate().is_ok());

        let repeated = BallotInput { votes: vec![entry("o1", 0, false), entry("o1", 1, false)] };
        assert!(repeated.validate().is_err());
    }
}
