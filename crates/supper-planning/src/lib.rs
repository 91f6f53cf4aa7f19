//! Meal-plan voting and scheduling rules. Everything here is pure: callers
//! load the plan, hand it over, and persist the outcome.

pub mod ballot;
pub mod finalize;
pub mod prep;
pub mod tally;

pub use ballot::{BallotError, check_ballot};
pub use finalize::{Decision, EventOutcome, decide};
pub use prep::{PrepWindow, derive_prep_windows};
pub use tally::{Tally, tally_event};
