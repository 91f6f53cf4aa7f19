//! Entities and their request inputs, grouped by aggregate.

pub mod household;
pub mod invitation;
pub mod meal;
pub mod meal_plan;
pub mod prep_step;
pub mod recipe;
pub mod user;
pub mod valid;
pub mod webhook;

pub use household::*;
pub use invitation::*;
pub use meal::*;
pub use meal_plan::*;
pub use prep_step::*;
pub use recipe::*;
pub use user::*;
pub use valid::*;
pub use webhook::*;
