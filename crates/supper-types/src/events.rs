//! The data-change envelope published after every committed mutation.
//!
//! `DataChange` carries one variant per data type, so subscribers can match
//! exhaustively on what changed instead of dispatching on a string tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids;
use crate::models::*;
use crate::string_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Archived,
    Finalized,
    FinalizationRequested,
    BallotCast,
    TwoFactorSecretVerified,
    TwoFactorSecretChanged,
    PasswordChanged,
    LoggedIn,
    LoggedOut,
    ActiveHouseholdChanged,
    AccountStatusChanged,
    AvatarUploaded,
    InvitationAccepted,
    InvitationRejected,
    InvitationCancelled,
    MemberRemoved,
    MemberPermissionsChanged,
    OwnershipTransferred,
}

string_enum!(EventType {
    Created => "created",
    Updated => "updated",
    Archived => "archived",
    Finalized => "finalized",
    FinalizationRequested => "finalization_requested",
    BallotCast => "ballot_cast",
    TwoFactorSecretVerified => "two_factor_secret_verified",
    TwoFactorSecretChanged => "two_factor_secret_changed",
    PasswordChanged => "password_changed",
    LoggedIn => "logged_in",
    LoggedOut => "logged_out",
    ActiveHouseholdChanged => "active_household_changed",
    AccountStatusChanged => "account_status_changed",
    AvatarUploaded => "avatar_uploaded",
    InvitationAccepted => "invitation_accepted",
    InvitationRejected => "invitation_rejected",
    InvitationCancelled => "invitation_cancelled",
    MemberRemoved => "member_removed",
    MemberPermissionsChanged => "member_permissions_changed",
    OwnershipTransferred => "ownership_transferred",
});

/// Either the entity's state after the change, or just its ID when the
/// state is gone (archival) or not worth carrying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Change<T> {
    State(T),
    Reference { id: String },
}

impl<T> Change<T> {
    pub fn state(&self) -> Option<&T> {
        match self {
            Change::State(t) => Some(t),
            Change::Reference { .. } => None,
        }
    }
}

/// Implemented by every entity that appears in a data-change message.
pub trait Entity: Clone {
    const DATA_TYPE: DataType;

    fn id(&self) -> &str;

    /// A change carrying a copy of this entity.
    fn to_change(&self) -> DataChange;

    /// A change carrying only an ID of this entity's type.
    fn reference(id: impl Into<String>) -> DataChange;
}

macro_rules! data_changes {
    ($($variant:ident($ty:ty) => $text:literal),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum DataType {
            $($variant),+
        }

        string_enum!(DataType { $($variant => $text),+ });

        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "dataType", content = "data", rename_all = "snake_case")]
        pub enum DataChange {
            $($variant(Change<$ty>)),+
        }

        impl DataChange {
            pub fn data_type(&self) -> DataType {
                match self {
                    $(DataChange::$variant(_) => DataType::$variant),+
                }
            }

            pub fn entity_id(&self) -> &str {
                match self {
                    $(
                        DataChange::$variant(Change::State(e)) => &e.id,
                        DataChange::$variant(Change::Reference { id }) => id,
                    )+
                }
            }
        }

        $(
            impl Entity for $ty {
                const DATA_TYPE: DataType = DataType::$variant;

                fn id(&self) -> &str {
                    &self.id
                }

                fn to_change(&self) -> DataChange {
                    DataChange::$variant(Change::State(self.clone()))
                }

                fn reference(id: impl Into<String>) -> DataChange {
                    DataChange::$variant(Change::Reference { id: id.into() })
                }
            }
        )+
    };
}

data_changes! {
    User(User) => "user",
    Household(Household) => "household",
    HouseholdUserMembership(HouseholdUserMembership) => "household_user_membership",
    HouseholdInvitation(HouseholdInvitation) => "household_invitation",
    ValidIngredient(ValidIngredient) => "valid_ingredient",
    ValidPreparation(ValidPreparation) => "valid_preparation",
    ValidInstrument(ValidInstrument) => "valid_instrument",
    ValidMeasurementUnit(ValidMeasurementUnit) => "valid_measurement_unit",
    ValidIngredientPreparation(ValidIngredientPreparation) => "valid_ingredient_preparation",
    ValidPreparationInstrument(ValidPreparationInstrument) => "valid_preparation_instrument",
    ValidIngredientMeasurementUnit(ValidIngredientMeasurementUnit) => "valid_ingredient_measurement_unit",
    Recipe(Recipe) => "recipe",
    RecipeStep(RecipeStep) => "recipe_step",
    RecipeStepIngredient(RecipeStepIngredient) => "recipe_step_ingredient",
    RecipeStepInstrument(RecipeStepInstrument) => "recipe_step_instrument",
    RecipeStepProduct(RecipeStepProduct) => "recipe_step_product",
    Meal(Meal) => "meal",
    MealPlan(MealPlan) => "meal_plan",
    MealPlanEvent(MealPlanEvent) => "meal_plan_event",
    MealPlanOption(MealPlanOption) => "meal_plan_option",
    MealPlanOptionVote(MealPlanOptionVote) => "meal_plan_option_vote",
    AdvancedPrepStep(AdvancedPrepStep) => "advanced_prep_step",
    Webhook(Webhook) => "webhook",
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChangeMessage {
    pub id: String,
    pub event_type: EventType,
    pub payload: DataChange,
    #[serde(rename = "userID", default)]
    pub user_id: Option<String>,
    #[serde(rename = "householdID", default)]
    pub household_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl DataChangeMessage {
    pub fn new(event_type: EventType, payload: DataChange) -> Self {
        Self {
            id: ids::new_id(),
            event_type,
            payload,
            user_id: None,
            household_id: None,
            timestamp: crate::time::now(),
        }
    }

    pub fn of<E: Entity>(event_type: EventType, entity: &E) -> Self {
        Self::new(event_type, entity.to_change())
    }

    pub fn by_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn in_household(mut self, household_id: impl Into<String>) -> Self {
        self.household_id = Some(household_id.into());
        self
    }

    pub fn data_type(&self) -> DataType {
        self.payload.data_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_tagged_with_its_data_type() {
        let msg = DataChangeMessage::new(EventType::Archived, Recipe::reference("r1"))
            .by_user("u1")
            .in_household("h1");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["eventType"], "archived");
        assert_eq!(json["payload"]["dataType"], "recipe");
        assert_eq!(json["payload"]["data"]["id"], "r1");
        assert_eq!(json["householdID"], "h1");

        let back: DataChangeMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.data_type(), DataType::Recipe);
        assert_eq!(back.payload.entity_id(), "r1");
    }

    #[test]
    fn state_payloads_carry_the_entity() {
        let meal = Meal { id: "m1".into(), name: "stew".into(), created_at: crate::time::now(), ..Default::default() };
        let msg = DataChangeMessage::of(EventType::Created, &meal);
        match &msg.payload {
            DataChange::Meal(change) => assert_eq!(change.state().map(|m| m.name.as_str()), Some("stew")),
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(msg.payload.entity_id(), "m1");
    }

    #[test]
    fn data_type_strings_match_serde() {
        for dt in DataType::ALL {
            let json = serde_json::to_value(dt).unwrap();
            assert_eq!(json, dt.as_str());
        }
        for et in EventType::ALL {
            assert_eq!(serde_json::to_value(et).unwrap(), et.as_str());
        }
    }
}
