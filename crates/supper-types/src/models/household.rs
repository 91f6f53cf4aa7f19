use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::merge::{self, Updatable};
use crate::session::HouseholdRole;
use crate::validation::{self, Validate, ValidationError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Household {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub contact_phone: Option<String>,
    pub belongs_to_user: String,
    #[serde(default)]
    pub members: Vec<HouseholdUserMembership>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdUserMembership {
    pub id: String,
    pub belongs_to_household: String,
    pub belongs_to_user: String,
    pub role: HouseholdRole,
    pub default_household: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdCreationInput {
    pub name: String,
    #[serde(default)]
    pub contact_phone: Option<String>,
}

impl Validate for HouseholdCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::required("name", &self.name)?;
        validation::max_length("name", &self.name, 128)?;
        if let Some(phone) = &self.contact_phone {
            validation::max_length("contactPhone", phone, 32)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "crate::nullable::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub contact_phone: Option<Option<String>>,
}

impl Validate for HouseholdUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("name", self.name.as_deref(), 1, 128)?;
        if let Some(Some(phone)) = &self.contact_phone {
            validation::max_length("contactPhone", phone, 32)?;
        }
        Ok(())
    }
}

impl Updatable for Household {
    type Input = HouseholdUpdateInput;

    fn apply(&mut self, input: HouseholdUpdateInput) {
        merge::string(&mut self.name, input.name);
        merge::nullable(&mut self.contact_phone, input.contact_phone);
    }

    fn to_update_input(&self) -> HouseholdUpdateInput {
        HouseholdUpdateInput {
            name: Some(self.name.clone()),
            contact_phone: Some(self.contact_phone.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyMemberPermissionsInput {
    pub new_role: HouseholdRole,
    #[serde(default)]
    pub reason: String,
}

impl Validate for ModifyMemberPermissionsInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::max_length("reason", &self.reason, 512)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdOwnershipTransferInput {
    pub current_owner: String,
    pub new_owner: String,
    #[serde(default)]
    pub reason: String,
}

impl Validate for HouseholdOwnershipTransferInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::id_ref("currentOwner", &self.current_owner)?;
        validation::id_ref("newOwner", &self.new_owner)?;
        if self.current_owner == self.new_owner {
            return Err(ValidationError::new("newOwner", "must differ from the current owner"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_with_own_input_is_a_no_op() {
        let household = Household {
            id: "h1".into(),
            name: "Home".into(),
            contact_phone: Some("555".into()),
            belongs_to_user: "u1".into(),
            ..Default::default()
        };
        let mut updated = household.clone();
        updated.apply(household.to_update_input());
        assert_eq!(updated, household);
    }

    #[test]
    fn explicit_null_clears_phone() {
        let mut household = Household { contact_phone: Some("555".into()), ..Default::default() };
        let input: HouseholdUpdateInput = serde_json::from_str(r#"{"contactPhone":null}"#).unwrap();
        household.apply(input);
        assert_eq!(household.contact_phone, None);
    }

    #[test]
    fn transfer_requires_distinct_owners() {
        let input = HouseholdOwnershipTransferInput {
            current_owner: "u1".into(),
            new_owner: "u1".into(),
            reason: String::new(),
        };
        assert_eq!(input.validate().unwrap_err().field, "newOwner");
    }
}
