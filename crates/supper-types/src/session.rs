use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::string_enum;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Unverified,
    Good,
    Banned,
    Terminated,
}

string_enum!(AccountStatus {
    Unverified => "unverified",
    Good => "good",
    Banned => "banned",
    Terminated => "terminated",
});

impl AccountStatus {
    /// Banned and terminated accounts cannot hold a session.
    pub fn may_authenticate(&self) -> bool {
        matches!(self, AccountStatus::Unverified | AccountStatus::Good)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    ServiceUser,
    ServiceAdmin,
}

string_enum!(ServiceRole {
    ServiceUser => "service_user",
    ServiceAdmin => "service_admin",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HouseholdRole {
    #[default]
    Member,
    Admin,
}

string_enum!(HouseholdRole {
    Member => "member",
    Admin => "admin",
});

/// Operations on a household that need more than plain membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HouseholdPermission {
    UpdateHousehold,
    ArchiveHousehold,
    InviteMembers,
    ModifyMemberPermissions,
    RemoveMembers,
    TransferHousehold,
    ManageWebhooks,
}

impl HouseholdRole {
    pub fn has(&self, _permission: HouseholdPermission) -> bool {
        matches!(self, HouseholdRole::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requester {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub account_status: AccountStatus,
    pub service_roles: Vec<ServiceRole>,
}

/// Who is calling, which household they act in, and what they may do in
/// each of their households.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub requester: Requester,
    #[serde(rename = "activeHouseholdID")]
    pub active_household_id: String,
    pub household_permissions: HashMap<String, HouseholdRole>,
}

impl SessionContext {
    pub fn user_id(&self) -> &str {
        &self.requester.user_id
    }

    pub fn household_id(&self) -> &str {
        &self.active_household_id
    }

    pub fn is_service_admin(&self) -> bool {
        self.requester.service_roles.contains(&ServiceRole::ServiceAdmin)
    }

    pub fn role_in(&self, household_id: &str) -> Option<HouseholdRole> {
        self.household_permissions.get(household_id).copied()
    }

    pub fn is_member_of(&self, household_id: &str) -> bool {
        self.household_permissions.contains_key(household_id)
    }

    pub fn can(&self, household_id: &str, permission: HouseholdPermission) -> bool {
        self.role_in(household_id)
            .map(|role| role.has(permission))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(role: HouseholdRole) -> SessionContext {
        SessionContext {
            requester: Requester {
                user_id: "u1".into(),
                account_status: AccountStatus::Good,
                service_roles: vec![ServiceRole::ServiceUser],
            },
            active_household_id: "h1".into(),
            household_permissions: HashMap::from([("h1".to_string(), role)]),
        }
    }

    #[test]
    fn admins_hold_household_permissions() {
        let admin = session(HouseholdRole::Admin);
        assert!(admin.can("h1", HouseholdPermission::InviteMembers));
        assert!(!admin.can("h2", HouseholdPermission::InviteMembers));

        let member = session(HouseholdRole::Member);
        assert!(member.is_member_of("h1"));
        assert!(!member.can("h1", HouseholdPermission::ManageWebhooks));
        assert!(!member.is_service_admin());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in AccountStatus::ALL {
            assert_eq!(status.as_str().parse::<AccountStatus>().unwrap(), *status);
        }
        assert!("suspended".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn banned_accounts_cannot_authenticate() {
        assert!(!AccountStatus::Banned.may_authenticate());
        assert!(!AccountStatus::Terminated.may_authenticate());
        assert!(AccountStatus::Unverified.may_authenticate());
    }
}
