use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{AccountStatus, ServiceRole};
use crate::validation::{self, Validate, ValidationError};

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 64;
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub avatar_src: Option<String>,
    #[serde(skip)]
    pub hashed_password: String,
    #[serde(skip)]
    pub two_factor_secret: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub two_factor_secret_verified_at: Option<DateTime<Utc>>,
    pub service_roles: Vec<ServiceRole>,
    pub account_status: AccountStatus,
    #[serde(default)]
    pub account_status_explanation: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn two_factor_verified(&self) -> bool {
        self.two_factor_secret_verified_at.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistrationInput {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default, rename = "invitationID")]
    pub invitation_id: Option<String>,
    #[serde(default)]
    pub invitation_token: Option<String>,
}

impl Validate for UserRegistrationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::length("username", &self.username, MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH)?;
        if self.username.contains(':') || self.username.chars().any(char::is_whitespace) {
            return Err(ValidationError::new("username", "must not contain ':' or whitespace"));
        }
        validation::length("password", &self.password, MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH)?;
        if let Some(email) = &self.email_address {
            validation::email("emailAddress", email)?;
        }
        match (&self.invitation_id, &self.invitation_token) {
            (Some(id), Some(token)) => {
                validation::id_ref("invitationID", id)?;
                validation::required("invitationToken", token)?;
            }
            (None, None) => {}
            _ => {
                return Err(ValidationError::new(
                    "invitationToken",
                    "invitationID and invitationToken must be supplied together",
                ));
            }
        }
        Ok(())
    }
}

/// Signup response: the new account plus its two-factor provisioning data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreationResponse {
    pub id: String,
    pub username: String,
    pub email_address: Option<String>,
    pub account_status: AccountStatus,
    pub two_factor_secret: String,
    pub qr_code: String,
    #[serde(rename = "householdID")]
    pub household_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotpSecretVerificationInput {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub totp_token: String,
}

impl Validate for TotpSecretVerificationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::id_ref("userID", &self.user_id)?;
        totp_token("totpToken", &self.totp_token)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginInput {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub totp_token: Option<String>,
}

impl Validate for LoginInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::required("username", &self.username)?;
        validation::required("password", &self.password)?;
        if let Some(token) = &self.totp_token {
            totp_token("totpToken", token)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusResponse {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub account_status: AccountStatus,
    #[serde(rename = "activeHouseholdID")]
    pub active_household_id: String,
    pub user_is_authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordUpdateInput {
    pub current_password: String,
    pub new_password: String,
    #[serde(default)]
    pub totp_token: Option<String>,
}

impl Validate for PasswordUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::required("currentPassword", &self.current_password)?;
        validation::length("newPassword", &self.new_password, MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH)?;
        if self.new_password == self.current_password {
            return Err(ValidationError::new("newPassword", "must differ from the current password"));
        }
        if let Some(token) = &self.totp_token {
            totp_token("totpToken", token)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotpSecretRefreshInput {
    pub current_password: String,
    #[serde(default)]
    pub totp_token: Option<String>,
}

impl Validate for TotpSecretRefreshInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::required("currentPassword", &self.current_password)?;
        if let Some(token) = &self.totp_token {
            totp_token("totpToken", token)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotpSecretRefreshResponse {
    pub two_factor_secret: String,
    pub qr_code: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccountStatusUpdateInput {
    #[serde(rename = "targetUserID")]
    pub target_user_id: String,
    pub new_status: AccountStatus,
    #[serde(default)]
    pub reason: String,
}

impl Validate for UserAccountStatusUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::id_ref("targetUserID", &self.target_user_id)?;
        validation::required("reason", &self.reason)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeActiveHouseholdInput {
    #[serde(rename = "householdID")]
    pub household_id: String,
}

impl Validate for ChangeActiveHouseholdInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::id_ref("householdID", &self.household_id)
    }
}

fn totp_token(field: &str, token: &str) -> Result<(), ValidationError> {
    if token.len() != 6 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::new(field, "must be a 6 digit code"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(username: &str, password: &str) -> UserRegistrationInput {
        UserRegistrationInput {
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    #[test]
    fn registration_rules() {
        assert!(registration("alice", "P@ssw0rd!").validate().is_ok());
        assert_eq!(registration("al", "P@ssw0rd!").validate().unwrap_err().field, "username");
        assert_eq!(registration("a:lice", "P@ssw0rd!").validate().unwrap_err().field, "username");
        assert_eq!(registration("alice", "short").validate().unwrap_err().field, "password");
    }

    #[test]
    fn invitation_fields_travel_together() {
        let mut input = registration("alice", "P@ssw0rd!");
        input.invitation_id = Some("abc".into());
        assert_eq!(input.validate().unwrap_err().field, "invitationToken");
        input.invitation_token = Some("tok".into());
        assert!(input.validate().is_ok());
    }

    #[test]
    fn secrets_never_serialize() {
        let user = User {
            id: "u".into(),
            username: "alice".into(),
            hashed_password: "hash".into(),
            two_factor_secret: "SECRET".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("hash"));
        assert!(!json.contains("SECRET"));
    }

    #[test]
    fn totp_tokens_are_six_digits() {
        let input = TotpSecretVerificationInput { user_id: "u1".into(), totp_token: "12345a".into() };
        assert_eq!(input.validate().unwrap_err().field, "totpToken");
    }
}
