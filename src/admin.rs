//! User management through the privileged endpoint.
//!
//! Creating an account needs service-role credentials, so it runs in a
//! serverless function. The function re-checks that the caller is an admin
//! before acting; this client validates the request locally first so bad
//! input never costs a round trip.

use crate::error::{MutationKind, RemoteError, Result, SyncError, ValidationError};
use crate::remote::PrivilegedEndpoint;
use crate::types::RecordId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name of the serverless function creating accounts.
pub const CREATE_USER_FUNCTION: &str = "create-user";

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Member,
}

/// Account to create.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
    /// Required for everyone but admins.
    pub department_id: Option<String>,
}

impl NewUser {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let email = self.email.trim();
        let valid_email = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
            }
            None => false,
        };
        if !valid_email {
            return Err(ValidationError::new("email", "is not a valid address"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::new(
                "password",
                format!("must have at least {} characters", MIN_PASSWORD_LEN),
            ));
        }
        if self.full_name.trim().is_empty() {
            return Err(ValidationError::new("full_name", "is required"));
        }
        let has_department = self
            .department_id
            .as_deref()
            .map(|d| !d.trim().is_empty())
            .unwrap_or(false);
        if self.role != Role::Admin && !has_department {
            return Err(ValidationError::new(
                "department_id",
                "is required for managers and members",
            ));
        }
        Ok(())
    }
}

/// Account created by the function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedUser {
    pub id: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub department_id: Option<String>,
}

/// Calls privileged functions on behalf of a signed-in user.
pub struct AdminClient {
    endpoint: Arc<dyn PrivilegedEndpoint>,
    access_token: String,
}

impl AdminClient {
    pub fn new(endpoint: Arc<dyn PrivilegedEndpoint>, access_token: impl Into<String>) -> Self {
        Self {
            endpoint,
            access_token: access_token.into(),
        }
    }

    /// Validate and create an account.
    ///
    /// 401/403 from the function become [`SyncError::Authorization`]; other
    /// statuses are reported as rejected mutations.
    pub async fn create_user(&self, user: NewUser) -> Result<CreatedUser> {
        user.validate()?;

        let body = serde_json::to_value(&user)?;
        tracing::debug!(email = %user.email, role = ?user.role, "creating user");

        match self
            .endpoint
            .invoke(CREATE_USER_FUNCTION, &self.access_token, body)
            .await
        {
            Ok(value) => {
                let created: CreatedUser = serde_json::from_value(value)?;
                Ok(created)
            }
            Err(e) if e.is_unauthorized() => {
                tracing::warn!(status = e.status, "create-user refused the caller");
                Err(SyncError::Authorization(e.message))
            }
            Err(e) if e.status == 400 || e.status == 422 => {
                Err(ValidationError::new("user", e.message).into())
            }
            Err(e) => {
                tracing::error!(status = e.status, error = %e, "create-user failed");
                Err(SyncError::Mutation {
                    table: "auth.users".to_string(),
                    kind: MutationKind::Create,
                    id: RecordId::from(user.email.as_str()),
                    source: RemoteError::rejected(e.to_string()),
                })
            }
        }
    }
}
