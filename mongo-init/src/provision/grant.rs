//! Users, role grants and the ordered provisioning plan

use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Characters MongoDB rejects in database names on any platform.
const FORBIDDEN_DB_CHARS: &[char] = &['/', '\\', '.', ' ', '"', '$', '*', '<', '>', ':', '|', '?', '\0'];

/// MongoDB database names must be shorter than 64 bytes.
const MAX_DB_NAME_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrantError {
    #[error("invalid database name {name:?}: {reason}")]
    InvalidDatabaseName { name: String, reason: &'static str },

    #[error("role {role}@{granted} cannot be granted by a step targeting {database}")]
    ScopeMismatch {
        role: String,
        granted: String,
        database: String,
    },

    #[error("user {0} has no role grants")]
    NoRoles(String),

    #[error("plan expects a {expected} step in this position, got {found}")]
    MisplacedStep { expected: StepKind, found: StepKind },
}

/// A validated database name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseName(String);

impl DatabaseName {
    pub fn new(name: impl Into<String>) -> Result<Self, GrantError> {
        let name = name.into();
        let invalid = |reason: &'static str| GrantError::InvalidDatabaseName {
            name: name.clone(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if name.len() >= MAX_DB_NAME_LEN {
            return Err(invalid("must be shorter than 64 bytes"));
        }
        if name.contains(FORBIDDEN_DB_CHARS) {
            return Err(invalid("contains a character MongoDB does not allow"));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for DatabaseName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// A named privilege bundle scoped to one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleGrant {
    pub role: String,
    pub db: DatabaseName,
}

impl RoleGrant {
    pub fn new(role: impl Into<String>, db: DatabaseName) -> Self {
        Self {
            role: role.into(),
            db,
        }
    }
}

/// A user to create, with its password and role grants.
#[derive(Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub name: String,
    pub password: String,
    pub roles: Vec<RoleGrant>,
}

impl UserSpec {
    pub fn new(name: impl Into<String>, password: impl Into<String>, roles: Vec<RoleGrant>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            roles,
        }
    }
}

// Passwords must never reach logs.
impl fmt::Debug for UserSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSpec")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .field("roles", &self.roles)
            .finish()
    }
}

/// Which of the two provisioning steps a user belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Admin,
    Application,
}

impl StepKind {
    /// Short phase name used in logs and telemetry.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Admin => "admin_user",
            Self::Application => "app_user",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.phase())
    }
}

/// One user creation, bound to the database it targets.
#[derive(Debug, Clone)]
pub struct ProvisionStep {
    kind: StepKind,
    database: DatabaseName,
    user: UserSpec,
}

impl ProvisionStep {
    /// Build a step, rejecting grants that are not scoped to `database`.
    pub fn new(kind: StepKind, database: DatabaseName, user: UserSpec) -> Result<Self, GrantError> {
        if user.roles.is_empty() {
            return Err(GrantError::NoRoles(user.name));
        }
        if let Some(grant) = user.roles.iter().find(|g| g.db != database) {
            return Err(GrantError::ScopeMismatch {
                role: grant.role.clone(),
                granted: grant.db.to_string(),
                database: database.to_string(),
            });
        }

        Ok(Self {
            kind,
            database,
            user,
        })
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn database(&self) -> &DatabaseName {
        &self.database
    }

    pub fn user(&self) -> &UserSpec {
        &self.user
    }
}

/// The fixed two-step sequence: administrative user, then application user.
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    admin: ProvisionStep,
    application: ProvisionStep,
}

impl ProvisionPlan {
    /// Pair the two steps, rejecting a swapped or duplicated kind.
    pub fn new(admin: ProvisionStep, application: ProvisionStep) -> Result<Self, GrantError> {
        for (step, expected) in [(&admin, StepKind::Admin), (&application, StepKind::Application)] {
            if step.kind() != expected {
                return Err(GrantError::MisplacedStep {
                    expected,
                    found: step.kind(),
                });
            }
        }

        Ok(Self { admin, application })
    }

    /// Steps in execution order.
    pub fn steps(&self) -> [&ProvisionStep; 2] {
        [&self.admin, &self.application]
    }
}
