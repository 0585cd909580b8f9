//! Administrative interface of the database server

use crate::provision::grant::{DatabaseName, UserSpec};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("database server unreachable: {0}")]
    Unreachable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("user {user} already exists in {database}")]
    DuplicateUser { user: String, database: String },

    #[error("command failed ({code_name}, code {code}): {message}")]
    CommandFailed {
        code: i32,
        code_name: String,
        message: String,
    },

    #[error("shell error: {0}")]
    Shell(#[from] anyhow::Error),

    #[error("malformed reply: {0}")]
    MalformedReply(String),
}

/// The calls provisioning needs from the server.
///
/// Every user operation names its target database explicitly; implementations
/// must not rely on a "currently selected" database.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Round-trip to the server without side effects.
    async fn ping(&self) -> Result<(), ClientError>;

    async fn user_exists(&self, database: &DatabaseName, name: &str) -> Result<bool, ClientError>;

    /// Create a user; fails with `DuplicateUser` if the name is taken in `database`.
    async fn create_user(&self, database: &DatabaseName, user: &UserSpec) -> Result<(), ClientError>;

    /// Replace the password and roles of an existing user.
    async fn update_user(&self, database: &DatabaseName, user: &UserSpec) -> Result<(), ClientError>;

    /// Run later calls as `user`, just provisioned in `database`.
    ///
    /// Called after the admin step. Implementations already holding bootstrap
    /// credentials keep them.
    fn authenticate_as(&self, database: &DatabaseName, user: &UserSpec);
}
