//! User provisioning components
//!
//! - Users, role grants and the two-step plan
//! - Configuration from environment or YAML
//! - The administrative client seam and its `mongosh` implementation
//! - The provisioning sequence itself

mod client;
mod config;
mod grant;
mod mongosh;
mod provisioner;
mod ready;

pub use client::{AdminClient, ClientError};
pub use config::{
    AuthConfig, ConfigError, ConnectionConfig, ExistingUserPolicy, ProvisionConfig, UserConfig,
};
pub use grant::{DatabaseName, GrantError, ProvisionPlan, ProvisionStep, RoleGrant, StepKind, UserSpec};
pub use mongosh::MongoshClient;
pub use provisioner::{ProvisionError, ProvisionReport, Provisioner, StepOutcome, StepReport};
pub use ready::wait_for_server;
