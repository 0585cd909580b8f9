//! MongoDB user provisioning for container startup
//!
//! Creates a root user in the administrative database and a read/write user
//! in the application database, in that order, through the `mongosh` shell.

pub mod marker;
pub mod provision;

pub use provision::{
    wait_for_server, AdminClient, ClientError, ExistingUserPolicy, MongoshClient, ProvisionConfig,
    ProvisionError, ProvisionPlan, Provisioner,
};
