//! The provisioning sequence
//!
//! Runs the plan's steps strictly in order. The first failure aborts the run;
//! there is no retry and no rollback, so a failure in the application step
//! leaves the administrative user in place.

use crate::provision::client::{AdminClient, ClientError};
use crate::provision::config::ExistingUserPolicy;
use crate::provision::grant::{ProvisionPlan, ProvisionStep, StepKind};
use std::fmt;
use std::io::{self, Write};
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{kind} step failed for user {user} in {database}: {source}")]
    Step {
        kind: StepKind,
        user: String,
        database: String,
        #[source]
        source: ClientError,
    },

    #[error("{kind} step aborted: user {user} already exists in {database}")]
    UserExists {
        kind: StepKind,
        user: String,
        database: String,
    },

    #[error("{kind} step completed but its confirmation could not be written: {source}")]
    Output {
        kind: StepKind,
        #[source]
        source: io::Error,
    },
}

impl ProvisionError {
    /// Which step failed.
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Step { kind, .. } | Self::UserExists { kind, .. } | Self::Output { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Created,
    Updated,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated => f.write_str("updated"),
        }
    }
}

/// Result of one completed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub kind: StepKind,
    pub user: String,
    pub database: String,
    pub outcome: StepOutcome,
}

impl StepReport {
    /// Operator-facing confirmation line.
    pub fn confirmation(&self) -> String {
        match self.kind {
            StepKind::Admin => format!("Admin user '{}' {} successfully!", self.user, self.outcome),
            StepKind::Application => format!(
                "User '{}' {} successfully in {}!",
                self.user, self.outcome, self.database
            ),
        }
    }
}

/// Steps completed by a successful run, in execution order.
#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub steps: Vec<StepReport>,
}

impl ProvisionReport {
    /// `user@database` for every provisioned user.
    pub fn users(&self) -> Vec<String> {
        self.steps
            .iter()
            .map(|s| format!("{}@{}", s.user, s.database))
            .collect()
    }
}

/// Creates the administrative user, then the application user.
///
/// Confirmation lines are written to `out` as each step completes. Once the
/// admin step succeeds, the client is told to authenticate as that user, since
/// an unauthenticated session loses its privileges as soon as a user exists.
pub struct Provisioner<C, W = io::Stdout> {
    client: C,
    policy: ExistingUserPolicy,
    out: W,
}

impl<C: AdminClient> Provisioner<C> {
    pub fn new(client: C, policy: ExistingUserPolicy) -> Self {
        Self {
            client,
            policy,
            out: io::stdout(),
        }
    }
}

impl<C: AdminClient, W: Write> Provisioner<C, W> {
    /// Redirect confirmation lines.
    pub fn with_output<O: Write>(self, out: O) -> Provisioner<C, O> {
        Provisioner {
            client: self.client,
            policy: self.policy,
            out,
        }
    }

    /// Hand back the client and the confirmation writer.
    pub fn into_parts(self) -> (C, W) {
        (self.client, self.out)
    }

    /// Run every step of `plan` in order, stopping at the first failure.
    pub async fn provision(&mut self, plan: &ProvisionPlan) -> Result<ProvisionReport, ProvisionError> {
        let mut report = ProvisionReport::default();

        for step in plan.steps() {
            let outcome = self.run_step(step).await?;
            if step.kind() == StepKind::Admin {
                self.client.authenticate_as(step.database(), step.user());
            }

            let step_report = StepReport {
                kind: step.kind(),
                user: step.user().name.clone(),
                database: step.database().to_string(),
                outcome,
            };

            let line = step_report.confirmation();
            info!(step = %step.kind(), outcome = %outcome, "{}", line);
            writeln!(self.out, "{}", line)
                .and_then(|_| self.out.flush())
                .map_err(|source| ProvisionError::Output {
                    kind: step.kind(),
                    source,
                })?;

            report.steps.push(step_report);
        }

        Ok(report)
    }

    #[instrument(skip_all, fields(step = %step.kind(), user = %step.user().name, database = %step.database()))]
    async fn run_step(&self, step: &ProvisionStep) -> Result<StepOutcome, ProvisionError> {
        let database = step.database();
        let user = step.user();
        let failed = |source: ClientError| ProvisionError::Step {
            kind: step.kind(),
            user: user.name.clone(),
            database: database.to_string(),
            source,
        };
        let exists = || ProvisionError::UserExists {
            kind: step.kind(),
            user: user.name.clone(),
            database: database.to_string(),
        };

        let already_present = self
            .client
            .user_exists(database, &user.name)
            .await
            .map_err(failed)?;

        if already_present {
            return match self.policy {
                ExistingUserPolicy::Fail => Err(exists()),
                ExistingUserPolicy::Update => {
                    info!("User exists, updating password and roles");
                    self.client.update_user(database, user).await.map_err(failed)?;
                    Ok(StepOutcome::Updated)
                }
            };
        }

        match self.client.create_user(database, user).await {
            Ok(()) => Ok(StepOutcome::Created),
            Err(ClientError::DuplicateUser { .. }) => match self.policy {
                ExistingUserPolicy::Fail => Err(exists()),
                ExistingUserPolicy::Update => {
                    warn!("User appeared after existence check, updating instead");
                    self.client.update_user(database, user).await.map_err(failed)?;
                    Ok(StepOutcome::Updated)
                }
            },
            Err(e) => Err(failed(e)),
        }
    }
}
