//! MongoDB init entrypoint
//!
//! Runs ONCE at container startup, after the server accepts connections:
//! creates the administrative user, then the application user. Any failure
//! exits non-zero so the hosting container reports a failed startup.

use common::{init_logging, ContainerEnv, Telemetry, TelemetryEvent};
use mongo_init::marker;
use mongo_init::provision::{
    wait_for_server, MongoshClient, ProvisionConfig, ProvisionError, Provisioner, StepKind,
};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _guard = init_logging("mongo-init");

    let start = Instant::now();
    let telemetry = Telemetry::from_env("mongo-init");
    let node = ContainerEnv::hostname();

    info!("MongoDB init starting...");

    let fail = |error: String, phase: &str| TelemetryEvent::ProvisionFailed {
        node: node.clone(),
        error,
        phase: phase.to_string(),
    };

    let config = match ProvisionConfig::load() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            telemetry.send(fail(e.to_string(), "read_config")).await;
            return ExitCode::FAILURE;
        }
    };

    let plan = match config.plan() {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "Invalid provisioning configuration");
            telemetry.send(fail(e.to_string(), "validate_config")).await;
            return ExitCode::FAILURE;
        }
    };

    if let Some(path) = &config.marker {
        if marker::is_complete(path).await {
            info!(marker = %path.display(), "Provisioning already completed, skipping");
            telemetry
                .send(TelemetryEvent::ProvisionSkipped {
                    node: node.clone(),
                    reason: format!("marker {} present", path.display()),
                })
                .await;
            return ExitCode::SUCCESS;
        }
    }

    let target = config.connection.target();
    telemetry
        .send(TelemetryEvent::ProvisionStarted {
            node: node.clone(),
            target: target.clone(),
        })
        .await;

    let client = MongoshClient::new(&config.connection);
    match client.version().await {
        Ok(version) => info!(shell = %config.connection.shell, version = %version, "Using mongo shell"),
        Err(e) => {
            error!(error = %e, "Mongo shell is not usable");
            telemetry.send(fail(e.to_string(), "shell")).await;
            return ExitCode::FAILURE;
        }
    }

    info!(target = %target, "Waiting for database server");
    if let Err(e) = wait_for_server(&client, config.ready_timeout, config.ready_interval).await {
        error!(error = %e, "Database server did not become ready");
        telemetry.send(fail(e.to_string(), "wait_ready")).await;
        return ExitCode::FAILURE;
    }

    let mut provisioner = Provisioner::new(client, config.on_existing_user);
    let report = match provisioner.provision(&plan).await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "Provisioning failed");
            let phase = e.kind().phase();
            if e.kind() == StepKind::Application || matches!(e, ProvisionError::Output { .. }) {
                warn!("Administrative user was provisioned and is not rolled back");
            }
            telemetry.send(fail(e.to_string(), phase)).await;
            return ExitCode::FAILURE;
        }
    };

    for step in &report.steps {
        telemetry
            .send(TelemetryEvent::UserProvisioned {
                node: node.clone(),
                user: step.user.clone(),
                database: step.database.clone(),
                outcome: step.outcome.to_string(),
            })
            .await;
    }

    if let Some(path) = &config.marker {
        if let Err(e) = marker::mark_complete(path).await {
            error!(error = %e, "Failed to record completion");
            telemetry.send(fail(e.to_string(), "write_marker")).await;
            return ExitCode::FAILURE;
        }
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    telemetry
        .send(TelemetryEvent::ProvisionCompleted {
            node,
            duration_ms,
            users_provisioned: report.users(),
        })
        .await;

    info!(duration_ms, "MongoDB init completed");
    ExitCode::SUCCESS
}
