use assert_matches::assert_matches;
use async_trait::async_trait;
use mongo_init::provision::{
    wait_for_server, AdminClient, ClientError, DatabaseName, ExistingUserPolicy, ProvisionError,
    ProvisionPlan, ProvisionStep, Provisioner, RoleGrant, StepKind, StepOutcome, UserSpec,
};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory user store keyed by (database, user).
#[derive(Default)]
struct FakeServer {
    users: Mutex<BTreeMap<(String, String), UserSpec>>,
    calls: Mutex<Vec<String>>,
    deny_writes_in: Option<String>,
    unreachable_pings: Mutex<u32>,
    hide_existing: bool,
    /// Reject unauthenticated user commands once any user exists, as a
    /// server running with access control does.
    require_auth: bool,
    session: Mutex<Option<(String, String)>>,
}

impl FakeServer {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn users(&self) -> Vec<(String, String, Vec<RoleGrant>)> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .map(|((db, name), spec)| (db.clone(), name.clone(), spec.roles.clone()))
            .collect()
    }

    fn check_session(&self) -> Result<(), ClientError> {
        if !self.require_auth {
            return Ok(());
        }
        let users = self.users.lock().unwrap();
        match &*self.session.lock().unwrap() {
            _ if users.is_empty() => Ok(()),
            Some(key) if users.contains_key(key) => Ok(()),
            _ => Err(ClientError::PermissionDenied(
                "command requires authentication".to_string(),
            )),
        }
    }

    fn check_write(&self, database: &DatabaseName) -> Result<(), ClientError> {
        match &self.deny_writes_in {
            Some(db) if db == database.as_str() => Err(ClientError::PermissionDenied(format!(
                "not authorized on {} to execute command",
                db
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl AdminClient for FakeServer {
    async fn ping(&self) -> Result<(), ClientError> {
        self.record("ping".to_string());
        let mut remaining = self.unreachable_pings.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(ClientError::Unreachable("connect ECONNREFUSED".to_string()));
        }
        Ok(())
    }

    async fn user_exists(&self, database: &DatabaseName, name: &str) -> Result<bool, ClientError> {
        self.record(format!("usersInfo {}@{}", name, database));
        self.check_session()?;
        if self.hide_existing {
            return Ok(false);
        }
        let key = (database.to_string(), name.to_string());
        Ok(self.users.lock().unwrap().contains_key(&key))
    }

    async fn create_user(&self, database: &DatabaseName, user: &UserSpec) -> Result<(), ClientError> {
        self.record(format!("createUser {}@{}", user.name, database));
        self.check_session()?;
        self.check_write(database)?;
        let key = (database.to_string(), user.name.clone());
        let mut users = self.users.lock().unwrap();
        if users.contains_key(&key) {
            return Err(ClientError::DuplicateUser {
                user: user.name.clone(),
                database: database.to_string(),
            });
        }
        users.insert(key, user.clone());
        Ok(())
    }

    async fn update_user(&self, database: &DatabaseName, user: &UserSpec) -> Result<(), ClientError> {
        self.record(format!("updateUser {}@{}", user.name, database));
        self.check_session()?;
        self.check_write(database)?;
        let key = (database.to_string(), user.name.clone());
        self.users.lock().unwrap().insert(key, user.clone());
        Ok(())
    }

    fn authenticate_as(&self, database: &DatabaseName, user: &UserSpec) {
        *self.session.lock().unwrap() = Some((database.to_string(), user.name.clone()));
    }
}

/// Writer whose reader went away.
struct ClosedStdout;

impl Write for ClosedStdout {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn db(name: &str) -> DatabaseName {
    DatabaseName::new(name).unwrap()
}

/// The classic setup: shreyas as root on admin and readWrite on binge_buddy_db.
fn classic_plan() -> ProvisionPlan {
    let admin = ProvisionStep::new(
        StepKind::Admin,
        db("admin"),
        UserSpec::new("shreyas", "devpassword", vec![RoleGrant::new("root", db("admin"))]),
    )
    .unwrap();
    let app = ProvisionStep::new(
        StepKind::Application,
        db("binge_buddy_db"),
        UserSpec::new(
            "shreyas",
            "devpassword",
            vec![RoleGrant::new("readWrite", db("binge_buddy_db"))],
        ),
    )
    .unwrap();
    ProvisionPlan::new(admin, app).unwrap()
}

fn expected_users() -> Vec<(String, String, Vec<RoleGrant>)> {
    vec![
        (
            "admin".to_string(),
            "shreyas".to_string(),
            vec![RoleGrant::new("root", db("admin"))],
        ),
        (
            "binge_buddy_db".to_string(),
            "shreyas".to_string(),
            vec![RoleGrant::new("readWrite", db("binge_buddy_db"))],
        ),
    ]
}

async fn run(
    server: FakeServer,
    policy: ExistingUserPolicy,
) -> (FakeServer, Result<Vec<StepOutcome>, ProvisionError>, String) {
    let mut provisioner = Provisioner::new(server, policy).with_output(Vec::new());
    let result = provisioner
        .provision(&classic_plan())
        .await
        .map(|r| r.steps.iter().map(|s| s.outcome).collect());
    let (server, output) = provisioner.into_parts();
    (server, result, String::from_utf8(output).unwrap())
}

#[tokio::test]
async fn fresh_instance_gets_exactly_two_users() {
    let (server, result, output) = run(FakeServer::default(), ExistingUserPolicy::Update).await;

    assert_eq!(result.unwrap(), vec![StepOutcome::Created, StepOutcome::Created]);
    assert_eq!(server.users(), expected_users());
    assert_eq!(
        output,
        "Admin user 'shreyas' created successfully!\n\
         User 'shreyas' created successfully in binge_buddy_db!\n"
    );
}

#[tokio::test]
async fn each_call_targets_its_own_database_in_order() {
    let (server, result, _) = run(FakeServer::default(), ExistingUserPolicy::Update).await;
    result.unwrap();

    assert_eq!(
        server.calls(),
        vec![
            "usersInfo shreyas@admin",
            "createUser shreyas@admin",
            "usersInfo shreyas@binge_buddy_db",
            "createUser shreyas@binge_buddy_db",
        ]
    );
}

#[tokio::test]
async fn second_run_with_update_policy_is_idempotent() {
    let (server, first, _) = run(FakeServer::default(), ExistingUserPolicy::Update).await;
    first.unwrap();

    let (server, second, output) = run(server, ExistingUserPolicy::Update).await;
    assert_eq!(second.unwrap(), vec![StepOutcome::Updated, StepOutcome::Updated]);
    assert_eq!(server.users(), expected_users());
    assert_eq!(
        output,
        "Admin user 'shreyas' updated successfully!\n\
         User 'shreyas' updated successfully in binge_buddy_db!\n"
    );
}

#[tokio::test]
async fn second_run_with_fail_policy_stops_at_admin_step() {
    let (server, first, _) = run(FakeServer::default(), ExistingUserPolicy::Fail).await;
    first.unwrap();
    let calls_before = server.calls().len();

    let (server, second, output) = run(server, ExistingUserPolicy::Fail).await;
    assert_matches!(
        second,
        Err(ProvisionError::UserExists { kind: StepKind::Admin, ref user, ref database })
            if user == "shreyas" && database == "admin"
    );
    assert_eq!(server.users(), expected_users());
    assert!(output.is_empty());
    assert_eq!(server.calls()[calls_before..], ["usersInfo shreyas@admin"]);
}

#[tokio::test]
async fn admin_step_failure_skips_application_step() {
    let server = FakeServer {
        deny_writes_in: Some("admin".to_string()),
        ..Default::default()
    };

    let (server, result, output) = run(server, ExistingUserPolicy::Update).await;
    let err = result.unwrap_err();
    assert_eq!(err.kind(), StepKind::Admin);
    assert_matches!(
        err,
        ProvisionError::Step { source: ClientError::PermissionDenied(_), .. }
    );

    assert!(server.users().is_empty());
    assert!(output.is_empty());
    assert!(server.calls().iter().all(|c| !c.contains("binge_buddy_db")));
}

#[tokio::test]
async fn application_step_failure_keeps_admin_user() {
    let server = FakeServer {
        deny_writes_in: Some("binge_buddy_db".to_string()),
        ..Default::default()
    };

    let (server, result, output) = run(server, ExistingUserPolicy::Update).await;
    assert_eq!(result.unwrap_err().kind(), StepKind::Application);
    assert_eq!(server.users(), expected_users()[..1].to_vec());
    assert_eq!(output, "Admin user 'shreyas' created successfully!\n");
}

#[tokio::test]
async fn duplicate_on_create_falls_back_to_update() {
    let (server, first, _) = run(FakeServer::default(), ExistingUserPolicy::Update).await;
    first.unwrap();

    // Existence checks miss the users, as if another process created them
    // between check and create.
    let racing = FakeServer {
        users: Mutex::new(server.users.into_inner().unwrap()),
        hide_existing: true,
        ..Default::default()
    };

    let (server, result, _) = run(racing, ExistingUserPolicy::Update).await;
    assert_eq!(result.unwrap(), vec![StepOutcome::Updated, StepOutcome::Updated]);
    assert!(server.calls().contains(&"updateUser shreyas@admin".to_string()));
    assert_eq!(server.users(), expected_users());
}

#[tokio::test]
async fn duplicate_on_create_with_fail_policy_reports_existing_user() {
    let (server, first, _) = run(FakeServer::default(), ExistingUserPolicy::Fail).await;
    first.unwrap();

    let racing = FakeServer {
        users: Mutex::new(server.users.into_inner().unwrap()),
        hide_existing: true,
        ..Default::default()
    };

    let (_, result, _) = run(racing, ExistingUserPolicy::Fail).await;
    assert_matches!(result, Err(ProvisionError::UserExists { kind: StepKind::Admin, .. }));
}

#[tokio::test]
async fn access_controlled_server_is_provisioned_as_the_new_admin() {
    let server = FakeServer {
        require_auth: true,
        ..Default::default()
    };

    let (server, result, output) = run(server, ExistingUserPolicy::Update).await;
    assert_eq!(result.unwrap(), vec![StepOutcome::Created, StepOutcome::Created]);
    assert_eq!(server.users(), expected_users());
    assert_eq!(
        *server.session.lock().unwrap(),
        Some(("admin".to_string(), "shreyas".to_string()))
    );
    assert!(output.ends_with("User 'shreyas' created successfully in binge_buddy_db!\n"));
}

#[tokio::test]
async fn access_controlled_server_rejects_anonymous_calls_after_first_user() {
    let (server, first, _) = run(FakeServer::default(), ExistingUserPolicy::Update).await;
    first.unwrap();

    let locked = FakeServer {
        users: Mutex::new(server.users.into_inner().unwrap()),
        require_auth: true,
        ..Default::default()
    };
    let (_, result, _) = run(locked, ExistingUserPolicy::Update).await;
    assert_matches!(
        result,
        Err(ProvisionError::Step { kind: StepKind::Admin, source: ClientError::PermissionDenied(_), .. })
    );
}

#[tokio::test]
async fn unwritable_confirmation_fails_the_run() {
    let server = FakeServer::default();
    let mut provisioner = Provisioner::new(server, ExistingUserPolicy::Update).with_output(ClosedStdout);

    let result = provisioner.provision(&classic_plan()).await;
    assert_matches!(
        result,
        Err(ProvisionError::Output { kind: StepKind::Admin, ref source }) if source.kind() == io::ErrorKind::BrokenPipe
    );

    // The admin user exists but the application step never ran.
    let (server, _) = provisioner.into_parts();
    assert_eq!(server.users(), expected_users()[..1].to_vec());
    assert!(server.calls().iter().all(|c| !c.contains("binge_buddy_db")));
}

#[tokio::test]
async fn wait_for_server_retries_connectivity_errors() {
    let server = FakeServer {
        unreachable_pings: Mutex::new(2),
        ..Default::default()
    };

    let attempts = wait_for_server(&server, Duration::from_secs(5), Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn wait_for_server_gives_up_after_timeout() {
    let server = FakeServer {
        unreachable_pings: Mutex::new(u32::MAX),
        ..Default::default()
    };

    let result = wait_for_server(&server, Duration::from_millis(50), Duration::from_millis(10)).await;
    assert_matches!(result, Err(ClientError::Unreachable(_)));
    assert!(server.calls().len() < 10);
}
