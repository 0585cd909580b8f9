//! `AdminClient` backed by the `mongosh` shell
//!
//! Each call renders a `runCommand` document, writes a one-shot script to a
//! private temp file and runs it with `mongosh`. Credentials live only in the
//! script file, never on the command line.

use crate::provision::client::{AdminClient, ClientError};
use crate::provision::config::{AuthConfig, ConnectionConfig};
use crate::provision::grant::{DatabaseName, UserSpec};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, instrument};

/// Prefix of the line carrying the command reply in the script's output.
const REPLY_PREFIX: &str = "mongo-init-reply:";

/// MongoDB error codes that map onto the client error taxonomy.
const CODE_UNAUTHORIZED: i32 = 13;
const CODE_AUTHENTICATION_FAILED: i32 = 18;
const CODE_DUPLICATE_KEY: i32 = 11000;
const CODE_USER_EXISTS: i32 = 51003;

const NETWORK_ERROR_NAMES: &[&str] = &[
    "MongoNetworkError",
    "MongoNetworkTimeoutError",
    "MongoServerSelectionError",
    "ECONNREFUSED",
    "ENOTFOUND",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandReply {
    ok: f64,
    #[serde(default)]
    errmsg: Option<String>,
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    code_name: Option<String>,
    #[serde(default)]
    users: Vec<Value>,
}

impl CommandReply {
    fn is_ok(&self) -> bool {
        self.ok == 1.0
    }
}

pub struct MongoshClient {
    shell: String,
    uri: String,
    auth: Mutex<Option<AuthConfig>>,
}

impl MongoshClient {
    pub fn new(connection: &ConnectionConfig) -> Self {
        Self {
            shell: connection.shell.clone(),
            uri: connection.uri(),
            auth: Mutex::new(connection.auth.clone()),
        }
    }

    fn credentials(&self) -> Option<AuthConfig> {
        self.auth.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Version string reported by the shell binary.
    pub async fn version(&self) -> anyhow::Result<String> {
        common::run_checked(&self.shell, &["--version"]).await
    }

    /// Script that authenticates (if configured), runs `command` against
    /// `database` and prints the reply on a single prefixed line.
    fn render_script(&self, database: &DatabaseName, command: &Value) -> String {
        let literal = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string());

        let auth = match self.credentials() {
            Some(auth) => format!(
                "db.getSiblingDB({}).auth({}, {});",
                literal(auth.database.as_str()),
                literal(&auth.user),
                literal(&auth.password),
            ),
            None => String::new(),
        };

        format!(
            r#"const reply = (() => {{
  try {{
    {auth}
    return db.getSiblingDB({database}).runCommand(EJSON.parse({command}));
  }} catch (e) {{
    return {{ ok: 0, errmsg: String(e.message || e), code: typeof e.code === "number" ? e.code : 0, codeName: e.codeName || e.name || "ShellError" }};
  }}
}})();
print({prefix} + EJSON.stringify(reply, {{ relaxed: true }}));
"#,
            auth = auth,
            database = literal(database.as_str()),
            command = literal(&command.to_string()),
            prefix = literal(REPLY_PREFIX),
        )
    }

    #[instrument(skip_all, fields(database = %database))]
    async fn run_command(&self, database: &DatabaseName, command: Value) -> Result<CommandReply, ClientError> {
        let mut script = tempfile::Builder::new()
            .prefix("mongo-init-")
            .suffix(".js")
            .tempfile()
            .context("Failed to create mongosh script")?;
        script
            .write_all(self.render_script(database, &command).as_bytes())
            .context("Failed to write mongosh script")?;

        let path = script.path().to_string_lossy().to_string();
        debug!(script = %path, "Running mongosh");

        let output = common::run(&self.shell, &["--quiet", "--norc", &self.uri, &path]).await?;
        if !output.success {
            return Err(classify_shell_failure(&output.code_display(), &output.stderr));
        }

        parse_reply(&output.stdout)
    }
}

#[async_trait]
impl AdminClient for MongoshClient {
    async fn ping(&self) -> Result<(), ClientError> {
        let admin = DatabaseName::new("admin").map_err(|e| anyhow!(e))?;
        let reply = self.run_command(&admin, json!({ "ping": 1 })).await?;
        if reply.is_ok() {
            Ok(())
        } else {
            Err(reply_error(reply, &admin, None))
        }
    }

    async fn user_exists(&self, database: &DatabaseName, name: &str) -> Result<bool, ClientError> {
        let command = json!({ "usersInfo": { "user": name, "db": database } });
        let reply = self.run_command(database, command).await?;
        if reply.is_ok() {
            Ok(!reply.users.is_empty())
        } else {
            Err(reply_error(reply, database, Some(name)))
        }
    }

    async fn create_user(&self, database: &DatabaseName, user: &UserSpec) -> Result<(), ClientError> {
        let command = json!({
            "createUser": user.name,
            "pwd": user.password,
            "roles": user.roles,
        });
        let reply = self.run_command(database, command).await?;
        if reply.is_ok() {
            Ok(())
        } else {
            Err(reply_error(reply, database, Some(&user.name)))
        }
    }

    async fn update_user(&self, database: &DatabaseName, user: &UserSpec) -> Result<(), ClientError> {
        let command = json!({
            "updateUser": user.name,
            "pwd": user.password,
            "roles": user.roles,
        });
        let reply = self.run_command(database, command).await?;
        if reply.is_ok() {
            Ok(())
        } else {
            Err(reply_error(reply, database, Some(&user.name)))
        }
    }

    fn authenticate_as(&self, database: &DatabaseName, user: &UserSpec) {
        let mut auth = self.auth.lock().unwrap_or_else(PoisonError::into_inner);
        if auth.is_none() {
            info!(user = %user.name, database = %database, "Authenticating further commands as the provisioned admin");
            *auth = Some(AuthConfig {
                user: user.name.clone(),
                password: user.password.clone(),
                database: database.clone(),
            });
        }
    }
}

fn parse_reply(stdout: &str) -> Result<CommandReply, ClientError> {
    let line = stdout
        .lines()
        .rev()
        .find_map(|l| l.trim().strip_prefix(REPLY_PREFIX))
        .ok_or_else(|| ClientError::MalformedReply(format!("no reply line in output: {}", stdout)))?;

    serde_json::from_str(line).map_err(|e| ClientError::MalformedReply(format!("{}: {}", e, line)))
}

fn reply_error(reply: CommandReply, database: &DatabaseName, user: Option<&str>) -> ClientError {
    let code = reply.code.unwrap_or_default();
    let code_name = reply.code_name.unwrap_or_else(|| "Unknown".to_string());
    let message = reply.errmsg.unwrap_or_default();

    if NETWORK_ERROR_NAMES.iter().any(|n| code_name == *n || message.contains(n)) {
        return ClientError::Unreachable(message);
    }

    match code {
        CODE_UNAUTHORIZED | CODE_AUTHENTICATION_FAILED => ClientError::PermissionDenied(message),
        CODE_USER_EXISTS | CODE_DUPLICATE_KEY => ClientError::DuplicateUser {
            user: user.unwrap_or_default().to_string(),
            database: database.to_string(),
        },
        _ => ClientError::CommandFailed {
            code,
            code_name,
            message,
        },
    }
}

fn classify_shell_failure(code: &str, stderr: &str) -> ClientError {
    if NETWORK_ERROR_NAMES.iter().any(|n| stderr.contains(n)) {
        ClientError::Unreachable(stderr.to_string())
    } else if stderr.contains("Authentication failed") {
        ClientError::PermissionDenied(stderr.to_string())
    } else {
        ClientError::Shell(anyhow!("mongosh failed (exit {}): {}", code, stderr))
    }
}
