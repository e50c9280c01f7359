//! Hydra CLI — command-line client for the Hydra control plane.
//!
//! A standalone HTTP client that communicates with the control plane over
//! its REST API. No internal crate dependencies on the persistence store
//! or orchestrator backend — every subcommand is a thin wrapper around a
//! handful of HTTP calls.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;

// ── CLI structure ────────────────────────────────────────────────────

/// `hydractl` — administer a running Hydra control plane.
#[derive(Parser)]
#[command(
    name = "hydractl",
    version,
    about = "Administrative client for the Hydra student workspace cluster",
    after_help = "Environment variables:\n  \
                  HYDRA_ADDR    Control plane address (default: http://127.0.0.1:8080)\n  \
                  HYDRA_AS      Principal username presented to the control plane (default: admin)\n  \
                  HYDRA_ROLE    Principal role: student, faculty, or admin (default: admin)\n\n\
                  Examples:\n  \
                  hydractl status alice\n  \
                  hydractl approve 3e5c1e2a-...\n  \
                  hydractl migrate alice --to gpu-node-b\n  \
                  hydractl logs alice --follow"
)]
struct Cli {
    /// Control plane address.
    #[arg(long, env = "HYDRA_ADDR", default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Principal username the CLI presents to the control plane.
    #[arg(long = "as", env = "HYDRA_AS", default_value = "admin")]
    as_user: String,

    /// Principal role the CLI presents to the control plane.
    #[arg(long, env = "HYDRA_ROLE", default_value = "admin")]
    role: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a user's container status.
    Status {
        /// Student username.
        username: String,
    },
    /// Approve a pending resource or node-access request.
    Approve {
        /// Approval request id.
        request_id: String,
    },
    /// Deny a pending resource or node-access request.
    Deny {
        /// Approval request id.
        request_id: String,
        /// Reason recorded alongside the denial.
        #[arg(long)]
        reason: Option<String>,
    },
    /// Migrate a user's container to another node, printing progress.
    Migrate {
        /// Student username.
        username: String,
        /// Destination node name.
        #[arg(long = "to")]
        to: String,
    },
    /// Generate a fresh Ed25519 key pair for a user out-of-band.
    Keygen {
        /// Student username, used only as the `authorized_keys` comment.
        username: String,
    },
    /// Fetch or stream a user's activity log.
    Logs {
        /// Student username.
        username: String,
        /// Stream new entries instead of printing the recent history.
        #[arg(long)]
        follow: bool,
        /// Number of recent entries to print when not following.
        #[arg(long, default_value = "50")]
        limit: i64,
    },
}

// ── HTTP client ──────────────────────────────────────────────────────

struct Client {
    http: reqwest::Client,
    addr: String,
    principal: String,
}

#[derive(Serialize)]
struct Principal<'a> {
    username: &'a str,
    email: String,
    role: &'a str,
    groups: Vec<String>,
}

impl Client {
    fn new(addr: String, as_user: String, role: String) -> Result<Self> {
        let http = reqwest::Client::new();
        let principal = serde_json::to_string(&Principal {
            username: &as_user,
            email: format!("{as_user}@hydra.local"),
            role: &role,
            groups: Vec::new(),
        })
        .context("failed to encode the principal header")?;
        Ok(Self { http, addr, principal })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.addr)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let resp = self
            .http
            .get(self.url(path))
            .header("X-Hydra-Principal", &self.principal)
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let resp = self
            .http
            .post(self.url(path))
            .header("X-Hydra-Principal", &self.principal)
            .json(body)
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }

    fn sse_request(&self, path: &str) -> reqwest::RequestBuilder {
        self.http.get(self.url(path)).header("X-Hydra-Principal", &self.principal)
    }
}

async fn handle_response(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if status == reqwest::StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    let body = resp.text().await.context("failed to read response body")?;
    if !status.is_success() {
        bail!("server returned {status}: {body}");
    }
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).context("failed to parse response JSON")
}

// ── Command dispatch ─────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let client = match Client::new(cli.addr, cli.as_user, cli.role) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(&client, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(client: &Client, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Status { username } => cmd_status(client, &username).await,
        Commands::Approve { request_id } => cmd_decide(client, &request_id, true, None).await,
        Commands::Deny { request_id, reason } => cmd_decide(client, &request_id, false, reason).await,
        Commands::Migrate { username, to } => cmd_migrate(client, &username, &to).await,
        Commands::Keygen { username } => cmd_keygen(&username),
        Commands::Logs { username, follow, limit } => {
            if follow {
                cmd_logs_follow(client, &username).await
            } else {
                cmd_logs_recent(client, &username, limit).await
            }
        }
    }
}

async fn cmd_status(client: &Client, username: &str) -> Result<()> {
    let status = client.get(&format!("/containers/{username}/status")).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_decide(client: &Client, request_id: &str, approve: bool, reason: Option<String>) -> Result<()> {
    let body = serde_json::json!({ "approve": approve, "reason": reason });
    let decided = client.post(&format!("/approvals/{request_id}/decide"), &body).await?;
    println!("{}", serde_json::to_string_pretty(&decided)?);
    Ok(())
}

async fn cmd_migrate(client: &Client, username: &str, to: &str) -> Result<()> {
    let body = serde_json::json!({ "target_node": to });
    let started = client.post(&format!("/migrations/{username}"), &body).await?;
    let migration_id = started
        .get("migration_id")
        .and_then(Value::as_str)
        .context("migrate response missing migration_id")?
        .to_owned();
    println!("migration {migration_id} started, moving {username} to {to}");

    let resp = client
        .sse_request(&format!("/logs/{username}/stream"))
        .timeout(Duration::from_secs(600))
        .send()
        .await
        .context("failed to open the migration progress stream")?;
    let mut lines = resp.bytes_stream();

    while let Some(chunk) = lines.next().await {
        let chunk = chunk.context("progress stream interrupted")?;
        for line in String::from_utf8_lossy(&chunk).lines() {
            let Some(data) = line.strip_prefix("data: ") else { continue };
            let Ok(event) = serde_json::from_str::<Value>(data) else { continue };
            let Some(migration_ref) = event.pointer("/detail/migration_id").and_then(Value::as_str) else {
                continue;
            };
            if migration_ref != migration_id {
                continue;
            }
            match event.get("kind").and_then(Value::as_str) {
                Some("migration_step") => {
                    let step = event.pointer("/detail/step").and_then(Value::as_i64).unwrap_or(-1);
                    let message = event.pointer("/detail/message").and_then(Value::as_str).unwrap_or("");
                    println!("  [{step}] {message}");
                    if step == 10 {
                        println!("migration {migration_id} completed");
                        return Ok(());
                    }
                }
                Some("migration_failed") => {
                    let reason = event.pointer("/detail/reason").and_then(Value::as_str).unwrap_or("unknown");
                    bail!("migration {migration_id} failed: {reason}");
                }
                _ => {}
            }
        }
    }

    bail!("progress stream ended before the migration reached a terminal state")
}

fn cmd_keygen(username: &str) -> Result<()> {
    let pair = hydra_core::keys::KeyPair::generate();
    let pem = pair.private_key_pem().map_err(anyhow::Error::msg).context("failed to encode the private key")?;
    let comment = format!("{username}@hydra");
    let line = pair.authorized_keys_line(&comment);

    let private_key_path = format!("{username}_id_ed25519.pem");
    std::fs::write(&private_key_path, &pem).with_context(|| format!("failed to write {private_key_path}"))?;

    println!("private key written to {private_key_path} (keep this off the control plane)");
    println!("{line}");
    Ok(())
}

async fn cmd_logs_recent(client: &Client, username: &str, limit: i64) -> Result<()> {
    let entries = client.get(&format!("/logs/{username}?limit={limit}")).await?;
    let Value::Array(entries) = entries else {
        bail!("unexpected response shape for recent logs");
    };
    for entry in entries {
        print_log_entry(&entry);
    }
    Ok(())
}

async fn cmd_logs_follow(client: &Client, username: &str) -> Result<()> {
    let resp = client.sse_request(&format!("/logs/{username}/stream")).send().await.context("failed to open the log stream")?;
    let mut lines = resp.bytes_stream();

    while let Some(chunk) = lines.next().await {
        let chunk = chunk.context("log stream interrupted")?;
        for line in String::from_utf8_lossy(&chunk).lines() {
            let Some(data) = line.strip_prefix("data: ") else { continue };
            if let Ok(event) = serde_json::from_str::<Value>(data) {
                print_log_entry(&event);
            }
        }
    }
    Ok(())
}

fn print_log_entry(entry: &Value) {
    println!("{}", serde_json::to_string(entry).unwrap_or_default());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn principal_header_encodes_username_and_role() {
        let client = Client::new("http://localhost:8080".to_owned(), "alice".to_owned(), "student".to_owned())
            .expect("principal header should encode");
        assert!(client.principal.contains("\"username\":\"alice\""));
        assert!(client.principal.contains("\"role\":\"student\""));
    }
}
