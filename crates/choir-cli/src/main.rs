//! choir — thin ops client for the supervisor daemon.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};

#[derive(Debug, Parser)]
#[command(name = "choir", about = "Supervisor ops client", version)]
struct Cli {
    /// Daemon base URL.
    #[arg(long, env = "CHOIR_DAEMON_URL", default_value = "http://127.0.0.1:8787")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Daemon health and event-log position.
    Health,
    /// Rebuild all projections from the event log.
    Rebuild,
    /// Create a git checkpoint.
    Checkpoint {
        /// Commit message.
        #[arg(long)]
        message: Option<String>,
    },
    /// Git status and recent commits.
    Status,
    /// The last-good checkpoint pointer.
    LastGood,
    /// Roll the repository back to the last-good checkpoint.
    Rollback {
        #[arg(long)]
        dry_run: bool,
    },
    /// Work item operations.
    Work {
        #[command(subcommand)]
        command: WorkCommand,
    },
    /// List runs.
    Runs {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// The current AHDB state vector.
    Ahdb,
    /// Undo the last N file changes.
    Undo {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

#[derive(Debug, Subcommand)]
enum WorkCommand {
    /// Create a work item.
    Add {
        description: String,
        #[arg(long)]
        risk_tier: Option<String>,
        /// Verifier ids that must run for this item (repeatable).
        #[arg(long = "require")]
        required_verifiers: Vec<String>,
    },
    /// Show one work item.
    Get { id: String },
    /// List work items.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

struct Client {
    base: String,
    http: reqwest::Client,
}

impl Client {
    fn new(base: String) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value, String> {
        let resp = self
            .http
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::decode(resp).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<Value, String> {
        let mut req = self.http.post(format!("{}{}", self.base, path));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.map_err(|e| e.to_string())?;
        Self::decode(resp).await
    }

    async fn decode(resp: reqwest::Response) -> Result<Value, String> {
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .unwrap_or_else(|_| json!({"error": "non-JSON response"}));
        if status.is_success() {
            Ok(body)
        } else {
            Err(format!("{status}: {body}"))
        }
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(_) => println!("{value}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let client = Client::new(cli.url);

    let result = match cli.command {
        Command::Health => client.get("/health").await,
        Command::Rebuild => client.post("/projections/rebuild", None).await,
        Command::Checkpoint { message } => {
            client
                .post("/git/checkpoint", Some(json!({"message": message})))
                .await
        }
        Command::Status => client.get("/git/status").await,
        Command::LastGood => client.get("/git/last_good").await,
        Command::Rollback { dry_run } => {
            client
                .post(&format!("/git/rollback?dry_run={dry_run}"), None)
                .await
        }
        Command::Work { command } => match command {
            WorkCommand::Add {
                description,
                risk_tier,
                required_verifiers,
            } => {
                client
                    .post(
                        "/work_item",
                        Some(json!({
                            "description": description,
                            "risk_tier": risk_tier,
                            "required_verifiers": required_verifiers,
                        })),
                    )
                    .await
            }
            WorkCommand::Get { id } => client.get(&format!("/work_item/{id}")).await,
            WorkCommand::List { status, limit } => {
                let mut path = format!("/work_items?limit={limit}");
                if let Some(status) = status {
                    path.push_str(&format!("&status={status}"));
                }
                client.get(&path).await
            }
        },
        Command::Runs { status, limit } => {
            let mut path = format!("/runs?limit={limit}");
            if let Some(status) = status {
                path.push_str(&format!("&status={status}"));
            }
            client.get(&path).await
        }
        Command::Ahdb => client.get("/state/ahdb").await,
        Command::Undo { count } => client.post(&format!("/undo?count={count}"), None).await,
    };

    match result {
        Ok(value) => {
            print_json(&value);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
