//! Command-line client (C8) for the build orchestration HTTP API: a thin
//! `reqwest` wrapper around the task, project, and Git endpoints exposed
//! by `buildforge-server`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Base URL of the buildforge-server instance
    #[arg(long, env = "BUILDFORGE_SERVER", default_value = "http://127.0.0.1:8765")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Project registration
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Build task lifecycle
    Build {
        #[command(subcommand)]
        command: BuildCommands,
    },
    /// Direct Git operations
    Git {
        #[command(subcommand)]
        command: GitCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectCommands {
    /// Register a working copy
    Add {
        name: String,
        path: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List active projects
    List,
}

#[derive(Subcommand, Debug)]
enum BuildCommands {
    /// Create and start a build task
    Start {
        /// Project id
        #[arg(long)]
        project: i64,
        /// Path to the uploaded archive, as seen by the server
        #[arg(long)]
        archive: String,
        #[arg(long, default_value = "main")]
        branch: String,
    },
    /// Fetch a task's current status
    Status { task_id: i64 },
    /// Request cancellation of a running or pending task
    Cancel { task_id: i64 },
    /// Stream a task's logs until the task reaches a terminal state
    Logs { task_id: i64 },
}

#[derive(Subcommand, Debug)]
enum GitCommands {
    /// Commit the working tree
    Commit {
        project_id: i64,
        #[arg(long)]
        message: String,
        #[arg(long = "path")]
        paths: Vec<String>,
        #[arg(long)]
        allow_empty: bool,
    },
    /// Hard-reset to a prior commit
    Rollback {
        project_id: i64,
        #[arg(long)]
        target: String,
    },
    /// Restore a captured snapshot
    Restore {
        project_id: i64,
        #[arg(long)]
        snapshot: i64,
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Project { command } => handle_project(&client, &cli.server, command).await,
        Commands::Build { command } => handle_build(&client, &cli.server, command).await,
        Commands::Git { command } => handle_git(&client, &cli.server, command).await,
    }
}

async fn handle_project(client: &reqwest::Client, server: &str, command: ProjectCommands) -> Result<()> {
    match command {
        ProjectCommands::Add { name, path, description } => {
            let body = serde_json::json!({ "name": name, "path": path, "description": description });
            let project: Value = post(client, server, "/projects", &body).await?;
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
        ProjectCommands::List => {
            let projects: Value = get(client, server, "/projects").await?;
            println!("{}", serde_json::to_string_pretty(&projects)?);
        }
    }
    Ok(())
}

async fn handle_build(client: &reqwest::Client, server: &str, command: BuildCommands) -> Result<()> {
    match command {
        BuildCommands::Start { project, archive, branch } => {
            let body = serde_json::json!({
                "project_id": project,
                "archive_path": archive,
                "branch": branch,
            });
            let task: Value = post(client, server, "/tasks", &body).await?;
            let task_id = task
                .get("id")
                .and_then(Value::as_i64)
                .context("server response missing task id")?;

            let started: Value = post(client, server, &format!("/tasks/{task_id}/start"), &Value::Null).await?;
            println!("{}", serde_json::to_string_pretty(&started)?);
        }
        BuildCommands::Status { task_id } => {
            let task: Value = get(client, server, &format!("/tasks/{task_id}")).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        BuildCommands::Cancel { task_id } => {
            let response: Value = post(client, server, &format!("/tasks/{task_id}/cancel"), &Value::Null).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        BuildCommands::Logs { task_id } => {
            stream_logs(client, server, task_id).await?;
        }
    }
    Ok(())
}

async fn handle_git(client: &reqwest::Client, server: &str, command: GitCommands) -> Result<()> {
    match command {
        GitCommands::Commit { project_id, message, paths, allow_empty } => {
            let body = serde_json::json!({ "message": message, "paths": paths, "allow_empty": allow_empty });
            let response: Value = post(client, server, &format!("/projects/{project_id}/git/commit"), &body).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        GitCommands::Rollback { project_id, target } => {
            let body = serde_json::json!({ "target_commit": target });
            let response: Value = post(client, server, &format!("/projects/{project_id}/git/rollback"), &body).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        GitCommands::Restore { project_id, snapshot, force } => {
            let body = serde_json::json!({ "snapshot_id": snapshot, "force": force });
            let response: Value = post(client, server, &format!("/projects/{project_id}/git/restore"), &body).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}

async fn get(client: &reqwest::Client, server: &str, path: &str) -> Result<Value> {
    let response = client.get(format!("{server}{path}")).send().await?;
    handle_response(response).await
}

async fn post(client: &reqwest::Client, server: &str, path: &str, body: &Value) -> Result<Value> {
    let response = client.post(format!("{server}{path}")).json(body).send().await?;
    handle_response(response).await
}

async fn handle_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let value: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        bail!("server returned {status}: {value}");
    }
    Ok(value)
}

/// Reads the task's log stream until the server emits a `completed` event,
/// printing each `log` record and `status` transition as it arrives.
async fn stream_logs(client: &reqwest::Client, server: &str, task_id: i64) -> Result<()> {
    let url = format!("{server}/tasks/{task_id}/logs/stream");
    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        bail!("server returned {} while opening log stream", response.status());
    }

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("error reading log stream")?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(frame_end) = buffer.find("\n\n") {
            let frame: String = buffer.drain(..frame_end + 2).collect();
            let (event, data) = parse_sse_frame(&frame);

            match event.as_deref() {
                Some("log") => println!("{data}"),
                Some("status") => println!("[status] {data}"),
                Some("completed") => {
                    println!("[completed] {data}");
                    return Ok(());
                }
                Some("heartbeat") | Some("connected") => {}
                Some(other) => println!("[{other}] {data}"),
                None => {}
            }
        }
    }

    Ok(())
}

fn parse_sse_frame(frame: &str) -> (Option<String>, String) {
    let mut event = None;
    let mut data_lines = Vec::new();

    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim().to_string());
        }
    }

    (event, data_lines.join("\n"))
}
