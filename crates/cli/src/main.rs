//! Kiln CLI - Command-line client for the Kiln daemon
//! Talks JSON-RPC 2.0 over HTTP

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9537";

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Kiln job orchestrator CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "KILN_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new job
    Submit {
        /// Job kind (image, video, i2v, upscale, bulk, workflow, download)
        #[arg(short, long)]
        kind: String,

        /// Payload as JSON string
        #[arg(short, long)]
        payload: String,

        /// Group the job under a session
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Show one job
    Get {
        /// Job ID
        job_id: String,
    },

    /// List tracked jobs
    List {
        #[arg(short, long)]
        kind: Option<String>,

        #[arg(short, long)]
        session: Option<String>,

        /// Only queued or running jobs
        #[arg(long)]
        active: bool,
    },

    /// Cancel a queued job
    Cancel {
        /// Job ID
        job_id: String,
    },

    /// Forget a finished job
    Remove {
        /// Job ID
        job_id: String,
    },

    /// Show system resources
    Resources,

    /// Show daemon status
    Status,
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Tabled)]
struct JobRow {
    id: String,
    kind: String,
    status: String,
    progress: String,
    eta: String,
    detail: String,
}

impl JobRow {
    fn from_json(job: &Value) -> Self {
        let status = text(&job["status"]);
        let detail = job["error"]
            .as_str()
            .or_else(|| job["progress_message"].as_str())
            .unwrap_or("")
            .to_string();
        Self {
            id: text(&job["id"]),
            kind: text(&job["kind"]),
            status: colored_status(&status),
            progress: format!("{:.0}%", job["progress"].as_f64().unwrap_or(0.0)),
            eta: format!("{:.0}s", job["eta_seconds"].as_f64().unwrap_or(0.0)),
            detail,
        }
    }
}

#[derive(Tabled)]
struct KindRow {
    kind: String,
    total: String,
    queued: String,
    running: String,
    completed: String,
    failed: String,
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn colored_status(status: &str) -> String {
    match status {
        "completed" => status.green().to_string(),
        "failed" => status.red().to_string(),
        "queued" => status.yellow().to_string(),
        _ => status.cyan().to_string(),
    }
}

async fn call_rpc(url: &str, method: &str, params: Value) -> Result<Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn print_job(job: &Value) {
    println!("{}", Table::new(vec![JobRow::from_json(job)]));
    if let Some(result) = job.get("result").filter(|r| !r.is_null()) {
        println!();
        println!("{}", "Result:".bold());
        println!("{}", serde_json::to_string_pretty(result).unwrap_or_default());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Submit {
            kind,
            payload,
            session,
        } => {
            let payload_json: Value = serde_json::from_str(&payload).context("Invalid JSON payload")?;

            let params = json!({
                "kind": kind,
                "payload": payload_json,
                "session_id": session,
            });

            let result = call_rpc(&cli.rpc_url, "jobs.submit.v1", params).await?;

            println!("{}", "✓ Job submitted successfully".green().bold());
            println!();
            print_job(&result["job"]);
        }

        Commands::Get { job_id } => {
            let job = call_rpc(&cli.rpc_url, "jobs.get.v1", json!({ "job_id": job_id })).await?;
            print_job(&job);
        }

        Commands::List {
            kind,
            session,
            active,
        } => {
            let params = json!({
                "kind": kind,
                "session_id": session,
                "active_only": active,
            });

            let result = call_rpc(&cli.rpc_url, "jobs.list.v1", params).await?;
            let rows: Vec<JobRow> = result["jobs"]
                .as_array()
                .map(|jobs| jobs.iter().map(JobRow::from_json).collect())
                .unwrap_or_default();

            if rows.is_empty() {
                println!("{}", "No jobs".yellow());
            } else {
                println!("{}", Table::new(rows));
            }
        }

        Commands::Cancel { job_id } => {
            call_rpc(&cli.rpc_url, "jobs.cancel.v1", json!({ "job_id": job_id })).await?;

            println!("{}", format!("✓ Job {} cancelled", job_id).green().bold());
        }

        Commands::Remove { job_id } => {
            call_rpc(&cli.rpc_url, "jobs.remove.v1", json!({ "job_id": job_id })).await?;

            println!("{}", format!("✓ Job {} removed", job_id).green().bold());
        }

        Commands::Resources => {
            let r = call_rpc(&cli.rpc_url, "system.resources.v1", json!({})).await?;

            println!("{}", "System Resources".cyan().bold());
            println!();
            println!("  {} {}", "CPU:".bold(), text(&r["cpu_name"]));
            println!(
                "  {} {} cores / {} threads",
                "Cores:".bold(),
                r["cpu_cores"],
                r["cpu_threads"]
            );
            println!(
                "  {} {:.0}%",
                "CPU Usage:".bold(),
                r["cpu_percent"].as_f64().unwrap_or(0.0)
            );
            println!(
                "  {} {:.1} GB available of {:.1} GB ({:.0}% used)",
                "Memory:".bold(),
                r["memory_available_gb"].as_f64().unwrap_or(0.0),
                r["memory_total_gb"].as_f64().unwrap_or(0.0),
                r["memory_percent"].as_f64().unwrap_or(0.0)
            );
            match r["gpu_utilization"].as_f64() {
                Some(gpu) => println!("  {} {:.0}%", "GPU Usage:".bold(), gpu),
                None => println!("  {} {}", "GPU Usage:".bold(), "unavailable".dimmed()),
            }
        }

        Commands::Status => {
            println!("{}", "System Status".cyan().bold());
            println!();

            match call_rpc(&cli.rpc_url, "admin.stats.v1", json!({})).await {
                Ok(stats) => {
                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!("  {} {}", "Version:".bold(), text(&stats["version"]));
                    println!();
                    println!("  {} {}", "Total Jobs:".bold(), stats["total_jobs"]);
                    println!("  {} {}", "Queued:".bold(), stats["queued_jobs"]);
                    println!("  {} {}", "Running:".bold(), stats["running_jobs"]);
                    println!("  {} {} seconds", "Uptime:".bold(), stats["uptime_seconds"]);
                    println!();

                    let rows: Vec<KindRow> = stats["kinds"]
                        .as_array()
                        .map(|kinds| {
                            kinds
                                .iter()
                                .map(|k| KindRow {
                                    kind: text(&k["kind"]),
                                    total: text(&k["total"]),
                                    queued: k["queue_depth"].to_string(),
                                    running: text(&k["current_job_id"]),
                                    completed: count(&k["by_status"], "completed"),
                                    failed: count(&k["by_status"], "failed"),
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    if !rows.is_empty() {
                        println!("{}", Table::new(rows));
                    }
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }
    }

    Ok(())
}

fn count(by_status: &Value, status: &str) -> String {
    by_status[status].as_u64().unwrap_or(0).to_string()
}
