//! CLI for cluster node administration

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use minicluster::common::{
    duration_millis, format_timestamp_millis, parse_duration, timestamp_now_millis,
};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "minicluster")]
#[command(about = "minicluster node administration CLI")]
#[command(version)]
struct Cli {
    /// Admin API URL of the node to talk to
    #[arg(long, default_value = "http://localhost:7000")]
    url: String,

    /// API key (falls back to MINICLUSTER_API_KEY)
    #[arg(long, env = "MINICLUSTER_API_KEY")]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show this node's persisted state
    Status,

    /// List every registered node with liveness
    Nodes,

    /// Bring the node into service
    Activate,

    /// Take the node out of service
    Deactivate,

    /// Ask another live node for a current index snapshot
    RequestIndex {
        /// Target node ID
        node_id: String,
    },

    /// Drop cluster messages older than the given age
    Purge {
        /// Age, e.g. "24h", "30m"
        #[arg(long, default_value = "24h")]
        older_than: String,
    },
}

struct AdminClient {
    http: reqwest::Client,
    base: String,
    api_key: Option<String>,
}

impl AdminClient {
    fn new(base: &str, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn get(&self, path: &str) -> anyhow::Result<Value> {
        let request = self.http.get(format!("{}{}", self.base, path));
        self.send(request).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> anyhow::Result<Value> {
        let mut request = self.http.post(format!("{}{}", self.base, path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send(request).await
    }

    async fn send(&self, mut request: reqwest::RequestBuilder) -> anyhow::Result<Value> {
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("cannot reach {}", self.base))?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let reason = body
                .get("reason")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            bail!("{} ({})", reason, status);
        }
        Ok(body)
    }
}

fn print_node(node: &Value) {
    let id = node["node_id"].as_str().unwrap_or("-");
    let state = node["state"].as_str().unwrap_or("-");
    let host = node["hostname"].as_str().unwrap_or("-");
    let port = node["cache_listener_port"]
        .as_u64()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".into());
    let updated = node["timestamp"]
        .as_u64()
        .map(format_timestamp_millis)
        .unwrap_or_else(|| "-".into());
    println!("  {:<16} {:<12} {}:{}  (updated {})", id, state, host, port, updated);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = AdminClient::new(&cli.url, cli.api_key);

    match cli.command {
        Commands::Status => {
            let body = client.get("/cluster/node").await?;
            if body["clustered"].as_bool() != Some(true) {
                println!("Node is not clustered");
                return Ok(());
            }
            println!("Node status:");
            print_node(&body["node"]);
            println!("  Active: {}", body["active"]);
            println!("  Index check: {}", body["index"].as_str().unwrap_or("-"));
        }

        Commands::Nodes => {
            let body = client.get("/cluster/nodes").await?;
            let nodes = body["nodes"].as_array().cloned().unwrap_or_default();
            println!("Cluster nodes ({} live of {}):", body["live"], nodes.len());
            for info in &nodes {
                let marker = if info["live"].as_bool() == Some(true) {
                    "*"
                } else {
                    " "
                };
                print!("{}", marker);
                print_node(&info["node"]);
            }
        }

        Commands::Activate => {
            let body = client.post("/admin/node/activate", None).await?;
            println!("Node activated:");
            print_node(&body["node"]);
        }

        Commands::Deactivate => {
            let body = client.post("/admin/node/deactivate", None).await?;
            println!("Node deactivated:");
            print_node(&body["node"]);
        }

        Commands::RequestIndex { node_id } => {
            let body = client
                .post(&format!("/admin/index/request/{}", node_id), None)
                .await?;
            println!(
                "Index requested from {} (message {})",
                node_id, body["id"]
            );
        }

        Commands::Purge { older_than } => {
            let age = parse_duration(&older_than)?;
            let before = timestamp_now_millis().saturating_sub(duration_millis(age)?);
            let body = client
                .post(
                    "/admin/messages/purge",
                    Some(serde_json::json!({ "before": before })),
                )
                .await?;
            println!("Purged {} cluster messages", body["purged"]);
        }
    }

    Ok(())
}
