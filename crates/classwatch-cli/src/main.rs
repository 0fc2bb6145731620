use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.freedesktop.ClassWatch1",
    default_service = "org.freedesktop.ClassWatch1",
    default_path = "/org/freedesktop/ClassWatch1"
)]
trait ClassWatch {
    async fn status(&self) -> zbus::Result<String>;
    async fn alerts(&self) -> zbus::Result<String>;
    async fn faces(&self) -> zbus::Result<String>;
    async fn identities(&self) -> zbus::Result<String>;
    async fn register(&self, label: &str, embedding_json: &str) -> zbus::Result<u32>;
    async fn start(&self) -> zbus::Result<bool>;
    async fn stop(&self) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "classwatch", about = "ClassWatch classroom monitoring CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// List recent alerts, newest first
    Alerts,
    /// Show faces from the latest detection cycle
    Faces,
    /// List known identities
    Identities,
    /// Register an identity from a stored embedding
    Register {
        /// Display name for the identity
        #[arg(short, long)]
        label: String,
        /// JSON file holding the embedding (array, or object with "embedding")
        #[arg(short, long)]
        embedding: PathBuf,
    },
    /// Start the detection loop
    Start,
    /// Stop the detection loop
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = ClassWatchProxy::new(&conn)
        .await
        .context("classwatchd is not reachable")?;
    tracing::debug!(
        method = method_name(&cli.command),
        system = cli.system,
        "calling classwatchd"
    );

    match cli.command {
        Commands::Status => {
            let status: Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Alerts => {
            let alerts: Value = serde_json::from_str(&proxy.alerts().await?)?;
            let list = alerts.as_array().cloned().unwrap_or_default();
            if list.is_empty() {
                println!("No alerts");
            }
            for alert in &list {
                println!("{}", format_alert(alert));
            }
        }
        Commands::Faces => {
            let report: Value = serde_json::from_str(&proxy.faces().await?)?;
            for line in format_faces(&report) {
                println!("{line}");
            }
        }
        Commands::Identities => {
            let identities: Value = serde_json::from_str(&proxy.identities().await?)?;
            let list = identities.as_array().cloned().unwrap_or_default();
            if list.is_empty() {
                println!("No identities registered");
            }
            for identity in &list {
                println!(
                    "{}  ({} embedding(s))",
                    identity["label"].as_str().unwrap_or("?"),
                    identity["embeddings"].as_u64().unwrap_or(0)
                );
            }
        }
        Commands::Register { label, embedding } => {
            let text = std::fs::read_to_string(&embedding)
                .with_context(|| format!("reading {}", embedding.display()))?;
            let vector = embedding_from_json(&text)?;
            let count = proxy.register(&label, &vector).await?;
            println!("Registered {label}; gallery now has {count} identities");
        }
        Commands::Start => {
            if proxy.start().await? {
                println!("Monitoring started");
            } else {
                println!("Monitoring already running");
            }
        }
        Commands::Stop => {
            if proxy.stop().await? {
                println!("Monitoring stopped");
            } else {
                println!("Monitoring was not running");
            }
        }
    }

    Ok(())
}

/// D-Bus member invoked by a subcommand.
fn method_name(command: &Commands) -> &'static str {
    match command {
        Commands::Status => "Status",
        Commands::Alerts => "Alerts",
        Commands::Faces => "Faces",
        Commands::Identities => "Identities",
        Commands::Register { .. } => "Register",
        Commands::Start => "Start",
        Commands::Stop => "Stop",
    }
}

/// Extract the embedding array from a file and re-encode it for the wire.
fn embedding_from_json(text: &str) -> Result<String> {
    let value: Value = serde_json::from_str(text).context("embedding file is not JSON")?;
    let array = match &value {
        Value::Array(_) => &value,
        Value::Object(obj) => match obj.get("embedding") {
            Some(inner @ Value::Array(_)) => inner,
            _ => bail!("embedding object has no \"embedding\" array"),
        },
        _ => bail!("embedding must be a JSON array of numbers"),
    };
    Ok(array.to_string())
}

fn format_alert(alert: &Value) -> String {
    let when = alert["timestamp_ms"]
        .as_i64()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{when}  {:<6}  {:<21}  {}",
        alert["severity"].as_str().unwrap_or("?"),
        alert["type"].as_str().unwrap_or("?"),
        alert["message"].as_str().unwrap_or("")
    )
}

fn format_faces(report: &Value) -> Vec<String> {
    if report.is_null() {
        return vec!["Monitoring is idle".to_string()];
    }
    let faces = report["faces"].as_array().cloned().unwrap_or_default();
    let mut lines = vec![format!(
        "Frame {}: {} face(s)",
        report["sequence"].as_u64().unwrap_or(0),
        faces.len()
    )];
    for face in &faces {
        let label = face["label"].as_str().unwrap_or("?");
        let pct = face["confidence_percent"].as_i64().unwrap_or(0).clamp(0, 100);
        let b = &face["box"];
        lines.push(format!(
            "  {:<8} {label} ({pct}%) at [{:.0}, {:.0}, {:.0}x{:.0}]",
            face["id"].as_str().unwrap_or("?"),
            b["x"].as_f64().unwrap_or(0.0),
            b["y"].as_f64().unwrap_or(0.0),
            b["width"].as_f64().unwrap_or(0.0),
            b["height"].as_f64().unwrap_or(0.0),
        ));
    }
    if report["device"]["detected"].as_bool().unwrap_or(false) {
        lines.push(format!(
            "  device in use by {}",
            report["device"]["user"].as_str().unwrap_or("?")
        ));
    }
    lines
}
