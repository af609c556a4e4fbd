//! Posts a synthetic error event to a running Periscope instance.
//!
//! The target is a DSN of the form `http://<ingestion-key>@<host>:<port>/<public-id>`,
//! taken from `--dsn` or `PERISCOPE_DSN`.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "send-event", about = "Send an event to a Periscope instance")]
struct Args {
    /// Project DSN
    #[arg(long, env = "PERISCOPE_DSN")]
    dsn: String,
    /// Fingerprint element; repeat for several
    #[arg(long = "fingerprint")]
    fingerprint: Vec<String>,
    /// Exception message
    #[arg(long, default_value = "synthetic error")]
    message: String,
    /// Number of events to send
    #[arg(long, default_value_t = 1)]
    count: u32,
}

/// Ingestion endpoint and key derived from a DSN
#[derive(Debug, PartialEq, Eq)]
struct Target {
    endpoint: Url,
    key: String,
}

fn parse_dsn(dsn: &str) -> Result<Target> {
    let url = Url::parse(dsn).with_context(|| format!("invalid DSN: {}", dsn))?;

    let key = url.username();
    if key.is_empty() {
        bail!("DSN has no ingestion key");
    }
    let public_id = url.path().trim_matches('/');
    if public_id.is_empty() {
        bail!("DSN has no project id");
    }

    let mut endpoint = url.clone();
    endpoint
        .set_username("")
        .map_err(|_| anyhow::anyhow!("DSN cannot carry credentials"))?;
    endpoint.set_path(&format!("/api/{}/envelope", public_id));

    Ok(Target {
        endpoint,
        key: key.to_string(),
    })
}

fn envelope(event_id: &str, fingerprint: &[String], message: &str) -> Result<String> {
    let now = Utc::now();
    let header = json!({ "event_id": event_id, "sent_at": now.to_rfc3339() });
    let item = json!({ "type": "event" });
    let event = json!({
        "event_id": event_id,
        "timestamp": now.to_rfc3339(),
        "level": "error",
        "platform": "rust",
        "fingerprint": fingerprint,
        "exception": {
            "values": [{
                "type": "SyntheticError",
                "value": message,
                "stacktrace": {
                    "frames": [{
                        "function": "main",
                        "module": "send_event",
                        "filename": "send_event.rs",
                        "lineno": 1
                    }]
                }
            }]
        }
    });

    Ok(format!(
        "{}\n{}\n{}\n",
        serde_json::to_string(&header)?,
        serde_json::to_string(&item)?,
        serde_json::to_string(&event)?
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let target = parse_dsn(&args.dsn)?;
    let client = reqwest::Client::new();
    let auth = format!(
        "Sentry sentry_version=7, sentry_client=periscope-send-event/{}, sentry_key={}",
        env!("CARGO_PKG_VERSION"),
        target.key
    );

    for _ in 0..args.count {
        let event_id = Uuid::new_v4().simple().to_string();
        let response = client
            .post(target.endpoint.clone())
            .header("X-Sentry-Auth", &auth)
            .header("Content-Type", "application/x-sentry-envelope")
            .body(envelope(&event_id, &args.fingerprint, &args.message)?)
            .send()
            .await
            .context("sending event")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("event {} rejected with {}: {}", event_id, status, body);
        }
        println!("sent {}", event_id);
    }

    Ok(())
}
