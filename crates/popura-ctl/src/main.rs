//! popura-ctl: query a running popurad through its admin API.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_PORT: u16 = 9101;

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ListResponse {
    handlers: Vec<HookInfo>,
}

#[derive(Deserialize)]
struct HookInfo {
    name: String,
    description: String,
}

// ── HTTP helpers ──────────────────────────────────────────────────────────────

fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}/api/admin", port)
}

async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    let resp = reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to popurad at {}, is it running?", url))?;
    let status = resp.status();
    if !status.is_success() {
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let reason = body["error"].as_str().unwrap_or("no details");
        anyhow::bail!("{} returned {}: {}", url, status, reason);
    }
    resp.json::<T>().await.context("failed to parse response")
}

async fn post_json(url: &str, args: &Value) -> Result<Value> {
    let resp = reqwest::Client::new()
        .post(url)
        .json(args)
        .send()
        .await
        .with_context(|| format!("failed to connect to popurad at {}, is it running?", url))?;
    let status = resp.status();
    let body: Value = resp.json().await.context("failed to parse response")?;
    if !status.is_success() {
        anyhow::bail!(
            "{} returned {}: {}",
            url,
            status,
            body["error"].as_str().unwrap_or("no details")
        );
    }
    Ok(body)
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_list(port: u16) -> Result<()> {
    let resp: ListResponse = get_json(&base_url(port)).await?;

    if resp.handlers.is_empty() {
        println!("No admin hooks registered.");
        return Ok(());
    }
    let width = resp.handlers.iter().map(|h| h.name.len()).max().unwrap_or(0);
    for h in &resp.handlers {
        println!("  {:width$}  {}", h.name, h.description, width = width);
    }
    Ok(())
}

async fn cmd_call(port: u16, hook: &str, args: Option<&str>) -> Result<()> {
    let url = format!("{}/{}", base_url(port), hook);
    let resp = match args {
        Some(raw) => {
            let args: Value = serde_json::from_str(raw).context("arguments must be JSON")?;
            post_json(&url, &args).await?
        }
        None => get_json::<Value>(&url).await?,
    };
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}

fn print_usage() {
    println!("Usage: popura-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  list              List admin hooks");
    println!("  <hook> [json]     Call a hook, e.g. getAutoPeering or getRAdv");
    println!();
    println!("Options:");
    println!("  --port <port>   Admin API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Split `--port <port>` out of argv. Everything else is the command.
fn parse_args(args: &[String]) -> Result<(u16, Vec<&str>)> {
    let mut port = DEFAULT_PORT;
    let mut remaining = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--port" {
            port = iter
                .next()
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(arg.as_str());
        }
    }
    Ok((port, remaining))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (port, remaining) = parse_args(&args)?;

    match remaining.as_slice() {
        ["list"] | [] => cmd_list(port).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        [hook] => cmd_call(port, hook, None).await,
        [hook, json] => cmd_call(port, hook, Some(*json)).await,
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
