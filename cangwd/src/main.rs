//! cangwd: CLI and management-API daemon for the CAN-to-CAN frame gateway.
//!
//! `serve` hosts the management API (backed by `cangw-sim`'s in-memory bus,
//! since this workspace has no real SocketCAN backend); every other
//! subcommand is a thin `reqwest` client talking to a running `serve`
//! instance, printed with `comfy-table` the way `adsb`'s CLI reports its
//! own tables.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use serde_json::json;

use cangw_core::config::{self, Config};
use cangw_core::device::{DeliverySubsystem, DeviceRegistry};
use cangw_core::GatewayControl;
use cangw_sim::SimBus;

mod web;

#[derive(Parser)]
#[command(name = "cangwd", version, about = "CAN-to-CAN frame gateway daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the management API over a simulated CAN bus.
    Serve {
        #[arg(long, env = "CANGWD_HOST")]
        host: Option<String>,
        #[arg(long, env = "CANGWD_PORT")]
        port: Option<u16>,
    },

    /// Install a pure-forward or SET-id forwarding rule.
    Create {
        #[arg(long, default_value = "http://127.0.0.1:8623")]
        url: String,
        #[arg(long)]
        src_index: u32,
        #[arg(long)]
        dst_index: u32,
        #[arg(long, default_value_t = 0)]
        can_id: u32,
        #[arg(long, default_value_t = 0)]
        can_mask: u32,
        /// Overwrite the forwarded frame's id with this value (MOD_SET).
        #[arg(long)]
        set_id: Option<u32>,
        /// Pass the ECHO flag through to the destination device's send.
        #[arg(long)]
        echo: bool,
        #[arg(long)]
        src_tstamp: bool,
    },

    /// Remove a rule by the id `dump` reported for it.
    Delete {
        #[arg(long, default_value = "http://127.0.0.1:8623")]
        url: String,
        job_id: u64,
    },

    /// Remove every installed rule.
    DeleteAll {
        #[arg(long, default_value = "http://127.0.0.1:8623")]
        url: String,
    },

    /// List installed rules with their forward/drop counters.
    Dump {
        #[arg(long, default_value = "http://127.0.0.1:8623")]
        url: String,
    },

    /// Feed a frame onto a simulated device's receive side.
    Inject {
        #[arg(long, default_value = "http://127.0.0.1:8623")]
        url: String,
        #[arg(long)]
        device_index: u32,
        #[arg(long)]
        can_id: u32,
        #[arg(long)]
        dlc: u8,
        /// Up to 8 hex bytes, e.g. `--data 01 02 03`.
        #[arg(long, value_delimiter = ' ', num_args = 0..=8, default_value = "")]
        data: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => cmd_serve(host, port).await,
        Commands::Create {
            url,
            src_index,
            dst_index,
            can_id,
            can_mask,
            set_id,
            echo,
            src_tstamp,
        } => cmd_create(&url, src_index, dst_index, can_id, can_mask, set_id, echo, src_tstamp).await,
        Commands::Delete { url, job_id } => cmd_delete(&url, job_id).await,
        Commands::DeleteAll { url } => cmd_delete_all(&url).await,
        Commands::Dump { url } => cmd_dump(&url).await,
        Commands::Inject {
            url,
            device_index,
            can_id,
            dlc,
            data,
        } => cmd_inject(&url, device_index, can_id, dlc, data).await,
    }
}

async fn cmd_serve(host: Option<String>, port: Option<u16>) {
    let config = config::load_config();
    let host = host.unwrap_or(config.listener.host.clone());
    let port = port.unwrap_or(config.listener.port);

    let bus = Arc::new(SimBus::new(config.devices.names.clone()));
    let registry: Arc<dyn DeviceRegistry> = bus.clone();
    let delivery: Arc<dyn DeliverySubsystem> = bus.clone();
    let control = GatewayControl::new(registry, delivery);
    let state = Arc::new(web::AppState { control, bus });

    log::info!(
        "starting cangwd with devices {:?}",
        config.devices.names
    );
    web::serve(state, host, port).await;
}

fn print_request_error(context: &str, err: reqwest::Error) -> ! {
    eprintln!("{context}: {err}");
    std::process::exit(1);
}

#[allow(clippy::too_many_arguments)]
async fn cmd_create(
    url: &str,
    src_index: u32,
    dst_index: u32,
    can_id: u32,
    can_mask: u32,
    set_id: Option<u32>,
    echo: bool,
    src_tstamp: bool,
) {
    let set = match set_id {
        Some(id) => json!({ "id": true, "template_id": id }),
        None => json!({}),
    };
    let body = json!({
        "src_index": src_index,
        "dst_index": dst_index,
        "filter": { "can_id": can_id, "can_mask": can_mask },
        "flags": { "src_tstamp": src_tstamp, "echo": echo },
        "set": set,
    });

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{url}/jobs"))
        .json(&body)
        .send()
        .await
        .unwrap_or_else(|e| print_request_error("create request failed", e));

    if resp.status().is_success() {
        let parsed: serde_json::Value = resp.json().await.unwrap_or_default();
        println!("created job {}", parsed["job_id"]);
    } else {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        eprintln!("create failed ({status}): {body}");
        std::process::exit(1);
    }
}

async fn cmd_delete(url: &str, job_id: u64) {
    let client = reqwest::Client::new();
    let resp = client
        .delete(format!("{url}/jobs/{job_id}"))
        .send()
        .await
        .unwrap_or_else(|e| print_request_error("delete request failed", e));

    if resp.status().is_success() {
        println!("deleted job {job_id}");
    } else {
        eprintln!("delete failed: {}", resp.status());
        std::process::exit(1);
    }
}

async fn cmd_delete_all(url: &str) {
    let client = reqwest::Client::new();
    let resp = client
        .delete(format!("{url}/jobs"))
        .send()
        .await
        .unwrap_or_else(|e| print_request_error("delete-all request failed", e));

    if resp.status().is_success() {
        println!("deleted all jobs");
    } else {
        eprintln!("delete-all failed: {}", resp.status());
        std::process::exit(1);
    }
}

async fn cmd_dump(url: &str) {
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{url}/jobs"))
        .send()
        .await
        .unwrap_or_else(|e| print_request_error("dump request failed", e));

    let dump: cangw_core::control::DumpResponse = resp.json().await.unwrap_or_else(|e| {
        eprintln!("malformed dump response: {e}");
        std::process::exit(1);
    });

    if dump.entries.is_empty() {
        println!("no jobs installed");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["id", "src", "can_id", "can_mask", "dst", "handled", "dropped"]);
    for entry in &dump.entries {
        table.add_row(vec![
            Cell::new(entry.job_id),
            Cell::new(entry.match_key.src_index),
            Cell::new(format!("{:#x}", entry.match_key.filter.can_id)),
            Cell::new(format!("{:#x}", entry.match_key.filter.can_mask)),
            Cell::new(entry.dst_index),
            Cell::new(entry.frame_count),
            Cell::new(entry.dropped_count),
        ]);
    }
    println!("{table}");
}

async fn cmd_inject(url: &str, device_index: u32, can_id: u32, dlc: u8, data: Vec<String>) {
    let mut bytes = [0u8; 8];
    for (i, hex) in data.iter().enumerate().take(8) {
        if hex.is_empty() {
            continue;
        }
        bytes[i] = u8::from_str_radix(hex.trim_start_matches("0x"), 16).unwrap_or_else(|_| {
            eprintln!("invalid hex byte: {hex}");
            std::process::exit(1);
        });
    }

    let body = json!({
        "device_index": device_index,
        "can_id": can_id,
        "dlc": dlc,
        "data": bytes,
    });

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{url}/inject"))
        .json(&body)
        .send()
        .await
        .unwrap_or_else(|e| print_request_error("inject request failed", e));

    if resp.status().is_success() {
        println!("injected frame on device {device_index}");
    } else {
        eprintln!("inject failed: {}", resp.status());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_drives_serve_device_list() {
        let config = Config::default();
        assert_eq!(config.devices.names, vec!["can0", "can1"]);
    }
}
