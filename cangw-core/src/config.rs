//! Configuration file management for cangwd.
//!
//! Reads/writes `~/.cangw/config.yaml` with device, listener, and logging
//! settings. Parsed by hand in the same small YAML subset the rest of this
//! gateway's control-plane inputs use — no job definitions live here, those
//! are installed at runtime through `GatewayControl`.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub devices: DevicesConfig,
    pub listener: ListenerConfig,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct DevicesConfig {
    /// Interface names to open at startup, in index order — `names[0]` is
    /// device index 1, `names[1]` is index 2, and so on, matching what
    /// `CreateRequest::src_index` and `dst_index` refer to. Index 0 is
    /// reserved (unset / DELETE-all sentinel) and never assigned here.
    pub names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            devices: DevicesConfig {
                names: vec!["can0".into(), "can1".into()],
            },
            listener: ListenerConfig {
                host: "127.0.0.1".into(),
                port: 8623,
            },
            log_level: "info".into(),
        }
    }
}

pub fn config_dir() -> PathBuf {
    dirs_home().join(".cangw")
}

pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.cangw/config.yaml`, falling back to defaults if the
/// file is missing or unparsable.
pub fn load_config() -> Config {
    let path = config_file();
    let Ok(text) = std::fs::read_to_string(&path) else {
        return Config::default();
    };
    parse_config(&text).unwrap_or_default()
}

pub fn save_config(config: &Config) -> std::io::Result<PathBuf> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let path = config_file();
    std::fs::write(&path, serialize_config(config))?;
    Ok(path)
}

fn parse_config(text: &str) -> Option<Config> {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;
    let mut devices: Vec<String> = Vec::new();
    let mut in_devices_list = false;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        if let Some(name) = stripped.strip_prefix("- ") {
            if in_devices_list {
                devices.push(name.trim_matches('"').to_string());
            }
            continue;
        }
        in_devices_list = false;

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        if let Some((key, val)) = stripped.split_once(':') {
            let key = key.trim();
            let val = val.trim();

            if !is_indented {
                if val.is_empty() {
                    current_section = Some(key.to_string());
                } else {
                    current_section = None;
                    if key == "log_level" {
                        config.log_level = unquote(val);
                    }
                }
            } else if let Some(ref section) = current_section {
                match section.as_str() {
                    "devices" if key == "names" && val.is_empty() => in_devices_list = true,
                    "listener" => match key {
                        "host" => config.listener.host = unquote(val),
                        "port" => {
                            if let Ok(v) = val.parse() {
                                config.listener.port = v;
                            }
                        }
                        _ => {}
                    },
                    _ => {}
                }
            }
        }
    }

    if !devices.is_empty() {
        config.devices.names = devices;
    }
    Some(config)
}

fn unquote(val: &str) -> String {
    if (val.starts_with('"') && val.ends_with('"')) || (val.starts_with('\'') && val.ends_with('\'')) {
        val[1..val.len() - 1].to_string()
    } else {
        val.to_string()
    }
}

fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# cangwd configuration".to_string(), String::new()];

    lines.push("devices:".into());
    lines.push("  names:".into());
    for name in &config.devices.names {
        lines.push(format!("    - \"{name}\""));
    }
    lines.push(String::new());

    lines.push("listener:".into());
    lines.push(format!("  host: \"{}\"", config.listener.host));
    lines.push(format!("  port: {}", config.listener.port));
    lines.push(String::new());

    lines.push(format!("log_level: \"{}\"", config.log_level));

    lines.join("\n") + "\n"
}
