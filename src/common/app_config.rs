// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::service::action::ComputeSlots;
use crate::service::flight_server::{DEFAULT_MAX_MESSAGE_BYTES, FlightServerOptions};

static CONFIG: OnceLock<TexFlightConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static TexFlightConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = TexFlightConfig::load_from_file(path.as_ref())?;
    Ok(CONFIG.get_or_init(|| cfg))
}

/// Loads `$TEXFLIGHT_CONFIG` or `./texflight.toml`; without either, every
/// setting takes its default.
pub fn init_from_env_or_default() -> Result<&'static TexFlightConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = match config_path_from_env_or_default() {
        Some(path) => TexFlightConfig::load_from_file(&path)?,
        None => TexFlightConfig::default(),
    };
    Ok(CONFIG.get_or_init(|| cfg))
}

fn config_path_from_env_or_default() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("TEXFLIGHT_CONFIG")
        && !p.trim().is_empty()
    {
        return Some(PathBuf::from(p));
    }
    let candidate = PathBuf::from("texflight.toml");
    candidate.exists().then_some(candidate)
}

#[derive(Clone, Debug, Deserialize)]
pub struct TexFlightConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "texflight=debug,h2=off,hyper=off,tonic=off"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub slots: SlotConfig,
}

impl TexFlightConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: TexFlightConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn flight_server_options(&self) -> FlightServerOptions {
        FlightServerOptions {
            host: self.server.host.clone(),
            port: self.server.port,
            advertise_host: self.server.advertise_host.clone(),
            shutdown_grace: Duration::from_millis(self.server.shutdown_grace_ms),
            max_message_bytes: self.server.max_message_bytes,
            slots: ComputeSlots::new(&self.slots.input, &self.slots.output),
        }
    }
}

impl Default for TexFlightConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            slots: SlotConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default)]
    pub advertise_host: Option<String>,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_server_host() -> String {
    "localhost".to_string()
}
fn default_server_port() -> u16 {
    5005
}
fn default_worker_threads() -> usize {
    4
}
fn default_shutdown_grace_ms() -> u64 {
    500
}
fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            advertise_host: None,
            worker_threads: default_worker_threads(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

/// Paths of the pre-trained artifacts loaded at startup.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub vectorizer_path: Option<PathBuf>,
    #[serde(default)]
    pub classifier_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SlotConfig {
    #[serde(default = "default_input_slot")]
    pub input: String,
    #[serde(default = "default_output_slot")]
    pub output: String,
}

fn default_input_slot() -> String {
    "ToPython".to_string()
}
fn default_output_slot() -> String {
    "FromPython".to_string()
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            input: default_input_slot(),
            output: default_output_slot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::TexFlightConfig;
    use crate::common::types::RegistryKey;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg: TexFlightConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.server.host, "localhost");
        assert_eq!(cfg.server.port, 5005);
        assert_eq!(cfg.slots.input, "ToPython");
        assert_eq!(cfg.slots.output, "FromPython");
        assert!(cfg.model.vectorizer_path.is_none());
    }

    #[test]
    fn server_options_follow_config() {
        let cfg: TexFlightConfig = toml::from_str(
            r#"
log_level = "debug"

[server]
host = "0.0.0.0"
port = 6006
shutdown_grace_ms = 250

[model]
vectorizer_path = "/models/cv.json"
classifier_path = "/models/clf.json"

[slots]
input = "in"
output = "out"
"#,
        )
        .unwrap();
        let options = cfg.flight_server_options();
        assert_eq!(options.port, 6006);
        assert_eq!(options.shutdown_grace, Duration::from_millis(250));
        assert_eq!(options.slots.input, RegistryKey::for_path(["in"]));
        assert_eq!(options.slots.output, RegistryKey::for_path(["out"]));
        assert_eq!(
            cfg.model.classifier_path.as_deref(),
            Some(std::path::Path::new("/models/clf.json"))
        );
    }

    #[test]
    fn load_from_missing_file_reports_path() {
        let err = TexFlightConfig::load_from_file(std::path::Path::new("/nonexistent/tf.toml"))
            .expect_err("missing file");
        assert!(err.to_string().contains("/nonexistent/tf.toml"));
    }
}
