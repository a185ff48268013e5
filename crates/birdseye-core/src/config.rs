//! Settings of the inspector.
//!
//! Settings come from four layers, highest precedence last:
//!
//! 1. built-in defaults
//! 2. a JSON settings file
//! 3. environment variables (`BIRDSEYE_SERVER_URL`, `BIRDSEYE_PORT`)
//! 4. CLI flags
//!
//! Choosing a server URL in layers 3 or 4 also turns off the locally run
//! server, since the URL is only consulted for a remote one.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BirdseyeError, BirdseyeResult};

/// Environment variable overriding the server URL.
pub const ENV_SERVER_URL: &str = "BIRDSEYE_SERVER_URL";

/// Environment variable overriding the local server port.
pub const ENV_PORT: &str = "BIRDSEYE_PORT";

// ============================================================================
// Settings
// ============================================================================

/// Persistent settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Run a local trace server instead of talking to `server_url`.
    pub run_server: bool,
    /// Port of the local server.
    pub port: u16,
    /// Database URL handed to the local server; empty for its default.
    pub db_url: String,
    /// URL of a remote server.
    pub server_url: String,
    /// How often to poll for functions with recorded calls.
    pub poll_interval_ms: u64,
    /// How long after a local server starts its failures stay silent.
    pub error_grace_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            run_server: true,
            port: 7777,
            db_url: String::new(),
            server_url: "http://localhost:7777".to_string(),
            poll_interval_ms: 2000,
            error_grace_ms: 3000,
        }
    }
}

impl Settings {
    /// Read a settings file; missing fields take their defaults.
    pub fn load(path: &Path) -> BirdseyeResult<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            BirdseyeError::config(format!("cannot read {}: {}", path.display(), err))
        })?;
        serde_json::from_str(&content).map_err(|err| {
            BirdseyeError::config(format!("invalid settings in {}: {}", path.display(), err))
        })
    }

    /// Root of the server the settings point at, without trailing slashes.
    pub fn base_url(&self) -> String {
        if self.run_server {
            format!("http://localhost:{}", self.port)
        } else {
            self.server_url.trim_end_matches('/').to_string()
        }
    }

    /// Full URL of an API path such as `call/<id>`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url(), path)
    }

    /// Poll period of the hash poller.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Start-up grace period of a local server.
    pub fn error_grace(&self) -> Duration {
        Duration::from_millis(self.error_grace_ms)
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Where a setting came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Built-in default value.
    Default,
    /// From the settings file.
    File,
    /// From an environment variable.
    EnvVar,
    /// From a CLI flag (highest precedence).
    CliFlag,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigSource::Default => "default",
            ConfigSource::File => "file",
            ConfigSource::EnvVar => "env",
            ConfigSource::CliFlag => "cli",
        };
        f.write_str(name)
    }
}

/// CLI flags that override settings.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    /// --server-url flag.
    pub server_url: Option<String>,
    /// --port flag.
    pub port: Option<u16>,
}

/// Settings together with where the server location came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSettings {
    /// The merged settings.
    pub settings: Settings,
    /// Source of the effective server location.
    pub server_source: ConfigSource,
}

impl ResolvedSettings {
    /// Resolve from all layers, reading the process environment.
    pub fn resolve(file: Option<&Path>, overrides: &SettingsOverrides) -> BirdseyeResult<Self> {
        Self::resolve_with(file, overrides, |name| std::env::var(name).ok())
    }

    /// Resolve from all layers with an explicit environment lookup.
    pub fn resolve_with<F>(
        file: Option<&Path>,
        overrides: &SettingsOverrides,
        env: F,
    ) -> BirdseyeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut resolved = match file {
            Some(path) => ResolvedSettings {
                settings: Settings::load(path)?,
                server_source: ConfigSource::File,
            },
            None => ResolvedSettings {
                settings: Settings::default(),
                server_source: ConfigSource::Default,
            },
        };

        if let Some(port) = env(ENV_PORT) {
            let port = port.trim().parse().map_err(|_| {
                BirdseyeError::config(format!("{} is not a port number: {:?}", ENV_PORT, port))
            })?;
            resolved.set_port(port, ConfigSource::EnvVar);
        }
        if let Some(url) = env(ENV_SERVER_URL) {
            resolved.set_server_url(url, ConfigSource::EnvVar);
        }

        if let Some(port) = overrides.port {
            resolved.set_port(port, ConfigSource::CliFlag);
        }
        if let Some(url) = &overrides.server_url {
            resolved.set_server_url(url.clone(), ConfigSource::CliFlag);
        }

        Ok(resolved)
    }

    fn set_port(&mut self, port: u16, source: ConfigSource) {
        self.settings.port = port;
        if self.settings.run_server {
            self.server_source = source;
        }
    }

    fn set_server_url(&mut self, url: String, source: ConfigSource) {
        self.settings.server_url = url;
        self.settings.run_server = false;
        self.server_source = source;
    }
}

// ============================================================================
// Tests
// ============================================================================
