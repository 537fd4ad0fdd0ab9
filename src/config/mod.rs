use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::supervisor::console::DEFAULT_CONSOLE_BUFFER;

/// Config file looked up in the current directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "launcher.toml";
/// Environment override for the config file path.
pub const CONFIG_ENV: &str = "MCMMO_LAUNCHER_CONFIG";

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LauncherConfig {
    pub server: ServerSection,
    pub java: JavaSection,
    pub ipc: IpcSection,
    /// Console lines kept in memory per session
    pub console_buffer_size: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerSection {
    /// Directory holding the server archive, server.properties and the worlds
    pub working_dir: PathBuf,
    /// Server archive, relative to `working_dir`
    pub archive: String,
    /// Properties file, relative to `working_dir`
    pub properties_file: String,
    /// Delegating start script; replaces the Java invocation when set
    pub script: Option<String>,
    /// Console command that asks the server to shut down
    pub stop_command: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct JavaSection {
    /// Runtime binaries tried in order (glob patterns allowed) before falling
    /// back to `JAVA_HOME` and then `java` on PATH
    pub preferred_paths: Vec<String>,
    pub max_heap: String,
    pub min_heap: String,
    pub gc_flags: Vec<String>,
    pub nogui: bool,
    pub extra_args: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct IpcSection {
    pub listen_addr: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            java: JavaSection::default(),
            ipc: IpcSection::default(),
            console_buffer_size: DEFAULT_CONSOLE_BUFFER,
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            archive: "paper.jar".to_string(),
            properties_file: "server.properties".to_string(),
            script: None,
            stop_command: "stop".to_string(),
        }
    }
}

impl Default for JavaSection {
    fn default() -> Self {
        Self {
            preferred_paths: vec![
                "/opt/homebrew/bin/java".to_string(),
                "/opt/homebrew/opt/openjdk@21/bin/java".to_string(),
            ],
            max_heap: "4G".to_string(),
            min_heap: "2G".to_string(),
            gc_flags: vec![
                "-XX:+UseG1GC".to_string(),
                "-XX:+ParallelRefProcEnabled".to_string(),
            ],
            nogui: true,
            extra_args: Vec::new(),
        }
    }
}

impl Default for IpcSection {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:57475".to_string(),
        }
    }
}

impl LauncherConfig {
    /// Resolve which config file to read: explicit path → `MCMMO_LAUNCHER_CONFIG` → `launcher.toml`.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Load the config; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)?;
        let cfg = Self::parse(&s)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(cfg)
    }

    pub fn parse(s: &str) -> Result<Self, toml::de::Error> {
        let cfg: Self = toml::from_str(s)?;
        Ok(cfg)
    }

    /// Properties file location inside the working directory.
    pub fn properties_path(&self) -> PathBuf {
        self.server.working_dir.join(&self.server.properties_file)
    }

    pub fn ipc_base_url(&self) -> String {
        format!("http://{}", self.ipc.listen_addr)
    }
}
