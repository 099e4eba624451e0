//! Loading the service table from a `services.toml` file.
//!
//! Descriptors can equally be constructed in code; the file format exists
//! for control panels that keep their service definitions as data.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::supervisor::ServiceDescriptor;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
    /// Whether the embedding application should call `shutdown_all` when
    /// it exits.
    #[serde(default = "default_true")]
    pub auto_stop_on_exit: bool,
}

fn default_true() -> bool {
    true
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            services: HashMap::new(),
            auto_stop_on_exit: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl HubConfig {
    /// Build the descriptor table handed to `Supervisor::new`.
    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        self.services
            .iter()
            .map(|(name, service)| ServiceDescriptor {
                name: name.clone(),
                command: service.command.clone(),
                args: service.args.clone(),
                cwd: service.cwd.clone(),
                port: service.port,
                log_path: service.log_file.clone(),
            })
            .collect()
    }
}

pub fn load_config(path: &Path) -> Result<HubConfig> {
    let content = fs::read_to_string(path).map_err(|e| AppError::config(e.to_string()))?;
    toml::from_str(&content).map_err(|e| AppError::config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_table_with_defaults() {
        let config: HubConfig = toml::from_str(
            r#"
            [services.rag]
            command = "scripts/start_rag.sh"
            port = 8002
            log_file = "logs/rag.log"

            [services.companion]
            command = "scripts/start_companion.sh"
            args = ["--tray"]
            "#,
        )
        .unwrap();

        assert!(config.auto_stop_on_exit);
        assert_eq!(config.services.len(), 2);

        let rag = &config.services["rag"];
        assert_eq!(rag.port, Some(8002));
        assert!(rag.args.is_empty());

        let companion = &config.services["companion"];
        assert_eq!(companion.port, None);
        assert_eq!(companion.args, vec!["--tray".to_string()]);
    }

    #[test]
    fn descriptors_carry_names_from_table_keys() {
        let config: HubConfig = toml::from_str(
            r#"
            auto_stop_on_exit = false

            [services.asr]
            command = "scripts/start_asr.sh"
            port = 1000
            "#,
        )
        .unwrap();

        assert!(!config.auto_stop_on_exit);
        let descriptors = config.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "asr");
        assert_eq!(descriptors[0].port, Some(1000));
        assert!(descriptors[0].log_path.is_none());
    }
}
