//! Stack file discovery and loading
//!
//! A stack file (`stack.kdl`) describes one deployment. Without one the
//! built-in default deployment is used.

pub mod error;
pub mod parser;

pub use error::*;
pub use parser::{parse_stack_file, parse_stack_str};

use stackup_cloud::DeploymentConfig;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "STACKUP_CONFIG_PATH";

/// Find the project's stack file
///
/// Search order:
/// 1. `STACKUP_CONFIG_PATH` (direct path)
/// 2. current directory: `stack.local.kdl`, `stack.kdl`
/// 3. `./.stackup/stack.kdl`
/// 4. `~/.config/stackup/stack.kdl` (global)
pub fn find_stack_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{} points to a missing file", CONFIG_PATH_ENV);
    }

    let current_dir = std::env::current_dir()?;
    let candidates = [
        current_dir.join("stack.local.kdl"),
        current_dir.join("stack.kdl"),
        current_dir.join(".stackup").join("stack.kdl"),
    ];
    if let Some(path) = candidates.into_iter().find(|p| p.exists()) {
        return Ok(path);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("stackup").join("stack.kdl");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::StackFileNotFound)
}

/// A validated configuration and the file it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: DeploymentConfig,
    /// `None` when the built-in default is in use
    pub source: Option<PathBuf>,
}

/// Load `explicit` if given, otherwise the discovered stack file, otherwise
/// the built-in default. The result is always validated.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let source = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => match find_stack_file() {
            Ok(path) => Some(path),
            Err(ConfigError::StackFileNotFound) => None,
            Err(e) => return Err(e),
        },
    };

    let config = match &source {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading stack file");
            parse_stack_file(path)?
        }
        None => {
            tracing::debug!("No stack file, using the built-in deployment");
            DeploymentConfig::default()
        }
    };

    config.validate()?;
    Ok(LoadedConfig { config, source })
}
