//! Profile configuration stored in `~/.graphctl/config.yaml`.
//!
//! A [`Config`] is loaded once in `main` and passed to the command handlers
//! that need it. It remembers the file it was read from so [`Config::reload`]
//! and [`Config::save`] need no extra arguments.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::client::DEFAULT_API_URL;

pub const CONFIG_DIR: &str = ".graphctl";
pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("could not determine home directory")]
    NoHomeDir,
    #[error("profile {0:?} not found")]
    ProfileNotFound(String),
    #[error("profile {0:?} already exists")]
    ProfileExists(String),
}

/// Output document format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

/// A named API endpoint. Keys are never written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Profile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Defaults {
    #[serde(default)]
    pub output: OutputFormat,
    /// Carried so existing config files round-trip; no command paginates.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    50
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: OutputFormat::default(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub current_profile: String,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(skip)]
    path: PathBuf,
}

impl Config {
    /// `~/.graphctl/config.yaml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Read the config at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => Config::default(),
            Ok(content) => serde_yaml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e.into()),
        };
        config.path = path.to_path_buf();
        Ok(config)
    }

    /// Re-read the backing file and return a fresh instance.
    pub fn reload(&self) -> Result<Self, ConfigError> {
        Self::load(&self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
            set_mode(dir, 0o700)?;
        }
        let yaml = serde_yaml::to_string(self)?;
        fs::write(&self.path, yaml)?;
        set_mode(&self.path, 0o600)?;
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// The profile named by `override_name`, or else the current profile.
    pub fn active_profile(&self, override_name: Option<&str>) -> Option<&Profile> {
        match override_name.filter(|n| !n.is_empty()) {
            Some(name) => self.profile(name),
            None => self.profile(&self.current_profile),
        }
    }

    /// Add a profile. The first profile added becomes current.
    pub fn add_profile(&mut self, profile: Profile) -> Result<(), ConfigError> {
        if self.profile(&profile.name).is_some() {
            return Err(ConfigError::ProfileExists(profile.name));
        }
        if self.current_profile.is_empty() {
            self.current_profile = profile.name.clone();
        }
        self.profiles.push(profile);
        Ok(())
    }

    pub fn use_profile(&mut self, name: &str) -> Result<(), ConfigError> {
        if self.profile(name).is_none() {
            return Err(ConfigError::ProfileNotFound(name.to_string()));
        }
        self.current_profile = name.to_string();
        Ok(())
    }

    /// Remove a profile. If it was current, the first remaining profile
    /// takes its place.
    pub fn remove_profile(&mut self, name: &str) -> Result<Profile, ConfigError> {
        let idx = self
            .profiles
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| ConfigError::ProfileNotFound(name.to_string()))?;
        let removed = self.profiles.remove(idx);
        if self.current_profile == name {
            self.current_profile = self
                .profiles
                .first()
                .map(|p| p.name.clone())
                .unwrap_or_default();
        }
        Ok(removed)
    }

    /// Resolve the API base URL: explicit value (flag or env), then the
    /// active profile, then the built-in default.
    pub fn api_url(&self, explicit: Option<&str>, profile: Option<&str>) -> String {
        if let Some(url) = explicit.filter(|u| !u.is_empty()) {
            return url.to_string();
        }
        self.active_profile(profile)
            .and_then(|p| p.api_url.as_deref())
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_API_URL)
            .to_string()
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
