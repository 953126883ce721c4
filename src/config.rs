use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

/// Environment variable overriding the repository root.
pub const ROOT_ENV: &str = "CAPSTAN_ROOT";

#[derive(Error, Debug)]
pub enum CapstanConfigError {
    #[error("cannot load config file")]
    Load(#[from] io::Error),
    #[error("cannot parse config file")]
    Parse(#[from] serde_yaml::Error),
    #[error("unsupported config kind")]
    KindNotSupported,
    #[error("unsupported config api version")]
    VersionNotSupported,
    #[error("cannot determine the home directory")]
    NoHome,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CapstanConfig {
    /// The api version of the capstan config file
    pub api_version: String,
    /// The kind of the capstan config file
    pub kind: String,
    /// The image repository configuration
    #[serde(default)]
    pub repository: RepositoryConfig,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    /// Folder holding the images, defaults to ~/.capstan/repository
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl CapstanConfig {
    /// Load a CapstanConfig from a file.
    ///
    /// Arguments:
    ///
    /// * `path`: The path to the config file.
    ///
    /// Returns:
    ///
    /// A Result<CapstanConfig>
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(CapstanConfigError::Load)?;
        let reader = BufReader::new(file);
        let config: CapstanConfig =
            serde_yaml::from_reader(reader).map_err(CapstanConfigError::Parse)?;

        if config.kind != "Config" {
            return Err(CapstanConfigError::KindNotSupported.into());
        }

        if config.api_version != "capstan.io/v1alpha1" {
            return Err(CapstanConfigError::VersionNotSupported.into());
        }

        Ok(config)
    }
}

/// Resolve the repository root once at startup.
///
/// `$CAPSTAN_ROOT` wins when set and non-empty, then `repository.root` from
/// the config file, then `<home>/.capstan/repository`.
pub fn resolve_root(env_root: Option<String>, config: Option<&CapstanConfig>) -> Result<PathBuf> {
    if let Some(root) = env_root.filter(|root| !root.is_empty()) {
        debug!("using repository root from ${}: {}", ROOT_ENV, root);
        return Ok(PathBuf::from(root));
    }

    if let Some(root) = config.and_then(|config| config.repository.root.clone()) {
        debug!("using repository root from config file: {}", root.display());
        return Ok(root);
    }

    let home = dirs::home_dir().ok_or(CapstanConfigError::NoHome)?;
    Ok(default_root(&home))
}

pub fn default_root(home: &Path) -> PathBuf {
    home.join(".capstan").join("repository")
}
