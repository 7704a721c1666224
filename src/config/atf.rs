// src/config/atf.rs
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::error::{AtfError, Result};
use crate::impact::TemplateCatalog;
use crate::signing::CommandSigner;

pub const ENV_CONFIG_PATH: &str = "ATF_CONFIG_PATH";
pub const ENV_ARCHIVE_DIR: &str = "ATF_ARCHIVE_DIR";
pub const DEFAULT_CONFIG_PATH: &str = "config/atf.toml";

fn default_archive_dir() -> PathBuf {
    PathBuf::from("archives")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtfConfig {
    /// Root directory of the filesystem archive backend.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    /// Template catalog JSON; the built-in catalog is used when unset.
    #[serde(default)]
    pub templates_path: Option<PathBuf>,
    #[serde(default)]
    pub signer: Option<SignerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    pub sign_command: Vec<String>,
    pub verify_command: Vec<String>,
    /// Key handle used when the caller does not name one.
    #[serde(default)]
    pub default_key: Option<String>,
}

impl Default for AtfConfig {
    fn default() -> Self {
        Self {
            archive_dir: default_archive_dir(),
            templates_path: None,
            signer: None,
        }
    }
}

impl AtfConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        let mut cfg: AtfConfig = toml::from_str(&data).map_err(|e| {
            AtfError::InvalidDocument(format!("config {}: {e}", path.as_ref().display()))
        })?;

        // Relative paths in the file are relative to the file, not the CWD.
        if let Some(base) = path.as_ref().parent() {
            cfg.archive_dir = rebase(base, &cfg.archive_dir);
            cfg.templates_path = cfg.templates_path.map(|p| rebase(base, &p));
        }
        cfg.apply_env();
        Ok(cfg)
    }

    /// Resolution order:
    /// 1) $ATF_CONFIG_PATH (must exist)
    /// 2) config/atf.toml
    /// 3) built-in defaults
    ///
    /// `$ATF_ARCHIVE_DIR` overrides `archive_dir` in every case.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(AtfError::InvalidDocument(format!(
                    "{ENV_CONFIG_PATH} points to non-existent path {}",
                    pb.display()
                )));
            }
            return Self::load_from_file(&pb);
        }
        // The default location is relative to the working directory, so no rebasing.
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            let data = fs::read_to_string(&default_path)?;
            let mut cfg: AtfConfig = toml::from_str(&data).map_err(|e| {
                AtfError::InvalidDocument(format!("config {DEFAULT_CONFIG_PATH}: {e}"))
            })?;
            cfg.apply_env();
            return Ok(cfg);
        }
        let mut cfg = Self::default();
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = env::var(ENV_ARCHIVE_DIR) {
            if !dir.trim().is_empty() {
                self.archive_dir = PathBuf::from(dir);
            }
        }
    }

    pub fn catalog(&self) -> Result<TemplateCatalog> {
        match &self.templates_path {
            Some(p) => TemplateCatalog::load_from_file(p),
            None => Ok(TemplateCatalog::builtin()),
        }
    }

    pub fn command_signer(&self) -> Result<Option<CommandSigner>> {
        self.signer
            .as_ref()
            .map(|s| CommandSigner::new(s.sign_command.clone(), s.verify_command.clone()))
            .transpose()
    }
}

fn rebase(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() || base.as_os_str().is_empty() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}
