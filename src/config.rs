use crate::format::ImageLayout;
use crate::store::ReferenceStore;
use anyhow::{ensure, Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEMATCH_CONFIG_PATH").unwrap_or("/usr/local/etc/facematch/config.toml"))
});

pub static REFERENCE_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEMATCH_REFERENCE_PATH").unwrap_or("descriptors.ndjson"))
});

pub const DEFAULT_TOP_K: usize = 26;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// NDJSON file holding one `{key, embedding}` record per line.
    pub reference_path: PathBuf,
    /// Root of the identity image database, used to resolve `file` paths.
    pub db_prefix: String,
    pub image_dir: String,
    pub image_suffix: String,
    pub top_k: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference_path: REFERENCE_PATH.to_path_buf(),
            db_prefix: "db/small".to_string(),
            image_dir: "images".to_string(),
            image_suffix: "_cmp.png".to_string(),
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.top_k > 0, "top_k must be at least 1");
        ensure!(
            !self.reference_path.as_os_str().is_empty(),
            "reference_path must not be empty"
        );
        Ok(())
    }

    pub fn reference_store(&self) -> ReferenceStore {
        ReferenceStore::new(&self.reference_path)
    }

    pub fn image_layout(&self) -> ImageLayout {
        ImageLayout {
            prefix: self.db_prefix.clone(),
            image_dir: self.image_dir.clone(),
            suffix: self.image_suffix.clone(),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
