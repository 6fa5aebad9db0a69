use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};

/// CLI configuration stored in config.toml under the lamina home
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// content store location; defaults to `<home>/blobs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<PathBuf>,
}

impl Config {
    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    /// load the config from the lamina home, defaulting when absent
    pub fn load_default() -> Result<Self> {
        let path = home_dir().join("config.toml");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// resolved content store location
    pub fn store_path(&self) -> PathBuf {
        self.store
            .clone()
            .unwrap_or_else(|| home_dir().join("blobs"))
    }
}

/// lamina home: `$LAMINA_PATH`, or `~/.local/lamina`
pub fn home_dir() -> PathBuf {
    if let Ok(path) = std::env::var("LAMINA_PATH") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".local").join("lamina")
}
