use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use cmisync_engine::SyncFolderConfig;
use cmisync_remote::SessionParams;

fn default_poll_interval_secs() -> u64 {
    300
}

/// One registered folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderEntry {
    pub canonical_name: String,
    pub local_path: PathBuf,
    pub remote_folder_path: String,
    pub url: String,
    pub user: String,
    pub password: String,
    pub repository_id: String,
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl FolderEntry {
    pub fn to_sync_config(&self) -> SyncFolderConfig {
        SyncFolderConfig {
            canonical_name: self.canonical_name.clone(),
            local_path: self.local_path.clone(),
            remote_folder_path: self.remote_folder_path.clone(),
            session: SessionParams::new(
                &self.url,
                &self.user,
                &self.password,
                &self.repository_id,
            ),
            bidirectional: self.bidirectional,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub folders: Vec<FolderEntry>,
}

impl Config {
    /// Load from the default location; a missing file is an empty config.
    pub fn load() -> Result<Config> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    pub fn folder(&self, canonical_name: &str) -> Option<&FolderEntry> {
        self.folders.iter().find(|f| f.canonical_name == canonical_name)
    }

    pub fn add_folder(&mut self, entry: FolderEntry) -> Result<()> {
        if self.folder(&entry.canonical_name).is_some() {
            bail!("A folder named '{}' is already registered", entry.canonical_name);
        }
        self.folders.push(entry);
        Ok(())
    }

    pub fn remove_folder(&mut self, canonical_name: &str) -> Result<FolderEntry> {
        let index = self
            .folders
            .iter()
            .position(|f| f.canonical_name == canonical_name)
            .with_context(|| format!("No folder named '{canonical_name}' is registered"))?;
        Ok(self.folders.remove(index))
    }
}

/// Path of the config file.
pub fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Home directory not found")?;
    Ok(home.join(".cmisync").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> FolderEntry {
        FolderEntry {
            canonical_name: name.to_string(),
            local_path: PathBuf::from("/tmp/docs"),
            remote_folder_path: "/Sites/docs".to_string(),
            url: "http://server/alfresco/api/-default-/public/cmis/versions/1.0/atom".to_string(),
            user: "admin".to_string(),
            password: "secret".to_string(),
            repository_id: "-default-".to_string(),
            bidirectional: true,
            poll_interval_secs: 300,
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.add_folder(entry("docs")).unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.folders.len(), 1);
        let folder = loaded.folder("docs").unwrap();
        assert_eq!(folder.repository_id, "-default-");
        assert!(folder.bidirectional);
    }

    #[test]
    fn test_missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(loaded.folders.is_empty());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut config = Config::default();
        config.add_folder(entry("docs")).unwrap();
        assert!(config.add_folder(entry("docs")).is_err());
    }

    #[test]
    fn test_remove_folder() {
        let mut config = Config::default();
        config.add_folder(entry("docs")).unwrap();
        config.remove_folder("docs").unwrap();
        assert!(config.folders.is_empty());
        assert!(config.remove_folder("docs").is_err());
    }

    #[test]
    fn test_session_mapping() {
        let folder = entry("docs").to_sync_config();
        assert_eq!(folder.session.binding_type, "atompub");
        assert_eq!(folder.session.user, "admin");
        assert_eq!(folder.remote_folder_path, "/Sites/docs");
    }
}
