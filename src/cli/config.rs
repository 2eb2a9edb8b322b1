use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::chunker::ChunkSettings;
use crate::crawler::engine::CrawlSettings;
use crate::proxy::manager::{Proxy, ProxyManager};
use crate::queue::worker::QueueSettings;
use crate::scraper::engine::ScrapeOptions;
use crate::storage::StorageSettings;

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct HarvesterConfig {
    pub crawl: CrawlSettings,
    pub scrape: ScrapeOptions,
    pub chunk: ChunkSettings,
    pub proxy: ProxySettings,
    pub queue: QueueSettings,
    pub storage: StorageSettings,
}

/// Proxy pool settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxySettings {
    pub enabled: bool,

    /// Seconds one proxy is reused before round-robin advances
    pub rotation_window_secs: u64,

    /// Optional flat file of `host:port[:user:pass[:protocol[:country]]]`
    /// lines loaded on startup
    pub file: Option<PathBuf>,

    /// Proxies configured inline
    #[serde(default)]
    pub list: Vec<Proxy>,

    /// Endpoint used by `proxies --check`
    pub check_url: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            rotation_window_secs: 300,
            file: None,
            list: Vec::new(),
            check_url: "https://www.google.com".to_string(),
        }
    }
}

impl HarvesterConfig {
    /// Reject configurations with out-of-range values before anything runs
    pub fn validate(&self) -> Result<()> {
        self.crawl.validate().context("Invalid crawl settings")?;
        self.scrape.validate().context("Invalid scrape settings")?;
        self.chunk.validate().context("Invalid chunk settings")?;
        self.queue.validate().context("Invalid queue settings")?;
        if self.proxy.enabled && self.proxy.rotation_window_secs == 0 {
            anyhow::bail!("proxy rotation_window_secs must be positive");
        }
        Ok(())
    }

    /// Assemble the proxy pool this configuration describes, if enabled
    pub fn build_proxy_manager(&self) -> Result<Option<Arc<ProxyManager>>> {
        if !self.proxy.enabled {
            return Ok(None);
        }

        let manager = ProxyManager::with_rotation_window(Duration::from_secs(
            self.proxy.rotation_window_secs,
        ));
        manager.add_many(self.proxy.list.clone());

        if let Some(file) = &self.proxy.file {
            let added = manager.load_from_file(file)?;
            info!("Loaded {} proxies from {}", added, file.display());
        }

        Ok(Some(Arc::new(manager)))
    }

    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) =
            directories::ProjectDirs::from("com", "site-harvester", "site-harvester")
        {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        path.push("sites");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }
        path.pop();
        path
    }

    /// Load the default configuration, creating it on first run
    pub fn load_default() -> Result<Self> {
        let config_path = Self::config_dir().join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a site profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let profile_path = Self::config_dir()
            .join("sites")
            .join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;
        config.validate()?;

        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        self.save_to_file(&Self::config_dir().join("default.yaml"))
    }

    /// Save the configuration as a site profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let sites_dir = Self::config_dir().join("sites");
        if !sites_dir.exists() {
            fs::create_dir_all(&sites_dir)
                .context(format!("Failed to create sites directory: {}", sites_dir.display()))?;
        }

        self.save_to_file(&sites_dir.join(format!("{}.yaml", profile)))
    }

    fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents =
            serde_yaml::to_string(self).context("Failed to serialize configuration")?;
        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available site profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let sites_dir = Self::config_dir().join("sites");
        if !sites_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();
        for entry in fs::read_dir(sites_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }
}
