use crate::models::{MainConfig, UserConfig};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

/// Prefix of environment variables overriding the main config,
/// e.g. `FUCTOOL__FUC_DATA__TOOL_TIMEOUT=600`
pub const ENV_PREFIX: &str = "FUCTOOL";

/// Configuration manager for loading and saving YAML configuration files.
///
/// Manages two configuration files:
/// - Main config (`FUCTool.yaml`): tools, patches, known hashes, regions, dump names, config.bin options
/// - User config (`FUCTool Settings.yaml`): logging preferences
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    main_config_path: Utf8PathBuf,
    user_config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing configuration files (e.g., "FUCTool Data")
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            main_config_path: config_dir.join("FUCTool.yaml"),
            user_config_path: config_dir.join("FUCTool Settings.yaml"),
            config_dir,
        })
    }

    /// Load the main configuration file with environment overrides applied.
    ///
    /// # Returns
    /// The loaded MainConfig, or the defaults if the file doesn't exist
    pub fn load_main_config(&self) -> Result<MainConfig> {
        let file_contents = if self.main_config_path.exists() {
            fs::read_to_string(&self.main_config_path)
                .with_context(|| format!("Failed to read main config: {}", self.main_config_path))?
        } else {
            tracing::warn!(
                "Main config file not found at {}, using defaults",
                self.main_config_path
            );
            serde_yaml_ng::to_string(&self.create_default_main_config())
                .context("Failed to serialize default main config")?
        };

        let config: MainConfig = Config::builder()
            .add_source(File::from_str(&file_contents, FileFormat::Yaml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|built| built.try_deserialize())
            .with_context(|| format!("Failed to parse main config: {}", self.main_config_path))?;

        tracing::info!("Loaded main config from {}", self.main_config_path);
        Ok(config)
    }

    /// Save the main configuration file.
    pub fn save_main_config(&self, config: &MainConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize main config to YAML")?;

        fs::write(&self.main_config_path, yaml_string)
            .with_context(|| format!("Failed to write main config: {}", self.main_config_path))?;

        tracing::info!("Saved main config to {}", self.main_config_path);
        Ok(())
    }

    /// Load the user configuration file.
    ///
    /// # Returns
    /// The loaded UserConfig, or default if file doesn't exist
    pub fn load_user_config(&self) -> Result<UserConfig> {
        if !self.user_config_path.exists() {
            tracing::warn!(
                "User config file not found at {}, using defaults",
                self.user_config_path
            );
            return Ok(UserConfig::default());
        }

        let file_contents = fs::read_to_string(&self.user_config_path)
            .with_context(|| format!("Failed to read user config: {}", self.user_config_path))?;

        let config: UserConfig = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse user config: {}", self.user_config_path))?;

        tracing::info!("Loaded user config from {}", self.user_config_path);
        Ok(config)
    }

    /// Save the user configuration file.
    pub fn save_user_config(&self, config: &UserConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize user config to YAML")?;

        fs::write(&self.user_config_path, yaml_string)
            .with_context(|| format!("Failed to write user config: {}", self.user_config_path))?;

        tracing::info!("Saved user config to {}", self.user_config_path);
        Ok(())
    }

    /// Write the default main config if none exists yet. Returns whether a file was written.
    pub fn write_default_main_config(&self) -> Result<bool> {
        if self.main_config_path.exists() {
            return Ok(false);
        }
        self.save_main_config(&self.create_default_main_config())?;
        Ok(true)
    }

    /// Default main configuration, laid out like the shipped `bin/` and `res/` folders.
    fn create_default_main_config(&self) -> MainConfig {
        use crate::models::{FucData, KnownHashes, PatchPaths, RegionConfig, ToolPaths};
        use indexmap::IndexMap;

        let mut regions = IndexMap::new();
        regions.insert(
            "ULES01213".to_string(),
            RegionConfig {
                name: "EU".to_string(),
                key_file: "FU.bin".to_string(),
                mode: 1,
            },
        );
        regions.insert(
            "ULUS10391".to_string(),
            RegionConfig {
                name: "US".to_string(),
                key_file: "FU.bin".to_string(),
                mode: 2,
            },
        );
        regions.insert(
            "ULJM05500".to_string(),
            RegionConfig {
                name: "JP".to_string(),
                key_file: "P2G.bin".to_string(),
                mode: 3,
            },
        );

        let fuc_data = FucData {
            version: crate::VERSION.to_string(),
            tools: ToolPaths {
                xdelta: "bin/xdelta3.exe".to_string(),
                umd_replace: "bin/UMD-replace.exe".to_string(),
                psp_save: "bin/psp-save-w32.exe".to_string(),
                data_bin_crypt: "bin/databin.exe".to_string(),
            },
            patches: PatchPaths {
                compat: "res/patches/compat.xdelta".to_string(),
                align: "res/patches/align.xdelta".to_string(),
                final_patch: "res/patches/FUC_1.3.0_FINAL.xdelta".to_string(),
            },
            known_hashes: KnownHashes {
                umd: String::new(),
                psn: String::new(),
            },
            regions,
            keys_dir: "res".to_string(),
            staging_dir: "temp".to_string(),
            quests_dir: "quests".to_string(),
            tool_timeout: 1800,
            save_encrypt_mode: 5,
            dump_names: Vec::new(),
            config_bin: Vec::new(),
        };

        MainConfig { fuc_data }
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn main_config_path(&self) -> &Utf8Path {
        &self.main_config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    #[test]
    fn test_create_config_manager() {
        let (manager, _temp_dir) = create_test_config_manager();
        assert!(manager.main_config_path().ends_with("FUCTool.yaml"));
    }

    #[test]
    fn test_load_save_user_config() {
        let (manager, _temp_dir) = create_test_config_manager();

        let mut config = UserConfig::default();
        config.fuc_settings.debug_mode = true;
        manager.save_user_config(&config).unwrap();

        let loaded = manager.load_user_config().unwrap();
        assert!(loaded.fuc_settings.debug_mode);
        assert_eq!(loaded.fuc_settings.log_dir, "logs");
    }

    #[test]
    fn test_default_main_config() {
        let (manager, _temp_dir) = create_test_config_manager();
        let config = manager.create_default_main_config();

        assert_eq!(config.fuc_data.regions.len(), 3);
        assert_eq!(config.region("ULJM05500").unwrap().key_file, "P2G.bin");
        assert_eq!(config.fuc_data.save_encrypt_mode, 5);
        assert_eq!(config.fuc_data.patches.compat, "res/patches/compat.xdelta");
    }

    #[test]
    fn test_missing_main_config_loads_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        let config = manager.load_main_config().unwrap();

        assert_eq!(config.fuc_data.staging_dir, "temp");
        assert_eq!(config.fuc_data.tool_timeout, 1800);
        assert!(!manager.main_config_path().exists());
    }

    #[test]
    fn test_write_default_main_config_once() {
        let (manager, _temp_dir) = create_test_config_manager();

        assert!(manager.write_default_main_config().unwrap());
        assert!(!manager.write_default_main_config().unwrap());

        let loaded = manager.load_main_config().unwrap();
        assert_eq!(loaded.fuc_data.tools.xdelta, "bin/xdelta3.exe");
    }
}
