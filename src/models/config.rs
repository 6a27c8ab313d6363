use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Main configuration from `FUCTool.yaml`
///
/// Contains tool locations, patch files, the accepted ISO digests, save
/// regions and the config.bin option table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainConfig {
    pub fuc_data: FucData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FucData {
    pub version: String,

    pub tools: ToolPaths,

    pub patches: PatchPaths,

    pub known_hashes: KnownHashes,

    /// Save regions keyed by product code (e.g. `ULUS10391`)
    pub regions: IndexMap<String, RegionConfig>,

    /// Directory holding the save key files
    #[serde(default = "default_keys_dir")]
    pub keys_dir: String,

    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,

    #[serde(default = "default_quests_dir")]
    pub quests_dir: String,

    /// Seconds before an external tool is killed, 0 disables the limit
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout: u64,

    #[serde(default = "default_save_encrypt_mode")]
    pub save_encrypt_mode: u8,

    #[serde(default)]
    pub dump_names: Vec<DumpName>,

    #[serde(default)]
    pub config_bin: Vec<ConfigOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPaths {
    pub xdelta: String,
    pub umd_replace: String,
    pub psp_save: String,
    pub data_bin_crypt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchPaths {
    pub compat: String,
    pub align: String,
    #[serde(rename = "final")]
    pub final_patch: String,
}

/// MD5 digests of the two accepted source dumps, lowercase hex
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownHashes {
    pub umd: String,
    pub psn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionConfig {
    pub name: String,
    pub key_file: String,
    pub mode: u8,
}

/// Human readable name for one DATA.BIN entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DumpName {
    pub index: u32,
    pub name: String,
}

/// One editable option of config.bin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigOption {
    pub description: String,
    pub offset: usize,
    pub values: Vec<ConfigValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigValue {
    pub label: String,
    /// Bytes written at the option offset, hex encoded
    pub data: String,
}

impl ConfigValue {
    /// Decode the hex payload.
    pub fn bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(&self.data)
    }
}

/// User configuration from `FUCTool Settings.yaml`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    pub fuc_settings: FucSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FucSettings {
    #[serde(default)]
    pub debug_mode: bool,

    #[serde(default = "default_console_output")]
    pub console_output: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for FucSettings {
    fn default() -> Self {
        Self {
            debug_mode: false,
            console_output: true,
            log_dir: default_log_dir(),
        }
    }
}

fn default_keys_dir() -> String {
    "res".to_string()
}

fn default_staging_dir() -> String {
    "temp".to_string()
}

fn default_quests_dir() -> String {
    "quests".to_string()
}

fn default_tool_timeout() -> u64 {
    1800
}

fn default_save_encrypt_mode() -> u8 {
    5
}

fn default_console_output() -> bool {
    true
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl MainConfig {
    /// Look up the region for a save product code, ignoring case
    pub fn region(&self, product_code: &str) -> Option<&RegionConfig> {
        find_region(&self.fuc_data.regions, product_code)
    }

    /// Name table for the DATA.BIN dump rename pass
    pub fn dump_name_table(&self) -> IndexMap<u32, String> {
        self.fuc_data
            .dump_names
            .iter()
            .map(|entry| (entry.index, entry.name.clone()))
            .collect()
    }
}

/// Case-insensitive product code lookup
pub fn find_region<'a>(regions: &'a IndexMap<String, RegionConfig>, product_code: &str) -> Option<&'a RegionConfig> {
    regions
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(product_code))
        .map(|(_, region)| region)
}
