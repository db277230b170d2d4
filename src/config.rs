// ⚙️ Pipeline Configuration
//
// Built once at startup and only ever passed by reference. Relative input
// paths hang off `config_folder`, relative output paths off `data_folder`.

use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DATA_FOLDER_ENV: &str = "FIRE_DATA_FOLDER";
pub const CONFIG_FOLDER_ENV: &str = "FIRE_CONFIG_FOLDER";

const ACCEPTED_DUPLICATES_FILE: &str = "accepted_duplicates.csv";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Owner of every row no split rule claims
    pub default_owner: String,

    pub data_folder: PathBuf,
    pub config_folder: PathBuf,

    // inputs, under config_folder
    pub descriptor_folder: PathBuf,
    pub categories_file: PathBuf,
    pub splits_file: PathBuf,
    pub fixes_file: PathBuf,
    pub targets_file: PathBuf,
    pub use_targets: bool,

    // data, under data_folder
    pub source_folder: PathBuf,
    pub final_ledger_file: PathBuf,
    pub backup_folder: PathBuf,
    pub changes_folder: PathBuf,
    pub duplicates_folder: PathBuf,
    pub intermediate_folder: PathBuf,
    pub journal_file: Option<PathBuf>,

    /// Write a snapshot of every stage to `intermediate_folder`
    pub debug: bool,
    /// Rows shown at the categorization gate
    pub uncategorized_preview: usize,
    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            default_owner: "mkk".to_string(),
            data_folder: PathBuf::from("data"),
            config_folder: PathBuf::from("config"),
            descriptor_folder: PathBuf::from("descriptors"),
            categories_file: PathBuf::from("categories.csv"),
            splits_file: PathBuf::from("splits.csv"),
            fixes_file: PathBuf::from("fixes.csv"),
            targets_file: PathBuf::from("targets.csv"),
            use_targets: true,
            source_folder: PathBuf::from("source"),
            final_ledger_file: PathBuf::from("final.csv"),
            backup_folder: PathBuf::from("backup"),
            changes_folder: PathBuf::from("changes"),
            duplicates_folder: PathBuf::from("duplicates"),
            intermediate_folder: PathBuf::from("intermediate"),
            journal_file: None,
            debug: false,
            uncategorized_preview: 25,
            log_level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Defaults rooted at the given folders
    pub fn with_folders<P: AsRef<Path>, Q: AsRef<Path>>(data_folder: P, config_folder: Q) -> Self {
        PipelineConfig {
            data_folder: data_folder.as_ref().to_path_buf(),
            config_folder: config_folder.as_ref().to_path_buf(),
            ..Default::default()
        }
        .resolved(Path::new(""))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file; folders resolve against the file's directory
    /// after environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let base = path.parent().unwrap_or(Path::new(""));
        Ok(Self::from_toml_str(&text)?
            .with_env(|key| std::env::var(key).ok())
            .resolved(base))
    }

    /// Apply `FIRE_DATA_FOLDER` / `FIRE_CONFIG_FOLDER` from `lookup`
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(folder) = lookup(DATA_FOLDER_ENV).filter(|v| !v.is_empty()) {
            self.data_folder = PathBuf::from(folder);
        }
        if let Some(folder) = lookup(CONFIG_FOLDER_ENV).filter(|v| !v.is_empty()) {
            self.config_folder = PathBuf::from(folder);
        }
        self
    }

    /// Anchor every relative path. Absolute paths are kept as they are.
    pub fn resolved(mut self, base: &Path) -> Self {
        self.data_folder = base.join(&self.data_folder);
        self.config_folder = base.join(&self.config_folder);

        let config = self.config_folder.clone();
        for path in [
            &mut self.descriptor_folder,
            &mut self.categories_file,
            &mut self.splits_file,
            &mut self.fixes_file,
            &mut self.targets_file,
        ] {
            *path = config.join(&*path);
        }

        let data = self.data_folder.clone();
        for path in [
            &mut self.source_folder,
            &mut self.final_ledger_file,
            &mut self.backup_folder,
            &mut self.changes_folder,
            &mut self.duplicates_folder,
            &mut self.intermediate_folder,
        ] {
            *path = data.join(&*path);
        }
        if let Some(journal) = self.journal_file.as_mut() {
            *journal = data.join(&*journal);
        }

        self
    }

    fn validate(&self) -> Result<()> {
        if self.default_owner.trim().is_empty() {
            return Err(LedgerError::validation("config", "default_owner must not be empty"));
        }
        if self.uncategorized_preview == 0 {
            return Err(LedgerError::validation("config", "uncategorized_preview must be at least 1"));
        }
        Ok(())
    }

    pub fn accepted_duplicates_file(&self) -> PathBuf {
        self.duplicates_folder.join(ACCEPTED_DUPLICATES_FILE)
    }
}
