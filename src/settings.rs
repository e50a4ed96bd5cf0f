use crate::errors::AppResult;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MIN_COMMIT_ATTEMPTS: u32 = 1;
const MAX_COMMIT_ATTEMPTS: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GovernanceSettings {
    pub data_dir: PathBuf,
    pub storage: StorageKind,
    pub database_file: String,
    pub log_level: String,
    pub log_to_file: bool,
    pub max_commit_attempts: u32,
}

impl Default for GovernanceSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("metric-governance-data"),
            storage: StorageKind::Sqlite,
            database_file: "contracts.db".to_string(),
            log_level: "info".to_string(),
            log_to_file: true,
            max_commit_attempts: crate::store::DEFAULT_MAX_COMMIT_ATTEMPTS,
        }
    }
}

impl GovernanceSettings {
    /// Settings for tests and embedding: in-memory storage, no log files.
    pub fn ephemeral(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            storage: StorageKind::Memory,
            log_to_file: false,
            ..Self::default()
        }
    }

    pub fn from_yaml_str(raw: &str) -> AppResult<Self> {
        let settings: Self = serde_yaml::from_str(raw)?;
        Ok(settings.normalized())
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        Self::from_yaml_str(&raw)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn export_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    fn normalized(mut self) -> Self {
        self.max_commit_attempts = self.max_commit_attempts.clamp(MIN_COMMIT_ATTEMPTS, MAX_COMMIT_ATTEMPTS);
        if self.log_level.trim().is_empty() {
            self.log_level = "info".to_string();
        }
        if self.database_file.trim().is_empty() {
            self.database_file = "contracts.db".to_string();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{GovernanceSettings, StorageKind};
    use std::path::PathBuf;

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let settings = GovernanceSettings::from_yaml_str("dataDir: /var/lib/metrics\nstorage: memory\n").expect("settings");
        assert_eq!(settings.data_dir, PathBuf::from("/var/lib/metrics"));
        assert_eq!(settings.storage, StorageKind::Memory);
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.database_path(), PathBuf::from("/var/lib/metrics/contracts.db"));
    }

    #[test]
    fn commit_attempts_are_clamped() {
        let settings = GovernanceSettings::from_yaml_str("maxCommitAttempts: 0\nlogLevel: ''\n").expect("settings");
        assert_eq!(settings.max_commit_attempts, 1);
        assert_eq!(settings.log_level, "info");
        let settings = GovernanceSettings::from_yaml_str("maxCommitAttempts: 1000").expect("settings");
        assert_eq!(settings.max_commit_attempts, 64);
    }

    #[test]
    fn unknown_storage_is_rejected() {
        let error = GovernanceSettings::from_yaml_str("storage: postgres").expect_err("invalid storage");
        assert_eq!(error.code(), "INVALID_INPUT");
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("governance.yaml");
        std::fs::write(&path, "logToFile: false\ndatabaseFile: metrics.sqlite\n").expect("write");
        let settings = GovernanceSettings::load(&path).expect("load");
        assert!(!settings.log_to_file);
        assert_eq!(settings.database_file, "metrics.sqlite");
        assert!(GovernanceSettings::load(&dir.path().join("missing.yaml")).is_err());
    }
}
