use std::net::SocketAddr;
use std::path::PathBuf;

use nic_common::transcribe::TranscribeConfig;

use crate::error::AppError;
use crate::language::Language;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_RECORDING_PATH: &str = "data/recording.wav";
const DEFAULT_RECORDER_COMMAND: &str = "arecord";
const DEFAULT_EMBEDDING_CACHE_CAPACITY: usize = 1024;

/// Server environments in which the recorder always runs simulated.
const SIMULATED_ENVIRONMENTS: [&str; 3] = ["production", "staging", "docker"];

/// Application configuration loaded explicitly from environment variables.
///
/// Paths to the LanceDB directory and the English catalog are mandatory.
/// Redis URL is optional; if absent, the server runs without caching.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL (e.g. "redis://127.0.0.1:6379"). `None` disables caching.
    pub redis_url: Option<String>,
    /// Filesystem path to the LanceDB data directory.
    pub lancedb_path: String,
    /// Catalog JSON file per configured language. English is always present.
    pub catalogs: Vec<(Language, PathBuf)>,
    pub listen_addr: SocketAddr,
    /// Value of `SERVER_ENV`, "development" when unset.
    pub server_env: String,
    pub disable_audio: bool,
    /// Where the recorder writes its WAV file.
    pub recording_path: PathBuf,
    pub recorder_command: String,
    pub embedding_cache_capacity: usize,
    /// Browser client assets served at `/` when set.
    pub static_dir: Option<PathBuf>,
    /// `None` when no speech-to-text endpoint is configured.
    pub transcribe: Option<TranscribeConfig>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `LANCEDB_PATH`: path to LanceDB data directory
    /// - `NIC_CATALOG_PATH`: English NIC catalog (JSON array)
    ///
    /// Optional:
    /// - `NIC_HINDI_CATALOG_PATH`, `NIC_LISTEN_ADDR`, `REDIS_URL`, `SERVER_ENV`,
    ///   `DISABLE_AUDIO`, `NIC_RECORDING_PATH`, `NIC_RECORDER_COMMAND`,
    ///   `NIC_EMBEDDING_CACHE_CAPACITY`, `NIC_STATIC_DIR`, `TRANSCRIBE_*`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let lancedb_path = lookup("LANCEDB_PATH").ok_or_else(|| {
            AppError::Config("LANCEDB_PATH environment variable is required".to_string())
        })?;

        let english_catalog = lookup("NIC_CATALOG_PATH").ok_or_else(|| {
            AppError::Config("NIC_CATALOG_PATH environment variable is required".to_string())
        })?;

        let mut catalogs = vec![(Language::English, PathBuf::from(english_catalog))];
        if let Some(hindi) = lookup("NIC_HINDI_CATALOG_PATH") {
            catalogs.push((Language::Hindi, PathBuf::from(hindi)));
        }
        for (language, path) in &catalogs {
            if !path.is_file() {
                return Err(AppError::Config(format!(
                    "{language} catalog not found at {}",
                    path.display()
                )));
            }
        }

        let listen_addr = lookup("NIC_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| AppError::Config(format!("invalid NIC_LISTEN_ADDR: {e}")))?;

        let embedding_cache_capacity = match lookup("NIC_EMBEDDING_CACHE_CAPACITY") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    AppError::Config(format!(
                        "NIC_EMBEDDING_CACHE_CAPACITY must be a positive integer, got {raw}"
                    ))
                })?,
            None => DEFAULT_EMBEDDING_CACHE_CAPACITY,
        };

        Ok(Self {
            redis_url: lookup("REDIS_URL"),
            lancedb_path,
            catalogs,
            listen_addr,
            server_env: lookup("SERVER_ENV").unwrap_or_else(|| "development".to_string()),
            disable_audio: lookup("DISABLE_AUDIO").is_some_and(|v| v.trim() == "1"),
            recording_path: lookup("NIC_RECORDING_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDING_PATH)),
            recorder_command: lookup("NIC_RECORDER_COMMAND")
                .unwrap_or_else(|| DEFAULT_RECORDER_COMMAND.to_string()),
            embedding_cache_capacity,
            static_dir: lookup("NIC_STATIC_DIR").map(PathBuf::from),
            transcribe: TranscribeConfig::from_lookup(&lookup),
        })
    }

    /// True when the recorder must never touch real hardware.
    pub fn force_simulation(&self) -> bool {
        self.disable_audio
            || SIMULATED_ENVIRONMENTS.contains(&self.server_env.to_lowercase().as_str())
    }

    pub fn languages(&self) -> impl Iterator<Item = Language> + '_ {
        self.catalogs.iter().map(|(l, _)| *l)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_with_minimal_env() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("nic.json");
        std::fs::write(&catalog, "[]").unwrap();

        let config = Config::from_lookup(lookup_from(&[
            ("LANCEDB_PATH", "/tmp/lance"),
            ("NIC_CATALOG_PATH", catalog.to_str().unwrap()),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr.port(), 8000);
        assert_eq!(config.recorder_command, "arecord");
        assert_eq!(config.embedding_cache_capacity, 1024);
        assert_eq!(config.languages().collect::<Vec<_>>(), vec![Language::English]);
        assert_eq!(config.catalogs, vec![(Language::English, catalog.clone())]);
        assert!(!config.force_simulation());
        assert!(config.transcribe.is_none());
    }

    #[test]
    fn missing_catalog_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("LANCEDB_PATH", "/tmp/lance"),
            ("NIC_CATALOG_PATH", "/definitely/not/here.json"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("english catalog not found"));

        let err = Config::from_lookup(lookup_from(&[("NIC_CATALOG_PATH", "x")])).unwrap_err();
        assert!(err.to_string().contains("LANCEDB_PATH"));
    }

    #[test]
    fn production_environments_force_simulation() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("nic.json");
        std::fs::write(&catalog, "[]").unwrap();

        for (key, value) in [("SERVER_ENV", "Docker"), ("DISABLE_AUDIO", "1")] {
            let config = Config::from_lookup(lookup_from(&[
                ("LANCEDB_PATH", "/tmp/lance"),
                ("NIC_CATALOG_PATH", catalog.to_str().unwrap()),
                (key, value),
            ]))
            .unwrap();
            assert!(config.force_simulation(), "{key}={value}");
        }
    }
}
