/// Supported catalog languages and the server-wide language preference.
///
/// The preference is held in memory and mirrored to Redis (`nic:v1:language`) so that it
/// survives restarts when Redis is available.
use std::fmt;

use tokio::sync::RwLock;
use tracing::{info, warn};

use nic_common::embedding::EmbeddingModelKind;
use nic_common::redis::RedisCache;

const LANGUAGE_KEY: &str = "nic:v1:language";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Hindi,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::English, Language::Hindi];

    /// Case-insensitive lookup by name, e.g. "Hindi" or " english ".
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "english" => Some(Self::English),
            "hindi" => Some(Self::Hindi),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::English => "english",
            Self::Hindi => "hindi",
        }
    }

    /// ISO-639-1 code passed to the transcription service.
    pub fn iso_code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Hindi => "hi",
        }
    }

    pub fn embedding_model(self) -> EmbeddingModelKind {
        match self {
            Self::English => EmbeddingModelKind::MiniLmL6,
            Self::Hindi => EmbeddingModelKind::MultilingualMiniLmL12,
        }
    }

    /// LanceDB table holding this language's vectors.
    pub fn table_name(self) -> String {
        format!("nic_codes_{}", self.as_str())
    }

    /// Transcript returned by the simulated recorder.
    pub fn simulated_transcript(self) -> &'static str {
        match self {
            Self::English => "this is a test text",
            Self::Hindi => "यह एक परीक्षण पाठ है",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct LanguageSelector {
    current: RwLock<Language>,
    redis: RedisCache,
}

impl LanguageSelector {
    pub fn new(redis: RedisCache) -> Self {
        Self {
            current: RwLock::new(Language::default()),
            redis,
        }
    }

    /// Load the persisted preference, keeping the default when nothing usable is stored.
    pub async fn restore(&self) -> Language {
        let stored = self.redis.get(LANGUAGE_KEY).await;
        let language = match stored.as_deref().map(Language::parse) {
            Some(Some(language)) => language,
            Some(None) => {
                warn!(value = ?stored, "ignoring unknown persisted language");
                Language::default()
            }
            None => Language::default(),
        };
        *self.current.write().await = language;
        info!(language = %language, "language preference restored");
        language
    }

    pub async fn current(&self) -> Language {
        *self.current.read().await
    }

    /// Switch the server language. Returns `None` for names outside [`Language::ALL`].
    pub async fn set(&self, name: &str) -> Option<Language> {
        let language = Language::parse(name)?;
        *self.current.write().await = language;
        self.redis.set(LANGUAGE_KEY, language.as_str()).await;
        info!(language = %language, "language changed");
        Some(language)
    }

    /// The requested language, or the current one when absent or unknown.
    pub async fn resolve(&self, requested: Option<&str>) -> Language {
        match requested.map(Language::parse) {
            Some(Some(language)) => language,
            Some(None) => Language::default(),
            None => self.current().await,
        }
    }
}
