//! Persisted Browser Settings
//!
//! Everything the adblock layer remembers across restarts lives in one JSON
//! document:
//! - `adblock_enabled`: global interception switch
//! - `adblock_filter_names` / `adblock_filter_urls`: paired subscription lists
//! - `homepage`: initial navigation URL
//!
//! Every mutation goes through [`SettingsStore::update`], which rewrites the
//! whole file before the in-memory copy changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// Name of the settings document inside the config directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Subscriptions installed on first run
const DEFAULT_FILTER_LISTS: &[(&str, &str)] = &[
    ("EasyList", "https://easylist.to/easylist/easylist.txt"),
    ("EasyPrivacy", "https://easylist.to/easylist/easyprivacy.txt"),
];

const DEFAULT_HOMEPAGE: &str = "https://start.duckduckgo.com";

/// Errors while reading or writing the settings document
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed settings file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredSettings")]
pub struct Settings {
    /// Whether requests are checked against the filter lists at all
    pub adblock_enabled: bool,
    /// Display names, positionally paired with `adblock_filter_urls`
    pub adblock_filter_names: Vec<String>,
    /// Source URLs, positionally paired with `adblock_filter_names`
    pub adblock_filter_urls: Vec<Url>,
    /// Page opened for new tabs
    pub homepage: String,
}

impl Default for Settings {
    fn default() -> Self {
        let (adblock_filter_names, adblock_filter_urls) = DEFAULT_FILTER_LISTS
            .iter()
            .filter_map(|(name, url)| Url::parse(url).ok().map(|url| (name.to_string(), url)))
            .unzip();

        Self {
            adblock_enabled: true,
            adblock_filter_names,
            adblock_filter_urls,
            homepage: DEFAULT_HOMEPAGE.to_string(),
        }
    }
}

/// On-disk shape. The subscription lists fall back to the shipped defaults
/// only when both keys are absent; a lone key pairs with an empty list.
#[derive(Deserialize)]
#[serde(default)]
struct StoredSettings {
    adblock_enabled: bool,
    adblock_filter_names: Option<Vec<String>>,
    adblock_filter_urls: Option<Vec<Url>>,
    homepage: String,
}

impl Default for StoredSettings {
    fn default() -> Self {
        let defaults = Settings::default();
        Self {
            adblock_enabled: defaults.adblock_enabled,
            adblock_filter_names: None,
            adblock_filter_urls: None,
            homepage: defaults.homepage,
        }
    }
}

impl From<StoredSettings> for Settings {
    fn from(stored: StoredSettings) -> Self {
        let (adblock_filter_names, adblock_filter_urls) =
            match (stored.adblock_filter_names, stored.adblock_filter_urls) {
                (None, None) => {
                    let defaults = Settings::default();
                    (defaults.adblock_filter_names, defaults.adblock_filter_urls)
                }
                (names, urls) => (names.unwrap_or_default(), urls.unwrap_or_default()),
            };

        Self {
            adblock_enabled: stored.adblock_enabled,
            adblock_filter_names,
            adblock_filter_urls,
            homepage: stored.homepage,
        }
    }
}

/// File-backed settings shared by every component of one profile
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    current: Mutex<Settings>,
}

impl SettingsStore {
    /// Open the settings document at `path`.
    ///
    /// A missing file yields the defaults; nothing is written until the
    /// first [`update`](Self::update).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let current = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).map_err(|source| SettingsError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No settings at {}, using defaults", path.display());
                Settings::default()
            }
            Err(source) => return Err(SettingsError::Io { path, source }),
        };

        Ok(Self {
            path,
            current: Mutex::new(current),
        })
    }

    /// Open `settings.json` inside `config_dir`
    pub fn open_in(config_dir: &Path) -> Result<Self, SettingsError> {
        Self::open(config_dir.join(SETTINGS_FILE))
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current settings
    pub fn get(&self) -> Settings {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` and persist the result.
    ///
    /// The in-memory copy only changes once the file has been written.
    pub fn update<F>(&self, f: F) -> Result<(), SettingsError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = current.clone();
        f(&mut next);
        write_settings(&self.path, &next)?;
        *current = next;
        Ok(())
    }
}

/// Write through a temp file so a crash never leaves half a document
fn write_settings(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    let io_err = |source: std::io::Error| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let json = serde_json::to_string_pretty(settings).map_err(|source| SettingsError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;

    debug!("Settings written to {}", path.display());
    Ok(())
}

/// Per-user data directory (`$XDG_DATA_HOME/skiff` and friends)
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skiff")
}

/// Per-user config directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skiff")
}
