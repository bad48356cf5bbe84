//! Matching Engine Boundary
//!
//! The interceptor only knows [`MatchingEngine`]: build it from the filter
//! list directory, then ask `classify(url, source_url, resource_type)`.
//! [`AdblockEngine`] implements it with Brave's adblock-rust engine, which
//! understands EasyList, EasyPrivacy and uBlock Origin syntax.

use adblock::Engine;
use adblock::lists::{FilterSet, ParseOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors while compiling the filter lists
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Cannot read filter list directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No usable filter lists in {0}")]
    NoFilterLists(PathBuf),
}

/// Verdict for one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// A blocking rule matched (and no exception overrode it)
    pub matched: bool,
    /// Replacement resource; `None` or empty means no redirect
    pub redirect: Option<String>,
}

/// Compiled filter rules, immutable once built
pub trait MatchingEngine: Send + Sync {
    fn classify(&self, url: &str, source_url: &str, resource_type: &str) -> Classification;
}

/// Builds an engine from the filter list directory
pub type EngineBuilder =
    Arc<dyn Fn(&Path) -> Result<Box<dyn MatchingEngine>, EngineError> + Send + Sync>;

/// Default builder: [`AdblockEngine::from_dir`]
pub fn adblock_engine_builder() -> EngineBuilder {
    Arc::new(|dir: &Path| {
        AdblockEngine::from_dir(dir).map(|engine| Box::new(engine) as Box<dyn MatchingEngine>)
    })
}

/// adblock-rust engine compiled from every file in a directory
pub struct AdblockEngine {
    engine: Engine,
}

impl AdblockEngine {
    /// Compile all list files in `dir`.
    ///
    /// Unreadable files are skipped with a warning; a directory without a
    /// single rule is an error.
    pub fn from_dir(dir: &Path) -> Result<Self, EngineError> {
        let read_dir = fs::read_dir(dir).map_err(|source| EngineError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let mut filter_set = FilterSet::new(false);
        let mut total_rules = 0;

        for path in &paths {
            // Lists in legacy encodings still carry ASCII rules
            let bytes = match fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping unreadable filter list {}: {}", path.display(), e);
                    continue;
                }
            };
            let content = String::from_utf8_lossy(&bytes);

            let count = content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('!') && !l.starts_with('['))
                .count();
            filter_set.add_filters(content.lines(), ParseOptions::default());
            total_rules += count;
            debug!("Loaded {} rules from {}", count, path.display());
        }

        if total_rules == 0 {
            return Err(EngineError::NoFilterLists(dir.to_path_buf()));
        }

        info!(
            "Adblock engine compiled from {} lists ({} rules)",
            paths.len(),
            total_rules
        );

        Ok(Self {
            engine: Engine::from_filter_set(filter_set, true),
        })
    }

    /// Compile an engine from in-memory rules
    pub fn from_rules<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter_set = FilterSet::new(false);
        filter_set.add_filters(rules, ParseOptions::default());
        Self {
            engine: Engine::from_filter_set(filter_set, true),
        }
    }
}

impl MatchingEngine for AdblockEngine {
    fn classify(&self, url: &str, source_url: &str, resource_type: &str) -> Classification {
        match adblock::request::Request::new(url, source_url, resource_type) {
            Ok(request) => {
                let result = self.engine.check_network_request(&request);
                Classification {
                    matched: result.matched,
                    redirect: result.redirect,
                }
            }
            Err(e) => {
                debug!("Unclassifiable request {}: {:?}", url, e);
                Classification::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(engine: &AdblockEngine, url: &str, source: &str, resource_type: &str) -> bool {
        engine.classify(url, source, resource_type).matched
    }

    #[test]
    fn test_blocks_matching_request() {
        let engine = AdblockEngine::from_rules(["||ads.example.com^"]);

        let verdict = engine.classify(
            "https://ads.example.com/banner.js",
            "https://news.example.org/",
            "script",
        );

        assert!(verdict.matched);
        assert_eq!(verdict.redirect, None);
    }

    #[test]
    fn test_exception_rule_wins() {
        let engine = AdblockEngine::from_rules([
            "||tracker.example^",
            "@@||tracker.example^$domain=partner.example",
        ]);

        assert!(blocked(
            &engine,
            "https://tracker.example/p.gif",
            "https://other.example/",
            "image",
        ));
        assert!(!blocked(
            &engine,
            "https://tracker.example/p.gif",
            "https://partner.example/",
            "image",
        ));
    }

    #[test]
    fn test_resource_type_option() {
        let engine = AdblockEngine::from_rules(["||cdn.example^$script"]);

        assert!(blocked(&engine, "https://cdn.example/app.js", "https://site.example/", "script"));
        assert!(!blocked(
            &engine,
            "https://cdn.example/logo.png",
            "https://site.example/",
            "image",
        ));
    }

    #[test]
    fn test_unparseable_url_is_allowed() {
        let engine = AdblockEngine::from_rules(["||ads.example.com^"]);
        let verdict = engine.classify("not a url", "", "other");
        assert_eq!(verdict, Classification::default());
    }

    #[test]
    fn test_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("easylist.txt"), "! comment\n||ads.example.com^\n").unwrap();
        fs::write(dir.path().join("privacy.txt"), "||pixel.example.net^\n").unwrap();

        let engine = AdblockEngine::from_dir(dir.path()).unwrap();

        assert!(blocked(&engine, "https://pixel.example.net/t.gif", "https://a.example/", "image"));
        assert!(!blocked(
            &engine,
            "https://a.example/index.html",
            "https://a.example/",
            "main_frame",
        ));
    }

    #[test]
    fn test_from_dir_tolerates_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("liste.txt"),
            b"! Titel: Liste f\xFCr DE\n||ads.example.com^\n".as_slice(),
        )
        .unwrap();

        let engine = AdblockEngine::from_dir(dir.path()).unwrap();

        assert!(blocked(
            &engine,
            "https://ads.example.com/a.js",
            "https://news.example.org/",
            "script",
        ));
    }

    #[test]
    fn test_empty_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AdblockEngine::from_dir(dir.path()),
            Err(EngineError::NoFilterLists(_))
        ));
    }

    #[test]
    fn test_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AdblockEngine::from_dir(&dir.path().join("absent")),
            Err(EngineError::Io { .. })
        ));
    }
}
