//! Composition root: one settings store, one filter list manager, one
//! interceptor, injected into the web profile.

use crate::profile::WebProfile;
use anyhow::{Context, Result};
use skiff_adblock::{
    FilterListManager, NoopInterceptor, RequestInterceptor, SettingsStore, UrlRequestInterceptor,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct App {
    pub settings: Arc<SettingsStore>,
    pub filter_lists: FilterListManager,
    /// `None` when running without content blocking
    pub interceptor: Option<Arc<RequestInterceptor>>,
    pub profile: WebProfile,
}

impl App {
    pub fn new(data_dir: &Path, config_dir: &Path, adblock: bool) -> Result<Self> {
        let settings = Arc::new(
            SettingsStore::open_in(config_dir)
                .with_context(|| format!("Failed to load settings from {}", config_dir.display()))?,
        );

        let filter_lists = FilterListManager::new(Arc::clone(&settings), data_dir)
            .context("Failed to load filter list subscriptions")?;

        let interceptor =
            adblock.then(|| Arc::new(RequestInterceptor::new(Arc::clone(&settings), data_dir)));

        let profile_interceptor: Arc<dyn UrlRequestInterceptor> = match &interceptor {
            Some(interceptor) => Arc::clone(interceptor) as Arc<dyn UrlRequestInterceptor>,
            None => {
                info!("Content blocking not available in this session");
                Arc::new(NoopInterceptor)
            }
        };

        Ok(Self {
            settings,
            filter_lists,
            interceptor,
            profile: WebProfile::new("default", profile_interceptor),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_adblock::{InterceptDecision, RequestInfo, ResourceType};
    use url::Url;

    #[test]
    fn test_without_adblock_allows() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::new(&dir.path().join("data"), &dir.path().join("config"), false).unwrap();

        assert!(app.interceptor.is_none());
        let info = RequestInfo::new(
            Url::parse("https://ads.example.com/a.js").unwrap(),
            Url::parse("https://news.example.org/").unwrap(),
            ResourceType::Script,
        );
        assert_eq!(app.profile.handle_request(&info), InterceptDecision::Allow);
    }

    #[test]
    fn test_corrupted_subscriptions_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("settings.json"),
            r#"{ "adblock_filter_names": ["Only a name"], "adblock_filter_urls": [] }"#,
        )
        .unwrap();

        let result = App::new(&dir.path().join("data"), &config_dir, false);
        assert!(result.is_err());
    }
}
