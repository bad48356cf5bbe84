//! Filter List Subscriptions
//!
//! Keeps the user's filter list subscriptions (name + source URL) and the
//! downloaded copies under `<data dir>/filterlists/`.
//!
//! Refresh flow:
//! 1. `refresh_lists()` bumps the in-flight counter by N, spawns N fetches
//! 2. Each fetch writes its payload to `filterlists/<last URL segment>`
//! 3. Each completion decrements the counter
//! 4. The completion that drains it to zero broadcasts `RefreshFinished`
//!
//! Overlapping refreshes share the counter, so `RefreshFinished` fires once
//! per drain to zero, not once per call.

use crate::client::HttpError;
use crate::fetch::{HttpListFetcher, ListFetcher};
use crate::settings::{SettingsError, SettingsStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

/// Subdirectory of the data dir holding downloaded lists
pub const FILTER_LIST_DIR: &str = "filterlists";

/// Errors from subscription management
#[derive(Debug, Error)]
pub enum FilterListError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Filter list configuration is corrupted: {names} names but {urls} URLs")]
    MismatchedConfig { names: usize, urls: usize },
}

/// Notifications from the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterListEvent {
    /// The in-flight fetch counter drained to zero
    RefreshFinished,
}

/// One subscribed filter list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterListEntry {
    pub name: String,
    pub url: Url,
}

impl FilterListEntry {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            name: name.into(),
            url,
        }
    }

    /// File the downloaded copy is stored under: the last URL path segment
    pub fn file_name(&self) -> Option<&str> {
        self.url
            .path_segments()?
            .next_back()
            .filter(|segment| !segment.is_empty())
    }
}

/// Directory holding the downloaded lists, created on first query
pub fn filter_list_path(data_dir: &Path) -> PathBuf {
    let dir = data_dir.join(FILTER_LIST_DIR);
    if let Err(e) = fs::create_dir_all(&dir) {
        warn!("Failed to create filter list directory {}: {}", dir.display(), e);
    }
    dir
}

/// Read the paired name/URL sequences from settings.
///
/// Sequences of different length are reported, never truncated.
pub fn load_configuration(
    settings: &SettingsStore,
) -> Result<Vec<FilterListEntry>, FilterListError> {
    let current = settings.get();
    let names = current.adblock_filter_names;
    let urls = current.adblock_filter_urls;

    if names.len() != urls.len() {
        return Err(FilterListError::MismatchedConfig {
            names: names.len(),
            urls: urls.len(),
        });
    }

    Ok(names
        .into_iter()
        .zip(urls)
        .map(|(name, url)| FilterListEntry { name, url })
        .collect())
}

/// Replace the persisted subscriptions with `entries`
pub fn write_configuration(
    settings: &SettingsStore,
    entries: &[FilterListEntry],
) -> Result<(), FilterListError> {
    settings.update(|s| {
        s.adblock_filter_names = entries.iter().map(|e| e.name.clone()).collect();
        s.adblock_filter_urls = entries.iter().map(|e| e.url.clone()).collect();
    })?;
    Ok(())
}

/// Owns the subscriptions and refreshes their on-disk copies
pub struct FilterListManager<F: ListFetcher = HttpListFetcher> {
    settings: Arc<SettingsStore>,
    lists: Vec<FilterListEntry>,
    filter_dir: PathBuf,
    fetcher: Arc<F>,
    running: Arc<AtomicUsize>,
    events: broadcast::Sender<FilterListEvent>,
}

impl FilterListManager<HttpListFetcher> {
    /// Manager downloading over HTTP(S) with default client settings
    pub fn new(settings: Arc<SettingsStore>, data_dir: &Path) -> Result<Self, FilterListError> {
        Self::with_fetcher(settings, data_dir, HttpListFetcher::default())
    }
}

impl<F: ListFetcher> FilterListManager<F> {
    pub fn with_fetcher(
        settings: Arc<SettingsStore>,
        data_dir: &Path,
        fetcher: F,
    ) -> Result<Self, FilterListError> {
        let lists = load_configuration(&settings)?;
        let (events, _) = broadcast::channel(16);

        debug!("Loaded {} filter list subscriptions", lists.len());

        Ok(Self {
            settings,
            lists,
            filter_dir: filter_list_path(data_dir),
            fetcher: Arc::new(fetcher),
            running: Arc::new(AtomicUsize::new(0)),
            events,
        })
    }

    /// Current subscriptions, in order
    pub fn filter_lists(&self) -> &[FilterListEntry] {
        &self.lists
    }

    pub fn filter_dir(&self) -> &Path {
        &self.filter_dir
    }

    /// Fetches still outstanding across all refreshes
    pub fn running_requests(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FilterListEvent> {
        self.events.subscribe()
    }

    /// Append a subscription and persist
    pub fn add_filter_list(
        &mut self,
        name: impl Into<String>,
        url: Url,
    ) -> Result<(), FilterListError> {
        let mut next = self.lists.clone();
        next.push(FilterListEntry::new(name, url));
        write_configuration(&self.settings, &next)?;
        self.lists = next;
        Ok(())
    }

    /// Remove the subscription at `index` and persist.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn remove_filter_list(&mut self, index: usize) -> Result<FilterListEntry, FilterListError> {
        let mut next = self.lists.clone();
        let removed = next.remove(index);
        write_configuration(&self.settings, &next)?;
        self.lists = next;
        Ok(removed)
    }

    /// Start one background fetch per subscription.
    ///
    /// Must be called from within a tokio runtime. Completion is signalled
    /// through [`subscribe`](Self::subscribe).
    pub fn refresh_lists(&self) {
        if self.lists.is_empty() {
            if self.running.load(Ordering::Acquire) == 0 {
                let _ = self.events.send(FilterListEvent::RefreshFinished);
            }
            return;
        }

        // Count every fetch before spawning any, so an early completion
        // cannot see zero while siblings are still unissued.
        self.running.fetch_add(self.lists.len(), Ordering::AcqRel);
        info!("Refreshing {} filter lists", self.lists.len());

        for entry in &self.lists {
            let entry = entry.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let running = Arc::clone(&self.running);
            let events = self.events.clone();
            let filter_dir = self.filter_dir.clone();

            tokio::spawn(async move {
                let result = fetcher.fetch(&entry.url).await;
                handle_list_fetched(&filter_dir, &entry, result).await;

                if running.fetch_sub(1, Ordering::AcqRel) == 1 {
                    info!("Filter list refresh finished");
                    let _ = events.send(FilterListEvent::RefreshFinished);
                }
            });
        }
    }
}

async fn handle_list_fetched(
    filter_dir: &Path,
    entry: &FilterListEntry,
    result: Result<Vec<u8>, HttpError>,
) {
    let payload = match result {
        Ok(payload) if payload.is_empty() => {
            warn!("Filter list '{}' came back empty, keeping previous copy", entry.name);
            return;
        }
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to fetch filter list '{}' from {}: {}", entry.name, entry.url, e);
            return;
        }
    };

    let Some(file_name) = entry.file_name() else {
        warn!("No file name in {}, filter list not updated", entry.url);
        return;
    };

    let path = filter_dir.join(file_name);
    let mut file = match tokio::fs::File::create(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Failed to open {} for writing: {}. Filter list not updated", path.display(), e);
            return;
        }
    };

    if let Err(e) = file.write_all(&payload).await {
        warn!("Failed writing {}: {}", path.display(), e);
        return;
    }
    if let Err(e) = file.flush().await {
        warn!("Failed flushing {}: {}", path.display(), e);
        return;
    }

    debug!("Stored filter list '{}' ({} bytes)", entry.name, payload.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tokio::sync::broadcast::error::TryRecvError;

    /// Serves canned payloads; unknown URLs fail like an offline network
    struct FakeFetcher {
        payloads: HashMap<String, Vec<u8>>,
        calls: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
    }

    impl FakeFetcher {
        fn new(payloads: &[(&str, &str)]) -> Self {
            Self {
                payloads: payloads
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.as_bytes().to_vec()))
                    .collect(),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn gated(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    impl ListFetcher for FakeFetcher {
        async fn fetch(&self, url: &Url) -> Result<Vec<u8>, HttpError> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.payloads
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| HttpError::ConnectionFailed("offline".to_string()))
        }
    }

    fn entry(name: &str, url: &str) -> FilterListEntry {
        FilterListEntry::new(name, Url::parse(url).unwrap())
    }

    fn store_with(dir: &Path, entries: &[FilterListEntry]) -> Arc<SettingsStore> {
        let store = Arc::new(SettingsStore::open_in(dir).unwrap());
        write_configuration(&store, entries).unwrap();
        store
    }

    async fn next_event(rx: &mut broadcast::Receiver<FilterListEvent>) -> FilterListEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("refresh did not finish")
            .unwrap()
    }

    #[test]
    fn test_configuration_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open_in(dir.path()).unwrap();
        let entries = vec![
            entry("Zeta", "https://lists.example/zeta.txt"),
            entry("Alpha", "https://lists.example/alpha.txt"),
            entry("Alpha", "https://mirror.example/alpha.txt"),
        ];

        write_configuration(&store, &entries).unwrap();

        let fresh = SettingsStore::open_in(dir.path()).unwrap();
        assert_eq!(load_configuration(&fresh).unwrap(), entries);
    }

    #[test]
    fn test_mismatched_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open_in(dir.path()).unwrap();
        store
            .update(|s| {
                s.adblock_filter_names = vec!["One".into(), "Two".into()];
                s.adblock_filter_urls = vec![Url::parse("https://lists.example/one.txt").unwrap()];
            })
            .unwrap();

        let result = load_configuration(&store);
        assert!(matches!(
            result,
            Err(FilterListError::MismatchedConfig { names: 2, urls: 1 })
        ));

        let manager = FilterListManager::with_fetcher(
            Arc::new(store),
            dir.path(),
            FakeFetcher::new(&[]),
        );
        assert!(manager.is_err());
    }

    #[test]
    fn test_mismatch_counts_only_stored_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(crate::settings::SETTINGS_FILE),
            r#"{ "adblock_filter_urls": ["https://l.example/a.txt"] }"#,
        )
        .unwrap();
        let store = SettingsStore::open_in(dir.path()).unwrap();

        assert!(matches!(
            load_configuration(&store),
            Err(FilterListError::MismatchedConfig { names: 0, urls: 1 })
        ));
    }

    #[test]
    fn test_add_and_remove_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            dir.path(),
            &[
                entry("A", "https://lists.example/a.txt"),
                entry("B", "https://lists.example/b.txt"),
            ],
        );
        let mut manager =
            FilterListManager::with_fetcher(store, dir.path(), FakeFetcher::new(&[])).unwrap();

        manager
            .add_filter_list("C", Url::parse("https://lists.example/c.txt").unwrap())
            .unwrap();
        let removed = manager.remove_filter_list(1).unwrap();

        assert_eq!(removed.name, "B");
        let names: Vec<_> = manager.filter_lists().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);

        let fresh = SettingsStore::open_in(dir.path()).unwrap();
        assert_eq!(load_configuration(&fresh).unwrap(), manager.filter_lists());
    }

    #[test]
    #[should_panic]
    fn test_remove_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), &[entry("A", "https://lists.example/a.txt")]);
        let mut manager =
            FilterListManager::with_fetcher(store, dir.path(), FakeFetcher::new(&[])).unwrap();

        let _ = manager.remove_filter_list(1);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            entry("E", "https://easylist.to/easylist/easylist.txt").file_name(),
            Some("easylist.txt")
        );
        assert_eq!(entry("E", "https://easylist.to/").file_name(), None);
    }

    #[test]
    fn test_filter_list_path_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = filter_list_path(dir.path());
        let second = filter_list_path(dir.path());

        assert_eq!(first, second);
        assert!(first.is_dir());
        assert!(first.ends_with(FILTER_LIST_DIR));
    }

    #[tokio::test]
    async fn test_refresh_mixed_results_finishes_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            dir.path(),
            &[
                entry("One", "https://lists.example/one.txt"),
                entry("Two", "https://lists.example/two.txt"),
                entry("Broken", "https://lists.example/broken.txt"),
                entry("Three", "https://lists.example/three.txt"),
            ],
        );
        let fetcher = FakeFetcher::new(&[
            ("https://lists.example/one.txt", "||one.example^"),
            ("https://lists.example/two.txt", "||two.example^"),
            ("https://lists.example/three.txt", "||three.example^"),
        ]);
        let manager = FilterListManager::with_fetcher(store, dir.path(), fetcher).unwrap();

        // a previous download survives a failed refresh
        fs::write(manager.filter_dir().join("broken.txt"), "||old.example^").unwrap();

        let mut events = manager.subscribe();
        manager.refresh_lists();

        assert_eq!(next_event(&mut events).await, FilterListEvent::RefreshFinished);
        assert_eq!(manager.fetcher.calls.load(Ordering::SeqCst), 4);
        assert_eq!(manager.running_requests(), 0);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        let dir = manager.filter_dir();
        assert_eq!(fs::read_to_string(dir.join("one.txt")).unwrap(), "||one.example^");
        assert_eq!(fs::read_to_string(dir.join("three.txt")).unwrap(), "||three.example^");
        assert_eq!(fs::read_to_string(dir.join("broken.txt")).unwrap(), "||old.example^");
    }

    #[tokio::test]
    async fn test_unwritable_destination_skips_only_that_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            dir.path(),
            &[
                entry("Root", "https://lists.example/"),
                entry("Blocked", "https://lists.example/blocked.txt"),
                entry("Good", "https://lists.example/good.txt"),
            ],
        );
        let fetcher = FakeFetcher::new(&[
            ("https://lists.example/", "||root.example^"),
            ("https://lists.example/blocked.txt", "||blocked.example^"),
            ("https://lists.example/good.txt", "||good.example^"),
        ]);
        let manager = FilterListManager::with_fetcher(store, dir.path(), fetcher).unwrap();

        // a directory in the way makes the destination unopenable
        fs::create_dir(manager.filter_dir().join("blocked.txt")).unwrap();

        let mut events = manager.subscribe();
        manager.refresh_lists();
        next_event(&mut events).await;

        let entries = fs::read_dir(manager.filter_dir()).unwrap().count();
        assert_eq!(entries, 2);
        assert!(manager.filter_dir().join("blocked.txt").is_dir());
        assert_eq!(
            fs::read_to_string(manager.filter_dir().join("good.txt")).unwrap(),
            "||good.example^"
        );
    }

    #[tokio::test]
    async fn test_overlapping_refreshes_share_counter() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            dir.path(),
            &[
                entry("One", "https://lists.example/one.txt"),
                entry("Two", "https://lists.example/two.txt"),
            ],
        );
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = FakeFetcher::new(&[
            ("https://lists.example/one.txt", "||one.example^"),
            ("https://lists.example/two.txt", "||two.example^"),
        ])
        .gated(Arc::clone(&gate));
        let manager = FilterListManager::with_fetcher(store, dir.path(), fetcher).unwrap();

        let mut events = manager.subscribe();
        manager.refresh_lists();
        manager.refresh_lists();
        assert_eq!(manager.running_requests(), 4);

        gate.add_permits(4);

        assert_eq!(next_event(&mut events).await, FilterListEvent::RefreshFinished);
        assert_eq!(manager.fetcher.calls.load(Ordering::SeqCst), 4);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_refresh_without_lists_finishes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), &[]);
        let manager =
            FilterListManager::with_fetcher(store, dir.path(), FakeFetcher::new(&[])).unwrap();

        let mut events = manager.subscribe();
        manager.refresh_lists();

        assert_eq!(next_event(&mut events).await, FilterListEvent::RefreshFinished);
    }
}
