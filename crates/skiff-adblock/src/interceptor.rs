//! Request Interceptor
//!
//! Called synchronously by the browsing engine for every outgoing request,
//! before it is sent. Never waits for the filter engine: until a compiled
//! engine is available every request is allowed through (fail-open).
//!
//! Flow:
//! 1. Request comes in with URL, first-party URL and resource type
//! 2. Adblock disabled or engine not ready → Allow
//! 3. Engine verdict with a redirect → Redirect (wins over Block)
//! 4. Engine verdict matched → Block, otherwise Allow
//!
//! Engine lifecycle: `Building → Ready | Failed`, and back to `Building` on
//! [`RequestInterceptor::reset_engine`]. Builds run on their own thread and
//! publish the result through an [`ArcSwapOption`], so readers see either the
//! old engine, the new one, or none, never a half-built one.

use crate::engine::{
    Classification, EngineBuilder, EngineError, MatchingEngine, adblock_engine_builder,
};
use crate::filter_list::filter_list_path;
use crate::settings::{SettingsError, SettingsStore};
use arc_swap::ArcSwapOption;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Decision for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptDecision {
    /// Request proceeds unchanged
    Allow,
    /// Request is cancelled
    Block,
    /// Request is answered with a different resource
    Redirect(String),
}

impl InterceptDecision {
    /// Combine an engine verdict into a decision. A non-empty redirect
    /// takes precedence over a block.
    pub fn from_classification(verdict: Classification) -> Self {
        match verdict.redirect {
            Some(target) if !target.is_empty() => Self::Redirect(target),
            _ if verdict.matched => Self::Block,
            _ => Self::Allow,
        }
    }
}

/// Type of resource being requested, as reported by the browsing engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    FontResource,
    SubResource,
    Object,
    Media,
    Worker,
    SharedWorker,
    Prefetch,
    Favicon,
    Xhr,
    Ping,
    ServiceWorker,
    CspReport,
    PluginResource,
    NavigationPreloadMainFrame,
    NavigationPreloadSubFrame,
    WebSocket,
    Unknown,
}

impl ResourceType {
    pub const ALL: [ResourceType; 22] = [
        Self::MainFrame,
        Self::SubFrame,
        Self::Stylesheet,
        Self::Script,
        Self::Image,
        Self::FontResource,
        Self::SubResource,
        Self::Object,
        Self::Media,
        Self::Worker,
        Self::SharedWorker,
        Self::Prefetch,
        Self::Favicon,
        Self::Xhr,
        Self::Ping,
        Self::ServiceWorker,
        Self::CspReport,
        Self::PluginResource,
        Self::NavigationPreloadMainFrame,
        Self::NavigationPreloadSubFrame,
        Self::WebSocket,
        Self::Unknown,
    ];

    /// Map the embedding engine's numeric resource code.
    /// Codes added by future engine versions become `Unknown`.
    pub fn from_raw(code: u32) -> Self {
        match code {
            0 => Self::MainFrame,
            1 => Self::SubFrame,
            2 => Self::Stylesheet,
            3 => Self::Script,
            4 => Self::Image,
            5 => Self::FontResource,
            6 => Self::SubResource,
            7 => Self::Object,
            8 => Self::Media,
            9 => Self::Worker,
            10 => Self::SharedWorker,
            11 => Self::Prefetch,
            12 => Self::Favicon,
            13 => Self::Xhr,
            14 => Self::Ping,
            15 => Self::ServiceWorker,
            16 => Self::CspReport,
            17 => Self::PluginResource,
            19 => Self::NavigationPreloadMainFrame,
            20 => Self::NavigationPreloadSubFrame,
            21 => Self::WebSocket,
            _ => Self::Unknown,
        }
    }

    /// Request type label understood by filter rules (`$script`,
    /// `$image`, ...). Must stay in sync with adblock-rust's vocabulary.
    pub fn label(self) -> &'static str {
        match self {
            Self::MainFrame => "main_frame",
            Self::SubFrame => "sub_frame",
            Self::Stylesheet => "stylesheet",
            Self::Script => "script",
            Self::FontResource => "font",
            Self::Image => "image",
            Self::SubResource => "object_subrequest",
            Self::Object => "object",
            Self::Media => "media",
            Self::Favicon => "image",
            Self::Xhr => "xhr",
            Self::Ping => "ping",
            Self::CspReport => "csp_report",
            Self::Worker
            | Self::SharedWorker
            | Self::Prefetch
            | Self::ServiceWorker
            | Self::PluginResource
            | Self::NavigationPreloadMainFrame
            | Self::NavigationPreloadSubFrame
            | Self::WebSocket
            | Self::Unknown => "other",
        }
    }

    /// Guess from Accept header or file extension
    pub fn from_accept_or_path(accept: Option<&str>, path: &str) -> Self {
        // Check file extension first
        if path.ends_with(".js") { return Self::Script; }
        if path.ends_with(".css") { return Self::Stylesheet; }
        if path.ends_with(".woff") || path.ends_with(".woff2") || path.ends_with(".ttf") {
            return Self::FontResource;
        }
        if path.ends_with(".ico") { return Self::Favicon; }
        if path.ends_with(".png") || path.ends_with(".jpg") ||
           path.ends_with(".jpeg") || path.ends_with(".gif") ||
           path.ends_with(".webp") || path.ends_with(".svg") {
            return Self::Image;
        }
        if path.ends_with(".mp4") || path.ends_with(".webm") ||
           path.ends_with(".mp3") || path.ends_with(".ogg") {
            return Self::Media;
        }

        // Check Accept header
        if let Some(accept) = accept {
            if accept.contains("text/html") { return Self::MainFrame; }
            if accept.contains("text/css") { return Self::Stylesheet; }
            if accept.contains("javascript") { return Self::Script; }
            if accept.contains("image/") { return Self::Image; }
            if accept.contains("font/") { return Self::FontResource; }
        }

        Self::Unknown
    }
}

impl FromStr for ResourceType {
    type Err = String;

    /// Parse a rule label back into a representative resource type
    fn from_str(label: &str) -> Result<Self, Self::Err> {
        Ok(match label {
            "main_frame" | "document" => Self::MainFrame,
            "sub_frame" | "subdocument" => Self::SubFrame,
            "stylesheet" => Self::Stylesheet,
            "script" => Self::Script,
            "font" => Self::FontResource,
            "image" => Self::Image,
            "object_subrequest" => Self::SubResource,
            "object" => Self::Object,
            "media" => Self::Media,
            "xhr" => Self::Xhr,
            "ping" => Self::Ping,
            "csp_report" => Self::CspReport,
            "other" => Self::Unknown,
            other => return Err(format!("unknown resource type `{other}`")),
        })
    }
}

/// The parts of an outgoing request the interceptor looks at
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub request_url: Url,
    pub first_party_url: Url,
    pub resource_type: ResourceType,
}

impl RequestInfo {
    pub fn new(request_url: Url, first_party_url: Url, resource_type: ResourceType) -> Self {
        Self {
            request_url,
            first_party_url,
            resource_type,
        }
    }
}

/// Hook the browsing profile calls for every request
pub trait UrlRequestInterceptor: Send + Sync {
    fn intercept_request(&self, info: &RequestInfo) -> InterceptDecision;
}

/// Interceptor for builds without content blocking
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInterceptor;

impl UrlRequestInterceptor for NoopInterceptor {
    fn intercept_request(&self, _info: &RequestInfo) -> InterceptDecision {
        InterceptDecision::Allow
    }
}

/// Notifications from the interceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorEvent {
    /// A build completed and its engine is now in use
    EngineReady,
}

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Building = 0,
    Ready = 1,
    Failed = 2,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Ready,
            2 => Self::Failed,
            _ => Self::Building,
        }
    }
}

/// Interception statistics
#[derive(Debug, Default)]
pub struct InterceptorStats {
    pub total_requests: AtomicU64,
    pub blocked_requests: AtomicU64,
    pub redirected_requests: AtomicU64,
    pub total_check_time_ns: AtomicU64,
}

/// Published engine plus the bookkeeping build threads need
struct EngineSlot {
    engine: ArcSwapOption<Box<dyn MatchingEngine>>,
    /// Bumped on every (re)build; only the newest build may publish
    generation: Mutex<u64>,
    state: AtomicU8,
    events: broadcast::Sender<InterceptorEvent>,
}

impl EngineSlot {
    fn finish(&self, generation: u64, result: Result<Box<dyn MatchingEngine>, EngineError>) {
        let current = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != generation {
            debug!("Discarding engine build {} (current is {})", generation, *current);
            return;
        }

        match result {
            Ok(engine) => {
                self.engine.store(Some(Arc::new(engine)));
                self.state.store(EngineState::Ready as u8, Ordering::Release);
                info!("Adblock ready");
                let _ = self.events.send(InterceptorEvent::EngineReady);
            }
            Err(e) => {
                self.state.store(EngineState::Failed as u8, Ordering::Release);
                warn!("Adblock engine build failed, allowing all requests: {}", e);
            }
        }
    }
}

/// Adblock interceptor backed by a background-built [`MatchingEngine`]
pub struct RequestInterceptor {
    filter_dir: PathBuf,
    settings: Arc<SettingsStore>,
    enabled: AtomicBool,
    slot: Arc<EngineSlot>,
    builder: EngineBuilder,
    /// Whether the "not ready" notice was logged for the current build
    not_ready_logged: AtomicBool,
    stats: InterceptorStats,
}

impl RequestInterceptor {
    /// Interceptor using adblock-rust, building from `<data_dir>/filterlists`
    pub fn new(settings: Arc<SettingsStore>, data_dir: &Path) -> Self {
        Self::with_builder(settings, data_dir, adblock_engine_builder())
    }

    /// Interceptor using a custom engine builder. The first build starts
    /// immediately in the background.
    pub fn with_builder(
        settings: Arc<SettingsStore>,
        data_dir: &Path,
        builder: EngineBuilder,
    ) -> Self {
        let enabled = settings.get().adblock_enabled;
        let (events, _) = broadcast::channel(16);

        let interceptor = Self {
            filter_dir: filter_list_path(data_dir),
            settings,
            enabled: AtomicBool::new(enabled),
            slot: Arc::new(EngineSlot {
                engine: ArcSwapOption::empty(),
                generation: Mutex::new(0),
                state: AtomicU8::new(EngineState::Building as u8),
                events,
            }),
            builder,
            not_ready_logged: AtomicBool::new(false),
            stats: InterceptorStats::default(),
        };

        interceptor.start_build();
        interceptor
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Switch filtering on or off and persist the choice.
    ///
    /// Takes effect immediately even if persisting fails.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), SettingsError> {
        self.enabled.store(enabled, Ordering::Release);
        info!("Adblock {}", if enabled { "enabled" } else { "disabled" });
        self.settings.update(|s| s.adblock_enabled = enabled)
    }

    /// True when no filter list has ever been downloaded
    pub fn needs_initial_download(&self) -> bool {
        fs::read_dir(&self.filter_dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    pub fn filter_dir(&self) -> &Path {
        &self.filter_dir
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.slot.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.slot.engine.load().is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InterceptorEvent> {
        self.slot.events.subscribe()
    }

    /// Drop the current engine and rebuild from the filter list directory.
    /// Requests are allowed through until the new engine is ready.
    pub fn reset_engine(&self) {
        info!("Resetting adblock engine");
        self.start_build();
    }

    fn start_build(&self) {
        let generation = {
            let mut current = self.slot.generation.lock().unwrap_or_else(PoisonError::into_inner);
            *current += 1;
            self.slot.engine.store(None);
            self.slot.state.store(EngineState::Building as u8, Ordering::Release);
            *current
        };
        self.not_ready_logged.store(false, Ordering::Relaxed);

        let slot = Arc::clone(&self.slot);
        let builder = Arc::clone(&self.builder);
        let dir = self.filter_dir.clone();

        // Compiling large lists takes a while; keep it off every caller's path
        let spawned = thread::Builder::new()
            .name("adblock-engine".to_string())
            .spawn(move || {
                let start = Instant::now();
                let result = builder(&dir);
                debug!("Engine build {} took {:?}", generation, start.elapsed());
                slot.finish(generation, result);
            });

        if let Err(e) = spawned {
            warn!("Failed to spawn engine build thread: {}", e);
            self.slot.state.store(EngineState::Failed as u8, Ordering::Release);
        }
    }

    /// Get statistics: (total, blocked, redirected)
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.total_requests.load(Ordering::Relaxed),
            self.stats.blocked_requests.load(Ordering::Relaxed),
            self.stats.redirected_requests.load(Ordering::Relaxed),
        )
    }

    /// Get average check time in nanoseconds
    pub fn avg_check_time_ns(&self) -> u64 {
        let total = self.stats.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        self.stats.total_check_time_ns.load(Ordering::Relaxed) / total
    }
}

impl UrlRequestInterceptor for RequestInterceptor {
    fn intercept_request(&self, info: &RequestInfo) -> InterceptDecision {
        if !self.is_enabled() {
            return InterceptDecision::Allow;
        }

        let Some(engine) = self.slot.engine.load_full() else {
            if !self.not_ready_logged.swap(true, Ordering::Relaxed) {
                debug!("Adblock not yet initialized, blindly allowing requests");
            }
            return InterceptDecision::Allow;
        };

        let start = Instant::now();
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);

        let verdict = engine.classify(
            info.request_url.as_str(),
            info.first_party_url.as_str(),
            info.resource_type.label(),
        );
        let decision = InterceptDecision::from_classification(verdict);

        match &decision {
            InterceptDecision::Block => {
                self.stats.blocked_requests.fetch_add(1, Ordering::Relaxed);
                debug!("Blocked {} ({})", info.request_url, info.resource_type.label());
            }
            InterceptDecision::Redirect(target) => {
                self.stats.redirected_requests.fetch_add(1, Ordering::Relaxed);
                debug!("Redirected {} -> {}", info.request_url, target);
            }
            InterceptDecision::Allow => {
                trace!("Allowed {}", info.request_url);
            }
        }

        let elapsed = start.elapsed().as_nanos() as u64;
        self.stats.total_check_time_ns.fetch_add(elapsed, Ordering::Relaxed);

        decision
    }
}
