//! Skiff Adblock
//!
//! Filter list lifecycle and request interception for the Skiff browser.
//!
//! Architecture:
//! 1. `FilterListManager` downloads subscribed lists into `filterlists/`
//! 2. `RequestInterceptor` compiles that directory into an engine, off-thread
//! 3. Every outgoing request is classified synchronously: Allow, Block or
//!    Redirect, failing open while no engine is ready

mod client;
mod engine;
mod fetch;
mod filter_list;
mod interceptor;
mod settings;

pub use client::{HttpClient, HttpClientConfig, HttpError, Response};
pub use engine::{
    AdblockEngine, Classification, EngineBuilder, EngineError, MatchingEngine,
    adblock_engine_builder,
};
pub use fetch::{HttpListFetcher, ListFetcher};
pub use filter_list::{
    FILTER_LIST_DIR, FilterListEntry, FilterListError, FilterListEvent, FilterListManager,
    filter_list_path, load_configuration, write_configuration,
};
pub use interceptor::{
    EngineState, InterceptDecision, InterceptorEvent, NoopInterceptor, RequestInfo,
    RequestInterceptor, ResourceType, UrlRequestInterceptor,
};
pub use settings::{
    SETTINGS_FILE, Settings, SettingsError, SettingsStore, default_config_dir, default_data_dir,
};
