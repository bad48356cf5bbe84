//! Command handlers

use crate::app::App;
use crate::cli::Command;
use anyhow::{Result, bail};
use skiff_adblock::{EngineState, RequestInfo, RequestInterceptor, ResourceType};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use url::Url;

/// Engine rebuild budget after a refresh
const ENGINE_WAIT: Duration = Duration::from_secs(120);

pub async fn run(command: Command, app: &mut App) -> Result<()> {
    match command {
        Command::Status => status(app),
        Command::Lists => {
            for (index, entry) in app.filter_lists.filter_lists().iter().enumerate() {
                println!("{index:>3}  {:<24} {}", entry.name, entry.url);
            }
            Ok(())
        }
        Command::Add { name, url } => {
            app.filter_lists.add_filter_list(name, url)?;
            println!("{} filter lists configured", app.filter_lists.filter_lists().len());
            Ok(())
        }
        Command::Remove { index } => {
            let count = app.filter_lists.filter_lists().len();
            if index >= count {
                bail!("No filter list at index {index} ({count} configured)");
            }
            let removed = app.filter_lists.remove_filter_list(index)?;
            println!("Removed {} ({})", removed.name, removed.url);
            Ok(())
        }
        Command::Refresh => refresh(app).await,
        Command::Enable => set_enabled(app, true),
        Command::Disable => set_enabled(app, false),
        Command::Check {
            url,
            source,
            resource_type,
            wait,
        } => check(app, url, source, resource_type, Duration::from_secs(wait)).await,
    }
}

fn status(app: &App) -> Result<()> {
    let settings = app.settings.get();
    println!("Profile:        {}", app.profile.name());
    println!("Homepage:       {}", settings.homepage);
    println!("Filter lists:   {}", app.filter_lists.filter_lists().len());

    match &app.interceptor {
        Some(interceptor) => {
            let enabled = if interceptor.is_enabled() { "enabled" } else { "disabled" };
            let on_disk = if interceptor.needs_initial_download() {
                "none, run `skiff refresh`"
            } else {
                "yes"
            };
            println!("Adblock:        {}", enabled);
            println!("Lists on disk:  {}", on_disk);
            println!("Engine:         {:?}", interceptor.state());
        }
        None => println!("Adblock:        not available"),
    }
    Ok(())
}

fn set_enabled(app: &App, enabled: bool) -> Result<()> {
    let Some(interceptor) = &app.interceptor else {
        bail!("Content blocking is not available in this session");
    };
    interceptor.set_enabled(enabled)?;
    println!("Adblock {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

async fn refresh(app: &App) -> Result<()> {
    let mut events = app.filter_lists.subscribe();
    app.filter_lists.refresh_lists();

    loop {
        match events.recv().await {
            Ok(_) => break,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => bail!("Filter list manager went away during refresh"),
        }
    }
    println!("Filter lists refreshed in {}", app.filter_lists.filter_dir().display());

    if let Some(interceptor) = &app.interceptor {
        interceptor.reset_engine();
        match wait_for_engine(interceptor, ENGINE_WAIT).await {
            EngineState::Ready => println!("Adblock engine rebuilt"),
            EngineState::Failed => {
                warn!("Adblock engine could not be built; requests are not filtered")
            }
            EngineState::Building => {
                warn!("Adblock engine still compiling after {:?}", ENGINE_WAIT)
            }
        }
    }
    Ok(())
}

async fn check(
    app: &App,
    url: Url,
    source: Option<Url>,
    resource_type: Option<ResourceType>,
    wait: Duration,
) -> Result<()> {
    if let Some(interceptor) = &app.interceptor {
        if interceptor.needs_initial_download() {
            warn!("No filter lists downloaded yet, run `skiff refresh` first");
        }
        let state = wait_for_engine(interceptor, wait).await;
        info!("Engine state: {:?}", state);
    }

    let resource_type =
        resource_type.unwrap_or_else(|| ResourceType::from_accept_or_path(None, url.path()));
    let first_party = source.unwrap_or_else(|| url.clone());
    let info = RequestInfo::new(url, first_party, resource_type);

    let decision = app.profile.handle_request(&info);
    println!("{} [{}] -> {:?}", info.request_url, resource_type.label(), decision);

    if let Some(interceptor) = &app.interceptor {
        let (total, blocked, redirected) = interceptor.stats();
        info!(
            "Checked {} requests ({} blocked, {} redirected, avg {} ns)",
            total,
            blocked,
            redirected,
            interceptor.avg_check_time_ns()
        );
    }
    Ok(())
}

/// Poll until the engine leaves `Building` or `timeout` passes
async fn wait_for_engine(interceptor: &RequestInterceptor, timeout: Duration) -> EngineState {
    let deadline = Instant::now() + timeout;
    loop {
        let state = interceptor.state();
        if state != EngineState::Building || Instant::now() >= deadline {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_adblock::load_configuration;

    fn app(dir: &std::path::Path, adblock: bool) -> App {
        App::new(&dir.join("data"), &dir.join("config"), adblock).unwrap()
    }

    #[tokio::test]
    async fn test_add_and_remove_lists() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path(), false);
        let before = app.filter_lists.filter_lists().len();

        run(
            Command::Add {
                name: "Local".to_string(),
                url: Url::parse("https://lists.example/local.txt").unwrap(),
            },
            &mut app,
        )
        .await
        .unwrap();
        run(Command::Remove { index: 0 }, &mut app).await.unwrap();

        let entries = load_configuration(&app.settings).unwrap();
        assert_eq!(entries.len(), before);
        assert_eq!(entries.last().unwrap().name, "Local");

        assert!(run(Command::Remove { index: 99 }, &mut app).await.is_err());
    }

    #[tokio::test]
    async fn test_toggle_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path(), true);

        run(Command::Disable, &mut app).await.unwrap();

        assert!(!app.settings.get().adblock_enabled);
        assert!(!app.interceptor.as_ref().unwrap().is_enabled());
    }

    #[tokio::test]
    async fn test_status_without_adblock() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path(), false);

        run(Command::Status, &mut app).await.unwrap();
        assert_eq!(app.profile.name(), "default");
    }

    #[tokio::test]
    async fn test_toggle_without_adblock_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path(), false);

        assert!(run(Command::Enable, &mut app).await.is_err());
    }

    #[tokio::test]
    async fn test_check_with_downloaded_list() {
        let dir = tempfile::tempdir().unwrap();
        let filter_dir = skiff_adblock::filter_list_path(&dir.path().join("data"));
        std::fs::write(filter_dir.join("easylist.txt"), "||ads.example.com^\n").unwrap();
        let mut app = app(dir.path(), true);

        run(
            Command::Check {
                url: Url::parse("https://ads.example.com/a.js").unwrap(),
                source: Some(Url::parse("https://news.example.org/").unwrap()),
                resource_type: None,
                wait: 10,
            },
            &mut app,
        )
        .await
        .unwrap();

        assert_eq!(app.interceptor.as_ref().unwrap().stats(), (1, 1, 0));
    }
}
