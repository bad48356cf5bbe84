//! Command-line arguments

use clap::{ArgAction, Parser, Subcommand};
use skiff_adblock::ResourceType;
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Parser)]
#[command(name = "skiff", version, about = "Skiff browser: filter lists and request blocking")]
pub struct Cli {
    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Where downloaded filter lists live
    #[arg(long, env = "SKIFF_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Where settings.json lives
    #[arg(long, env = "SKIFF_CONFIG_DIR", global = true)]
    pub config_dir: Option<PathBuf>,

    /// Run without content blocking
    #[arg(long, global = true)]
    pub no_adblock: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show adblock state
    Status,

    /// List filter list subscriptions
    Lists,

    /// Subscribe to a filter list
    Add {
        /// Display name
        name: String,
        /// Source URL; the last path segment names the local copy
        url: Url,
    },

    /// Unsubscribe by position (see `lists`)
    Remove { index: usize },

    /// Download all lists and rebuild the engine
    Refresh,

    /// Turn request blocking on
    Enable,

    /// Turn request blocking off
    Disable,

    /// Classify one request
    Check {
        url: Url,

        /// Page that issued the request (defaults to the URL itself)
        #[arg(long)]
        source: Option<Url>,

        /// Rule label such as script, image, xhr (guessed from the URL if absent)
        #[arg(long = "type")]
        resource_type: Option<ResourceType>,

        /// Seconds to wait for the engine to compile
        #[arg(long, default_value_t = 30)]
        wait: u64,
    },
}
