//! # Travel Guide CLI (`guide`)
//!
//! Generates travel itineraries with an LLM and answers follow-up
//! questions grounded on a local knowledge base.
//!
//! ## Usage
//!
//! ```bash
//! guide --config ./config/guide.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `guide index build` | (Re)build the vector index from the corpus |
//! | `guide index status` | Show what is on disk |
//! | `guide ask "<question>"` | One grounded answer |
//! | `guide chat` | Interactive grounded Q&A with session history |
//! | `guide itinerary --city ...` | Itinerary from structured preferences |
//! | `guide plan "<request>"` | Itinerary from a free-text request |
//! | `guide serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! guide index build
//! guide itinerary --city Kyoto --days 3 --month April --language Japanese \
//!     --budget 1200 --interest "Food and drinks" --pace moderate
//! guide plan "5 days in Lisbon in May, around \$900, seafood and fado" --details
//! guide ask "Which museums should I not miss in Paris?" --session paris
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::warn;

use travel_guide::config::{self, Config, DEFAULT_CONFIG_PATH};
use travel_guide::itinerary::{Companions, Transport, TravelPace, TripRequest, INTEREST_OPTIONS};
use travel_guide::{commands, logging, server};

#[derive(Parser)]
#[command(
    name = "guide",
    about = "Travel itineraries with retrieval-grounded follow-up answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the default path does not exist, built-in defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the persisted vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Ask one question against the knowledge base.
    Ask {
        question: String,

        /// Conversation session whose earlier turns are used as context.
        #[arg(long, default_value = "cli")]
        session: String,
    },

    /// Interactive question loop; every answered turn is remembered.
    Chat {
        /// Session id; a random one is generated when omitted.
        #[arg(long)]
        session: Option<String>,
    },

    /// Generate an itinerary from structured preferences.
    Itinerary {
        #[arg(long)]
        city: String,

        #[arg(long, default_value_t = 1)]
        days: u32,

        #[arg(long)]
        month: String,

        /// Language for the useful-phrases section.
        #[arg(long)]
        language: String,

        /// Budget in USD.
        #[arg(long, default_value_t = 0)]
        budget: u32,

        /// Repeatable. Defaults to "Culture and history".
        #[arg(long = "interest")]
        interests: Vec<String>,

        #[arg(long, value_enum, default_value_t = TravelPace::Relaxed)]
        pace: TravelPace,

        #[arg(long = "with", value_enum, default_value_t = Companions::Solo)]
        companions: Companions,

        #[arg(long, value_enum, default_value_t = Transport::Public)]
        transport: Transport,
    },

    /// Generate an itinerary from a free-text trip description.
    Plan {
        request: String,

        /// Also fetch grounded details about the attractions.
        #[arg(long)]
        details: bool,

        #[arg(long, default_value = "free_session")]
        session: String,
    },

    /// Start the HTTP server on `[server] bind`.
    Serve,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Rebuild from the corpus, replacing any existing index.
    Build,

    /// Show the state of the persisted index.
    Status {
        #[arg(long)]
        json: bool,
    },
}

fn load(path: &Path) -> Result<Config> {
    if !path.exists() && path.as_os_str() == DEFAULT_CONFIG_PATH {
        warn!("{} not found; using built-in defaults", path.display());
        return Ok(Config::default());
    }
    config::load_config(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Index { action } => match action {
            IndexAction::Build => commands::run_index_build(&cfg).await?,
            IndexAction::Status { json } => commands::run_index_status(&cfg, json)?,
        },
        Commands::Ask { question, session } => {
            commands::run_ask(&cfg, &question, &session).await?;
        }
        Commands::Chat { session } => {
            commands::run_chat(&cfg, session).await?;
        }
        Commands::Itinerary {
            city,
            days,
            month,
            language,
            budget,
            interests,
            pace,
            companions,
            transport,
        } => {
            let interests = if interests.is_empty() {
                vec![INTEREST_OPTIONS[0].to_string()]
            } else {
                interests
            };
            let request = TripRequest {
                city,
                days,
                month,
                language,
                budget_usd: budget,
                interests,
                pace,
                companions,
                transport,
            };
            commands::run_itinerary(&cfg, &request).await?;
        }
        Commands::Plan {
            request,
            details,
            session,
        } => {
            commands::run_plan(&cfg, &request, details, &session).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
