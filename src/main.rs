use chrono::Duration;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter};

use rover_feed::ingest::import_folder;
use rover_feed::{
    ExplorerConfig, FavoritesFeed, FavoritesNav, FeedController, FetchOutcome, KeyValueStore,
    Library, Listing, PageSource, Photo, QueryCursorClient, TimelineFeed, TimelineNav,
    TopVotedFeed, TopVotedNav, UserContext, UserVote, VoteCoordinator, VoteError, INSTRUMENTS,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser, Debug)]
#[command(name = "rover-feed")]
#[command(about = "Browse rover photos by recency or votes, and vote on them")]
struct Cli {
    /// Path to configuration file (JSON)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Catalog database, overriding the configured location
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import photo manifests (*.json) from a folder into the catalog
    Import { folder: PathBuf },
    /// Newest photos of one instrument
    Timeline {
        /// Instrument ID (see `instruments`)
        #[arg(long)]
        instrument: Option<String>,
        /// Only photos captured at or before this time (ms since epoch)
        #[arg(long)]
        time: Option<String>,
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Most-voted photos of one instrument
    TopVoted {
        #[arg(long)]
        instrument: Option<String>,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Photos a user has voted on, latest vote first
    Favorites {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Vote on a photo
    Vote {
        #[arg(long)]
        user: String,
        image_id: String,
    },
    /// List the instruments that can be browsed
    Instruments,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Installed before the config loads; the configured level replaces the
    // default afterwards unless RUST_LOG is set.
    let from_env = EnvFilter::try_from_default_env().ok();
    let has_env_filter = from_env.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(from_env.unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_LEVEL)));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match ExplorerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(db) = cli.db {
        config.database_path = Some(db);
    }

    if !has_env_filter {
        if let Err(e) = filter_handle.reload(EnvFilter::new(&config.log_level)) {
            warn!("Could not apply log level {:?}: {}", config.log_level, e);
        }
    }

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: &ExplorerConfig) -> CliResult {
    if let Commands::Instruments = command {
        for instrument in INSTRUMENTS {
            println!("{:<14} {}", instrument.id, instrument.name);
        }
        return Ok(());
    }

    let library = Arc::new(open_library(config)?);
    let store: Arc<dyn KeyValueStore> = library.clone();
    let client = QueryCursorClient::new(Arc::clone(&store), config);

    match command {
        Commands::Import { folder } => {
            println!("🔍 Scanning folder: {}", folder.display());
            let result = import_folder(store.as_ref(), config, &folder).await?;
            println!(
                "Imported {} photos, skipped {} already in the catalog, rejected {}",
                result.imported_count, result.skipped_count, result.rejected_count
            );
            for file in &result.failed_files {
                println!("  could not read {}", file.display());
            }
            println!("{} photos in catalog", library.photo_count()?);
        }
        Commands::Timeline {
            instrument,
            time,
            pages,
        } => {
            let nav = TimelineNav::from_route(config, instrument.as_deref(), time.as_deref());
            println!("Timeline of {}", nav.mission_instrument);
            let feed = TimelineFeed::new(client, nav)?.with_fetch_timeout(config.fetch_timeout());
            show(&feed, pages, describe_photo).await?;
        }
        Commands::TopVoted { instrument, pages } => {
            let nav = TopVotedNav::from_route(config, instrument.as_deref());
            println!("Top voted on {}", nav.mission_instrument);
            let feed = TopVotedFeed::new(client, nav)?.with_fetch_timeout(config.fetch_timeout());
            show(&feed, pages, describe_photo).await?;
        }
        Commands::Favorites { user, pages } => {
            let user = UserContext::new(user)?;
            println!("Favorites of {}", user.user_id());
            let feed = FavoritesFeed::new(client, FavoritesNav { user })?
                .with_fetch_timeout(config.fetch_timeout());
            show(&feed, pages, describe_vote).await?;
        }
        Commands::Vote { user, image_id } => {
            let user = UserContext::new(user)?;
            let photo = library
                .photo(&image_id)?
                .ok_or_else(|| format!("No photo with ID {} in the catalog", image_id))?;

            let coordinator = VoteCoordinator::new(store, config);
            match coordinator.vote_on(&user, &photo).await {
                Ok(receipt) => {
                    println!("Voted! {} now has {} votes", receipt.image_id, receipt.votes)
                }
                Err(VoteError::AlreadyVoted { .. }) => {
                    println!("You have already voted on {}", image_id)
                }
                Err(e @ VoteError::PartialWrite { .. }) => {
                    println!("Your vote on {} was recorded, but the count may lag: {}", image_id, e)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Instruments => {}
    }

    Ok(())
}

fn open_library(config: &ExplorerConfig) -> Result<Library, Box<dyn std::error::Error>> {
    let path = config
        .database_path()
        .ok_or("Could not determine a location for the catalog database")?;
    debug!("Opening catalog at {}", path.display());
    Ok(Library::open(&path, config)?)
}

/// Load up to `pages` pages, then print everything the feed holds
async fn show<L, F>(feed: &FeedController<L>, pages: usize, describe: F) -> CliResult
where
    L: Listing,
    F: Fn(&<L::Source as PageSource>::Item) -> String,
{
    for _ in 0..pages {
        match feed.load_more().await? {
            FetchOutcome::Fetched { exhausted: false, .. } => {}
            _ => break,
        }
    }

    let items = feed.feed();
    if items.is_empty() {
        println!("  (no photos)");
    }
    for item in items.items() {
        println!("  {}", describe(&item));
    }
    if !items.is_exhausted() {
        println!("  ... more available, use --pages to load further");
    }
    Ok(())
}

fn describe_photo(photo: &Photo) -> String {
    let captured = photo
        .captured_at_utc()
        .map(|t| t.format("%B %-d %Y, %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| photo.captured_at.to_string());

    let mut line = format!("{:<24} {}  {} votes", photo.image_id, captured, photo.votes);
    if let Some(delay) = photo.transmission_delay() {
        line.push_str(&format!("  (reached Earth after {})", describe_delay(delay)));
    }
    line
}

fn describe_vote(vote: &UserVote) -> String {
    format!("{:<24} {} votes at time of vote", vote.image_id, vote.votes)
}

fn describe_delay(delay: Duration) -> String {
    if delay.num_days() > 0 {
        format!("{} days", delay.num_days())
    } else if delay.num_hours() > 0 {
        format!("{} hours", delay.num_hours())
    } else if delay.num_minutes() > 0 {
        format!("{} minutes", delay.num_minutes())
    } else {
        format!("{} seconds", delay.num_seconds())
    }
}
