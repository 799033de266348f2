//! Stamp Engine CLI
//!
//! Drives the engine against the SQLite store in the configured storage
//! directory. Results are printed as JSON on stdout; logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Create the database and a default config.toml
//! stampd init
//!
//! # Import venues and challenges
//! stampd seed catalog.json
//!
//! # Check in by GPS
//! stampd visit --user u1 --venue khareba --method gps --lat 41.6942 --lon 44.7975
//!
//! # Check in by scanning a QR code
//! stampd visit --user u1 --qr QR-KHAREBA --method qr
//!
//! # Inspect and repair progress
//! stampd progress --user u1
//! stampd reconcile --user u1
//!
//! # Redeem a reward
//! stampd redeem --user u1 --reward <reward-id>
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use stamp_engine::engine::spawn_logging_listener;
use stamp_engine::{
    Catalog, Config, Coordinates, Engine, EngineDb, EngineError, Stores, VenueRef,
    VerificationMethod, VisitProof, VisitRequest,
};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stampd")]
#[command(about = "Proof-of-visit stamps and challenge rewards")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "STAMPD_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "STAMPD_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Override the GPS radius in meters
    #[arg(long)]
    gps_threshold: Option<f64>,

    /// Override the per-venue cooldown in hours
    #[arg(long)]
    cooldown_hours: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and write a default config
    Init,

    /// Import a JSON catalog of venues and challenges
    Seed {
        file: PathBuf,
    },

    /// Record a check-in
    Visit {
        #[arg(long)]
        user: String,

        /// Venue id
        #[arg(long, conflicts_with = "qr", required_unless_present = "qr")]
        venue: Option<String>,

        /// Scanned QR code, used to find the venue
        #[arg(long)]
        qr: Option<String>,

        /// gps, qr or manual
        #[arg(long)]
        method: VerificationMethod,

        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,

        /// QR code shown at the venue, when checking in by venue id
        #[arg(long)]
        code: Option<String>,
    },

    /// Show progress against every active challenge
    Progress {
        #[arg(long)]
        user: String,
    },

    /// Issue rewards a previous visit failed to issue
    Reconcile {
        #[arg(long)]
        user: String,
    },

    /// Mark a reward as redeemed
    Redeem {
        #[arg(long)]
        user: String,

        #[arg(long)]
        reward: String,
    },

    /// Print database statistics
    Stats,
}

#[derive(Serialize)]
struct Rejection<'a> {
    error: &'a str,
    message: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("stamp_engine=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    debug!(
        storage_dir = %config.storage_dir.display(),
        database = %config.database_path().display(),
        "Configuration loaded"
    );

    let db = Arc::new(
        EngineDb::open(&config.database_path())
            .with_context(|| format!("opening {}", config.database_path().display()))?,
    );

    match args.command {
        Command::Init => {
            let config_path = config.config_path();
            if !config_path.exists() {
                config.save(&config_path)?;
                info!(path = %config_path.display(), "Created default config");
            }
            print_json(&db.stats()?)?;
        }
        Command::Seed { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let catalog: Catalog = serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", file.display()))?;
            let summary = db.import_catalog(&catalog)?;
            info!(venues = summary.venues, challenges = summary.challenges, "Catalog imported");
            print_json(&summary)?;
        }
        Command::Visit {
            user,
            venue,
            qr,
            method,
            lat,
            lon,
            code,
        } => {
            let venue = match (venue, qr) {
                (Some(id), _) => VenueRef::Id(id),
                (None, Some(code)) => VenueRef::QrCode(code),
                (None, None) => bail!("either --venue or --qr is required"),
            };
            let request = VisitRequest {
                user_id: user,
                venue,
                method,
                proof: VisitProof {
                    qr_code: code,
                    coordinates: lat.zip(lon).map(|(lat, lon)| Coordinates::new(lat, lon)),
                },
            };

            let (engine, listener) = build_engine(db, &config);
            let outcome = engine.record_visit(request).await;
            shutdown(engine, listener).await?;
            match outcome {
                Ok(result) => print_json(&result)?,
                Err(e) if e.is_rejection() => reject(&e)?,
                Err(e) => return Err(e.into()),
            }
        }
        Command::Progress { user } => {
            let (engine, listener) = build_engine(db, &config);
            let report = engine.progress(&user).await;
            shutdown(engine, listener).await?;
            print_json(&report?)?;
        }
        Command::Reconcile { user } => {
            let (engine, listener) = build_engine(db, &config);
            let report = engine.reconcile(&user).await;
            shutdown(engine, listener).await?;
            print_json(&report?)?;
        }
        Command::Redeem { user, reward } => {
            let (engine, listener) = build_engine(db, &config);
            let outcome = engine.redeem(&user, &reward).await;
            shutdown(engine, listener).await?;
            match outcome {
                Ok(record) => print_json(&record)?,
                Err(e) if e.is_rejection() => reject(&e)?,
                Err(e) => return Err(e.into()),
            }
        }
        Command::Stats => {
            print_json(&db.stats()?)?;
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        let storage_dir = args
            .storage_dir
            .clone()
            .unwrap_or_else(stamp_engine::config::default_storage_dir);
        let default_path = storage_dir.join("config.toml");
        if default_path.exists() {
            Config::load(&default_path)?
        } else {
            Config::default()
        }
    };

    // Apply CLI overrides
    if let Some(dir) = &args.storage_dir {
        config.storage_dir = dir.clone();
    }
    if let Some(meters) = args.gps_threshold {
        config.engine.gps_threshold_meters = meters;
    }
    if let Some(hours) = args.cooldown_hours {
        config.engine.cooldown_hours = hours;
    }
    config.engine.validate()?;

    Ok(config)
}

fn build_engine(db: Arc<EngineDb>, config: &Config) -> (Engine, JoinHandle<()>) {
    let engine = Engine::with_system_clock(Stores::from_backend(db), config.engine.clone());
    let listener = spawn_logging_listener(engine.events.clone());
    (engine, listener)
}

/// Drop the engine and wait for the listener to log what it emitted
///
/// The engine holds the last handles to the event bus, so dropping it closes
/// the bus and the listener exits once the queue is empty.
async fn shutdown(engine: Engine, listener: JoinHandle<()>) -> anyhow::Result<()> {
    drop(engine);
    listener.await.context("event listener task failed")?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a terminal rejection and exit non-zero
fn reject(err: &EngineError) -> anyhow::Result<()> {
    print_json(&Rejection {
        error: err.code(),
        message: err.to_string(),
    })?;
    std::process::exit(2);
}
