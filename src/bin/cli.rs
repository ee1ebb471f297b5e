use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ranking_playlist_sync as lib;
use lib::api::spotify::SpotifyClient;
use lib::config::Config;
use lib::ranking::ChartRanking;
use lib::service::ReconcileService;
use lib::store::SqliteStore;
use std::path::{Path, PathBuf};
use tracing::subscriber as tracing_subscriber_global;
use tracing::{error, info, warn};
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "ranking-sync", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum MuteKind {
    Track,
    Artist,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize a user interactively and store the credential
    Login,
    /// Show the (cached) profile of a user
    Profile {
        #[arg(long)]
        user: String,
    },
    /// List the user's playlists
    Playlists {
        #[arg(long)]
        user: String,
    },
    /// Designate the playlist rewritten by `replace`
    SetTarget {
        #[arg(long)]
        user: String,
        #[arg(long)]
        playlist: String,
    },
    /// Exclude a track or artist from the generated playlist
    Mute {
        #[arg(long)]
        user: String,
        #[arg(value_enum)]
        kind: MuteKind,
        id: String,
    },
    /// Undo a previous mute
    Unmute {
        #[arg(long)]
        user: String,
        #[arg(value_enum)]
        kind: MuteKind,
        id: String,
    },
    /// Show the ranking with the user's mutes
    Ranking {
        #[arg(long)]
        user: String,
        /// Re-download the chart instead of using the cache
        #[arg(long)]
        refresh: bool,
    },
    /// Rewrite the target playlist with the unmuted top tracks
    Replace {
        /// User to reconcile; omit together with --all
        #[arg(long, required_unless_present = "all")]
        user: Option<String>,
        /// Playlist id overriding the stored target
        #[arg(long, conflicts_with = "all")]
        playlist: Option<String>,
        /// Reconcile every stored user, one after another
        #[arg(long)]
        all: bool,
    },
    /// Validate config file and exit
    ConfigValidate,
}

fn init_logging(cfg: &Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    // Logs go to both stdout and a daily-rotated file in cfg.log_dir.
    let _ = LogTracer::init();
    std::fs::create_dir_all(&cfg.log_dir)
        .with_context(|| format!("creating log dir {}", cfg.log_dir.display()))?;
    let file_appender: RollingFileAppender =
        tracing_appender::rolling::daily(&cfg.log_dir, "ranking-sync.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Honor RUST_LOG if set, otherwise default to info.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking))
        .with(fmt::layer().with_writer(std::io::stdout));

    tracing_subscriber_global::set_global_default(subscriber)
        .context("installing global tracing subscriber")?;
    Ok(guard)
}

fn resolve_config_path(explicit: &Option<PathBuf>) -> PathBuf {
    match explicit {
        Some(p) => p.clone(),
        None => {
            let user_path = dirs::config_dir().map(|d| d.join("ranking-sync").join("config.toml"));
            match user_path {
                Some(p) if p.exists() => p,
                _ => PathBuf::from("config.toml"),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(&cli.config);

    if let Commands::ConfigValidate = cli.command {
        match Config::from_path(&config_path) {
            Ok(_) => println!("OK"),
            Err(e) => {
                eprintln!("Config validation failed: {}", e);
                std::process::exit(2);
            }
        }
        return Ok(());
    }

    let cfg = load_config(&config_path)?;
    let _guard = init_logging(&cfg)?;

    let store = SqliteStore::open(&cfg.db_path)
        .with_context(|| format!("opening store {}", cfg.db_path.display()))?;

    if let Commands::Login = cli.command {
        let user_key = lib::api::auth::run_login(&cfg, &store).await?;
        println!("Logged in as {}", user_key);
        return Ok(());
    }

    let client = SpotifyClient::from_config(&cfg);
    let ranking = ChartRanking::from_config(&cfg);
    let service = ReconcileService::new(&client, &store, &ranking)
        .with_utc_offset_hours(cfg.description_utc_offset_hours);

    let res = run(cli.command, &service, &store).await;

    if let Err(e) = &res {
        if let Some(se) = e.downcast_ref::<lib::error::SyncError>() {
            if se.forces_login() {
                eprintln!("Stored credential is no longer valid; run `ranking-sync login` again.");
            }
        }
    }
    res
}

type Service<'a> = ReconcileService<'a, SpotifyClient, SqliteStore, ChartRanking>;

async fn run(command: Commands, service: &Service<'_>, store: &SqliteStore) -> Result<()> {
    match command {
        Commands::Profile { user } => {
            let p = service.get_profile(&user).await?;
            println!(
                "{} ({}) {} [{}]",
                p.id,
                p.display_name.unwrap_or_default(),
                p.uri,
                p.country.unwrap_or_default()
            );
        }
        Commands::Playlists { user } => {
            for pl in service.get_playlists(&user).await? {
                let visibility = if pl.public { "public" } else { "private" };
                println!("- {}: {} ({}, owner {})", pl.id, pl.name, visibility, pl.owner_id);
            }
        }
        Commands::SetTarget { user, playlist } => {
            service.set_target_playlist(&user, &playlist).await?;
            println!("Target playlist set to {}", playlist);
        }
        Commands::Mute { user, kind, id } => set_muted(service, &user, kind, &id, true).await?,
        Commands::Unmute { user, kind, id } => set_muted(service, &user, kind, &id, false).await?,
        Commands::Ranking { user, refresh } => {
            let view = service.ranking_view(&user, refresh).await?;
            for (i, t) in view.tracks.iter().enumerate() {
                let mark = if t.muted { "x" } else { " " };
                println!("{:>3} [{}] {} {} ({})", i + 1, mark, t.id, t.name, t.artist_ids.join(","));
            }
            let muted_artists: Vec<_> = view.artists.iter().filter(|a| a.muted).map(|a| a.name.as_str()).collect();
            println!("{} artists, muted: {}", view.artists.len(), muted_artists.join(", "));
        }
        Commands::Replace { user, playlist, all } => {
            if all {
                replace_all(service, store).await?;
            } else if let Some(user) = user {
                let outcome = service.replace_playlist(&user, playlist.as_deref()).await?;
                println!(
                    "Replaced {} with {} tracks (snapshot {})",
                    outcome.playlist_id,
                    outcome.uris.len(),
                    outcome.snapshot_id
                );
            }
        }
        Commands::Login | Commands::ConfigValidate => {}
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_path(path).with_context(|| format!("loading config from {}", path.display()))
}

async fn set_muted(
    service: &Service<'_>,
    user: &str,
    kind: MuteKind,
    id: &str,
    muted: bool,
) -> Result<()> {
    let changed = match kind {
        MuteKind::Track => service.set_track_muted(user, id, muted).await?,
        MuteKind::Artist => service.set_artist_muted(user, id, muted).await?,
    };
    let verb = if muted { "muted" } else { "unmuted" };
    if changed {
        println!("{} {}", id, verb);
    } else {
        println!("{} already {}", id, verb);
    }
    Ok(())
}

/// Reconcile every stored user sequentially; per-user runs never overlap.
async fn replace_all(
    service: &Service<'_>,
    store: &SqliteStore,
) -> Result<()> {
    let mut failures = 0usize;
    for user in store.user_keys().await? {
        match service.replace_playlist(&user, None).await {
            Ok(outcome) => info!(
                "Replaced {} for {} ({} tracks)",
                outcome.playlist_id,
                user,
                outcome.uris.len()
            ),
            Err(lib::error::SyncError::Configuration(msg)) => {
                warn!("Skipping {}: {}", user, msg)
            }
            Err(e) => {
                failures += 1;
                error!("Replace failed for {}: {}", user, e);
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{} user(s) failed to reconcile", failures);
    }
    Ok(())
}
