//! `atf`: archive, compare and update Algorithmic Transparency Feeds.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use atf_feed::config::AtfConfig;
use atf_feed::feed::xml::{format_timestamp, read_feed_file, write_feed};
use atf_feed::signing::KeyHandle;
use atf_feed::update::parse_updates;
use atf_feed::{AssessmentRequest, FeedDocument, FeedManager, FsBackend};

#[derive(Parser)]
#[command(name = "atf", about = "ATF feed management tools", version)]
struct Cli {
    /// Config file (defaults: $ATF_CONFIG_PATH, then config/atf.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the archive directory from the config.
    #[arg(long, global = true)]
    archive_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
    Xml,
}

#[derive(Subcommand)]
enum Command {
    /// Archive a feed file as a new version.
    Archive {
        feed_id: String,
        feed: PathBuf,
        version: String,
    },
    /// Compare two feed files.
    Compare {
        old: PathBuf,
        new: PathBuf,
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },
    /// Compare two archived versions of a feed.
    DiffVersions {
        feed_id: String,
        old_version: String,
        new_version: String,
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },
    /// Apply a JSON list of update operations to the latest version and archive it.
    Update {
        feed_id: String,
        updates: PathBuf,
        version: String,
    },
    /// List archived versions, oldest first.
    History {
        feed_id: String,
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },
    /// Print an archived version (latest by default).
    Show {
        feed_id: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },
    /// Search archive metadata across feeds.
    Search {
        #[arg(long)]
        feed: Option<String>,
        #[arg(long)]
        checksum: Option<String>,
        /// Only entries archived at or after this RFC 3339 timestamp.
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Only entries whose content repeats an earlier version.
        #[arg(long)]
        duplicates: bool,
    },
    /// Build an impact assessment from a template and a JSON request file.
    Assess { template: String, request: PathBuf },
    /// Sign an archived version with the configured external signer.
    Sign {
        feed_id: String,
        version: String,
        /// Key handle passed to the signer (defaults to signer.default_key).
        #[arg(long)]
        key: Option<String>,
    },
    /// Verify the stored signature of an archived version.
    Verify { feed_id: String, version: String },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("atf_feed=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<AtfConfig> {
    let mut cfg = match &cli.config {
        Some(p) => AtfConfig::load_from_file(p)
            .with_context(|| format!("loading config {}", p.display()))?,
        None => AtfConfig::load_default().context("loading default config")?,
    };
    if let Some(dir) = &cli.archive_dir {
        cfg.archive_dir = dir.clone();
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; absent in most deployments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    let manager = FeedManager::from_config(&cfg).context("initializing feed manager")?;

    run(cli.command, &cfg, &manager).await
}

async fn run(command: Command, cfg: &AtfConfig, manager: &FeedManager<FsBackend>) -> Result<()> {
    match command {
        Command::Archive {
            feed_id,
            feed,
            version,
        } => {
            let doc = read_feed_file(&feed).with_context(|| format!("reading {}", feed.display()))?;
            let entry = manager.archive_feed(&feed_id, &doc, &version).await?;
            println!(
                "Archived {}@{} (sha256 {})",
                entry.feed_id, entry.version, entry.checksum
            );
            if let Some(same) = entry.duplicate_of {
                println!("Note: content is identical to version {same}");
            }
        }
        Command::Compare { old, new, format } => {
            let a = read_feed_file(&old).with_context(|| format!("reading {}", old.display()))?;
            let b = read_feed_file(&new).with_context(|| format!("reading {}", new.display()))?;
            let d = manager.compare_feeds(&a, &b);
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&d)?),
                _ => print!("{d}"),
            }
        }
        Command::DiffVersions {
            feed_id,
            old_version,
            new_version,
            format,
        } => {
            let d = manager
                .compare_versions(&feed_id, &old_version, &new_version)
                .await?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&d)?),
                _ => print!("{d}"),
            }
        }
        Command::Update {
            feed_id,
            updates,
            version,
        } => {
            let raw = std::fs::read_to_string(&updates)
                .with_context(|| format!("reading {}", updates.display()))?;
            let ops = parse_updates(&raw).context("parsing update operations")?;
            let out = manager.automated_update(&feed_id, &ops, &version).await?;
            println!(
                "Archived {}@{} (prior {})",
                out.entry.feed_id,
                out.entry.version,
                out.entry.prior_version.as_deref().unwrap_or("-")
            );
            print!("{}", out.diff);
        }
        Command::History { feed_id, format } => {
            let entries = manager.history(&feed_id).await?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                _ => {
                    for e in entries {
                        println!(
                            "{:>4}  {:<12} {}  {}{}",
                            e.sequence,
                            e.version,
                            format_timestamp(&e.archived_at),
                            &e.checksum[..12.min(e.checksum.len())],
                            e.duplicate_of
                                .map(|v| format!("  (same content as {v})"))
                                .unwrap_or_default()
                        );
                    }
                }
            }
        }
        Command::Show {
            feed_id,
            version,
            format,
        } => {
            let version = match version {
                Some(v) => v,
                None => manager.store().latest(&feed_id).await?.version,
            };
            let doc = manager.store().retrieve(&feed_id, &version).await?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&doc)?),
                Format::Xml => print!("{}", write_feed(&doc)?),
                Format::Text => print_feed_text(&doc),
            }
        }
        Command::Search {
            feed,
            checksum,
            since,
            duplicates,
        } => {
            let hits = manager
                .store()
                .search(|e| {
                    feed.as_deref().map_or(true, |f| e.feed_id == f)
                        && checksum.as_deref().map_or(true, |c| e.checksum.starts_with(c))
                        && since.map_or(true, |s| e.archived_at >= s)
                        && (!duplicates || e.duplicate_of.is_some())
                })
                .await?;
            for e in hits {
                println!(
                    "{}@{}  {}  {}",
                    e.feed_id,
                    e.version,
                    format_timestamp(&e.archived_at),
                    e.checksum
                );
            }
        }
        Command::Assess { template, request } => {
            let raw = std::fs::read_to_string(&request)
                .with_context(|| format!("reading {}", request.display()))?;
            let req: AssessmentRequest =
                serde_json::from_str(&raw).context("parsing assessment request")?;
            let rec = manager.build_assessment(&template, &req)?;
            println!("{}", serde_json::to_string_pretty(&rec)?);
        }
        Command::Sign {
            feed_id,
            version,
            key,
        } => {
            let key = key
                .or_else(|| cfg.signer.as_ref().and_then(|s| s.default_key.clone()))
                .context("no --key given and signer.default_key is unset")?;
            let env = manager
                .sign_version(&feed_id, &version, &KeyHandle(key))
                .await?;
            println!(
                "Signed {}@{} with {} at {}",
                env.feed_id,
                env.version,
                env.key_handle,
                format_timestamp(&env.signed_at)
            );
        }
        Command::Verify { feed_id, version } => {
            if manager.verify_version(&feed_id, &version).await? {
                println!("Signature verified for {feed_id}@{version}");
            } else {
                anyhow::bail!("signature verification failed for {feed_id}@{version}");
            }
        }
    }
    Ok(())
}

fn print_feed_text(doc: &FeedDocument) {
    let ch = &doc.channel;
    println!("Feed: {} (version {})", ch.title, doc.version);
    println!("URL: {}", ch.link);
    println!("Description: {}", ch.description);
    println!("Last Updated: {}", format_timestamp(&ch.last_build_date));
    println!("Language: {}", ch.language);
    println!("\nItems:");
    for (idx, it) in doc.items.iter().enumerate() {
        println!("\n{}. {}", idx + 1, it.title);
        println!("   Published: {}", format_timestamp(&it.pub_date));
        println!("   Link: {}", it.link);
        println!("   Categories: {}", it.categories.join(", "));
        println!("   Description: {}", it.description);
        let ia = &it.impact_assessment;
        println!("\n   Impact Assessment:");
        println!("   - Summary: {}", ia.summary);
        println!("   - Affected Users: {}", ia.affected_users);
        if !ia.metrics.is_empty() {
            println!("   - Metrics:");
            for (name, value) in &ia.metrics {
                println!("     * {name}: {value}");
            }
        }
    }
}
