use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use serde::Serialize;
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use coinflow::{
    CoinGeckoClient, CronScheduler, Database, Ingestor, LogAlerter, RunMode, RunOutcome, Settings,
};

#[derive(Parser)]
#[command(name = "coinflow")]
#[command(about = "Crypto market data ingestion into PostgreSQL", version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect one page of top coins, then print statistics and the top 5
    Collect {
        /// Number of coins to collect (default: ingest.top_limit)
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Backfill history for the top coins
    Backfill {
        /// Trailing window in days (default: ingest.backfill_days)
        #[arg(short, long)]
        days: Option<u32>,

        /// Number of coins to backfill (default: ingest.backfill_coins)
        #[arg(short, long)]
        coins: Option<u32>,
    },

    /// Collect and prune on a schedule until interrupted
    Daemon,

    /// Delete snapshots older than the retention horizon
    Prune {
        /// Days to keep (default: retention.days_to_keep)
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Most recent snapshots across all coins
    Latest {
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },

    /// Snapshot history for one coin
    History {
        coin_id: String,

        #[arg(short, long, default_value_t = 30)]
        days: u32,

        /// Resample into daily OHLCV bars with moving averages
        #[arg(long)]
        daily: bool,
    },

    /// Coins ranked by market cap, latest or on a given UTC date
    Top {
        #[arg(short, long, default_value_t = 10)]
        limit: u32,

        /// Calendar date, YYYY-MM-DD
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Coins whose 24h price change magnitude meets a threshold
    Movers {
        /// Minimum absolute 24h change, in percent
        #[arg(short, long, default_value_t = 5.0)]
        min_change: f64,
    },

    /// Table-wide statistics
    Stats,

    /// Fetch the provider's detail record for one coin
    Coin { coin_id: String },
}

#[tokio::main()]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    SimpleLogger::new()
        .with_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init()
        .context("Failed to initialize logger")?;

    // Load configuration
    let settings = Arc::new(
        Settings::new().context("Failed to load configuration. Please ensure it is valid")?,
    );

    if let Commands::Coin { coin_id } = &cli.command {
        print_coin(&settings, coin_id).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let db = Arc::new(
        Database::new(settings.postgres.clone())
            .await
            .context("Failed to initialize database connection")?,
    );

    let cancellation_token = CancellationToken::new();

    match cli.command {
        Commands::Collect { limit } => {
            let limit = limit.unwrap_or(settings.ingest.top_limit);
            let ingestor = build_ingestor(&settings, &db)?;
            spawn_signal_handler(cancellation_token.clone());

            let outcome = ingestor
                .run(RunMode::Realtime { limit }, &cancellation_token)
                .await;

            if matches!(outcome, RunOutcome::Completed(_)) {
                print_collection_report(&db).await?;
            }
            return Ok(ExitCode::from(outcome.exit_code()));
        },
        Commands::Backfill { days, coins } => {
            let mode = RunMode::Historical {
                days: days.unwrap_or(settings.ingest.backfill_days),
                coins: coins.unwrap_or(settings.ingest.backfill_coins),
            };
            let ingestor = build_ingestor(&settings, &db)?;
            spawn_signal_handler(cancellation_token.clone());

            let outcome = ingestor.run(mode, &cancellation_token).await;
            if let Some(summary) = outcome.summary() {
                for (coin, result) in &summary.outcomes {
                    println!("{:<24} {}", coin, result);
                }
                println!("{}", summary);
            }
            return Ok(ExitCode::from(outcome.exit_code()));
        },
        Commands::Daemon => run_daemon(settings, db, cancellation_token).await?,
        Commands::Prune { days } => {
            let days = days.unwrap_or(settings.retention.days_to_keep);
            let deleted = db.postgres.prune(days).await?;
            println!("Deleted {} snapshots older than {} days", deleted, days);
        },
        Commands::Latest { limit } => print_json_lines(&db.postgres.latest(limit).await?)?,
        Commands::History {
            coin_id,
            days,
            daily,
        } => {
            if daily {
                print_json_lines(&db.postgres.history_daily(&coin_id, days).await?)?;
            } else {
                print_json_lines(&db.postgres.history(&coin_id, days).await?)?;
            }
        },
        Commands::Top { limit, date } => {
            print_json_lines(&db.postgres.top_by_market_cap(limit, date).await?)?
        },
        Commands::Movers { min_change } => {
            print_json_lines(&db.postgres.price_movers(min_change).await?)?
        },
        Commands::Stats => {
            let stats = db.postgres.statistics().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        },
        // Served above without a database connection
        Commands::Coin { .. } => {},
    }

    Ok(ExitCode::SUCCESS)
}

fn build_ingestor(settings: &Settings, db: &Arc<Database>) -> anyhow::Result<Ingestor> {
    let provider =
        CoinGeckoClient::new(&settings.provider).context("Failed to create market data client")?;

    Ok(Ingestor::new(
        Arc::new(provider),
        db.clone(),
        Arc::new(LogAlerter::new(&settings.alert)),
        settings.ingest.clone(),
        settings.provider.vs_currency.clone(),
    ))
}

async fn run_daemon(
    settings: Arc<Settings>,
    db: Arc<Database>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let ingestor = Arc::new(build_ingestor(&settings, &db)?);

    let cron_scheduler = CronScheduler::new(
        db.clone(),
        ingestor,
        settings.schedule.clone(),
        settings.retention.clone(),
        settings.ingest.top_limit,
    );

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    info!("Daemon running. Press Ctrl+C to stop.");
    wait_for_shutdown().await?;

    info!("Finishing all tasks...");
    cancellation_token.cancel();

    // Wait for cron scheduler to stop
    let _ = cron_handle.await;

    info!("Daemon stopped");
    Ok(())
}

/// Cancels `token` on Ctrl+C or SIGTERM so a run stops between coins
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(()) => token.cancel(),
            Err(e) => error!("Signal handler failed: {:#}", e),
        }
    });
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm_stream =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
    }

    Ok(())
}

async fn print_coin(settings: &Settings, coin_id: &str) -> anyhow::Result<()> {
    let provider =
        CoinGeckoClient::new(&settings.provider).context("Failed to create market data client")?;
    let record = provider
        .fetch_coin(coin_id)
        .await
        .with_context(|| format!("Failed to fetch coin '{}'", coin_id))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn print_collection_report(db: &Database) -> anyhow::Result<()> {
    let stats = db.postgres.statistics().await?;
    println!("Total rows:       {}", stats.total_rows);
    println!("Distinct coins:   {}", stats.distinct_coins);
    if let (Some(first), Some(last)) = (stats.first_collected_at, stats.last_collected_at) {
        println!("First collection: {}", first.format("%Y-%m-%d %H:%M:%S"));
        println!("Last collection:  {}", last.format("%Y-%m-%d %H:%M:%S"));
    }

    println!();
    println!("Top 5 by market cap:");
    for row in db.postgres.top_by_market_cap(5, None).await? {
        println!(
            "  {:>3}. {:<6} | ${:>14.2} | Cap: ${:>18.0}",
            row.market_cap_rank
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".into()),
            row.symbol,
            row.current_price.unwrap_or(f64::NAN),
            row.market_cap.unwrap_or(f64::NAN),
        );
    }
    Ok(())
}

fn print_json_lines<T: Serialize>(rows: &[T]) -> anyhow::Result<()> {
    for row in rows {
        println!("{}", serde_json::to_string(row)?);
    }
    Ok(())
}
