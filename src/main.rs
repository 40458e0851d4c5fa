use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Days, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clubshelf::cache::{start_auto_cleanup, InMemoryCacheStore};
use clubshelf::config::AppConfig;
use clubshelf::lending::{spawn_daily_accrual, FixedClock, LendingService};
use clubshelf::records::{demo, InMemoryRecordStore, OrderStatus};

#[derive(Parser)]
#[command(name = "clubshelf")]
#[command(about = "Book-club lending with overdue accrual", long_about = None)]
struct Cli {
    /// Cache TTL in seconds (overrides CLUBSHELF_CACHE_TTL_SECS)
    #[arg(long)]
    cache_ttl_secs: Option<u64>,

    /// Keys per cache multi-get / multi-set (overrides CLUBSHELF_CACHE_MAX_BATCH)
    #[arg(long)]
    max_batch: Option<usize>,

    /// Keys per cache multi-delete (overrides CLUBSHELF_INVALIDATION_CHUNK)
    #[arg(long)]
    invalidation_chunk: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the overdue accrual once over the demo club
    Accrue {
        /// Day to accrue for (YYYY-MM-DD); defaults to today
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// Run the overdue accrual on a fixed interval until interrupted
    Schedule {
        /// Seconds between runs (overrides CLUBSHELF_ACCRUAL_INTERVAL_SECS)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Accrue { today } => {
            let today = today.unwrap_or_else(|| Utc::now().date_naive());
            let service = demo_service(&config, today).await?;

            let report = service.accrual_job().run_for(today).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            let overdue: Vec<i64> = service
                .records()
                .orders_with_status(&[OrderStatus::Overdue])
                .await?
                .iter()
                .map(|o| o.id)
                .collect();
            for (id, order) in service.resolve_order_infos(&overdue).await? {
                println!(
                    "Order {} is {} ({} days overdue)",
                    id,
                    order.order_status,
                    order.max_overdue_days()
                );
            }
        }

        Commands::Schedule { interval_secs } => {
            let interval = interval_secs
                .map(Duration::from_secs)
                .unwrap_or(config.accrual_interval);
            let service = demo_service(&config, Utc::now().date_naive()).await?;

            let accrual = spawn_daily_accrual(Arc::new(service.accrual_job()), interval);
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            accrual.abort();
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::from_env()?;
    if let Some(secs) = cli.cache_ttl_secs {
        config.cache.default_ttl = Duration::from_secs(secs);
    }
    if let Some(size) = cli.max_batch {
        config.cache.max_batch_size = size;
    }
    if let Some(size) = cli.invalidation_chunk {
        config.cache.invalidation_chunk_size = size;
    }
    config.validate()?;
    Ok(config)
}

/// Demo club where the reader borrowed a copy three weeks before `today`,
/// due a week before `today`
async fn demo_service(config: &AppConfig, today: NaiveDate) -> Result<LendingService> {
    let records = Arc::new(InMemoryRecordStore::seeded(demo::demo_club()).await);
    let cache = Arc::new(InMemoryCacheStore::new(config.cache.clone()));
    tokio::spawn(start_auto_cleanup(cache.clone()));

    let lent_on = today - Days::new(21);
    let clock = Arc::new(FixedClock::at_day(lent_on));
    let setup = LendingService::new(records.clone(), cache.clone(), &config.cache).with_clock(clock);
    setup.apply_deposit(&[demo::EARTHSEA_PLEDGE]).await?;
    setup
        .apply_lend(demo::STAFF, demo::READER, &[demo::EARTHSEA_PLEDGE], lent_on + Days::new(14))
        .await?;

    Ok(LendingService::new(records, cache, &config.cache))
}
