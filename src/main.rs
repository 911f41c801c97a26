mod api;
mod cache;
mod calendar;
mod cli;
mod clock;
mod config;
mod db;
mod ledger;
mod model;
mod notify;
mod planner;
mod push;
mod reminder;
mod scheduler;
mod store;
mod sweep;

use crate::api::ApiState;
use crate::cache::storage::CacheStorage;
use crate::cache::{CacheControlMessage, CacheManager, FetchRequest, MessageOutcome, ReqwestFetcher};
use crate::cli::onboard::run_onboarding;
use crate::cli::{
    AddCommands, CacheCommands, Cli, Commands, ConfigCommands, ItemFields, TenantCommands,
};
use crate::clock::{Zone, parse_wall_clock};
use crate::config::{Config, FIXED_TICK_SECONDS};
use crate::db::{Database, TenantList};
use crate::model::{ItemDraft, ItemKind, OccurrenceKey};
use crate::notify::{DesktopNotifier, Dispatcher, LogNotifier, NotificationPermission};
use crate::planner::Planner;
use crate::push::HttpPushSender;
use crate::scheduler::{ReminderJob, SweepJob};
use crate::store::Store;
use crate::store::backend::JsonFileBackend;
use anyhow::{Context, Result, bail};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => {
            let _ = run_onboarding()?;
            Ok(())
        }
        Commands::Config { command } => handle_config_command(command),
        Commands::Status => handle_status().await,
        Commands::Add { command } => handle_add(command),
        Commands::Edit {
            kind,
            id,
            fields,
            name,
        } => handle_edit(kind, &id, name, fields),
        Commands::Remove { kind, id } => handle_remove(kind, &id),
        Commands::Done { kind, id, date } => handle_done(kind, id, date),
        Commands::List => handle_list(),
        Commands::Month { month } => handle_month(month),
        Commands::Check { at } => handle_check(at),
        Commands::Sweep { at } => handle_sweep(at).await,
        Commands::Tenant { command } => handle_tenant_command(command),
        Commands::Cache { command } => handle_cache_command(command).await,
        Commands::Service => {
            let config = load_config()?;
            run_service(config).await
        }
    }
}

fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Set { key, value } => {
            let mut config = load_or_default_config()?;
            config.set_value(&key, &value)?;
            config.ensure_bootstrap_files()?;
            config.save()?;

            let masked = if key.contains("api_key") {
                "***hidden***".to_string()
            } else {
                value
            };
            println!("Config saved: {key} = {masked}");
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let config = load_config()?;
            let value = config
                .get_value(&key)
                .with_context(|| format!("Unsupported config key: {key}"))?;

            println!("{value}");
            Ok(())
        }
    }
}

async fn handle_status() -> Result<()> {
    let config = load_config()?;
    let zone = config.zone()?;
    let planner = open_planner(&config)?;
    let snapshot = planner.store.snapshot();
    let ledger = Database::open(&config.ledger_db_path)?;
    let generations = CacheStorage::new(config.cache_dir.clone()).names().await?;

    println!("RitualBell status");
    println!("- now: {} ({})", zone.now().format("%Y-%m-%d %H:%M"), config.timezone);
    println!("- daily_rituals: {}", snapshot.daily_rituals.len());
    println!("- weekly_rituals: {}", snapshot.weekly_rituals.len());
    println!("- tasks: {}", snapshot.tasks.len());
    println!("- completions: {}", snapshot.completions.len());
    println!("- reminder_marks: {}", ledger.count_reminder_marks()?);
    println!("- notifications_enabled: {}", config.notifications_enabled);
    println!(
        "- cache_generations: {}",
        if generations.is_empty() {
            "none".to_string()
        } else {
            generations.join(", ")
        }
    );
    println!("- sweep_enabled: {}", config.sweep_enabled);
    println!("- api: http://127.0.0.1:{}", config.api_port);

    Ok(())
}

fn handle_add(command: AddCommands) -> Result<()> {
    let (kind, name, fields) = match command {
        AddCommands::Daily { name, fields } => (ItemKind::Daily, name, fields),
        AddCommands::Weekly { name, fields } => (ItemKind::Weekly, name, fields),
        AddCommands::Task { name, fields } => (ItemKind::Task, name, fields),
    };

    let draft = apply_fields(
        ItemDraft {
            name,
            ..ItemDraft::default()
        },
        fields,
    );

    let config = load_config()?;
    let mut planner = open_planner(&config)?;
    let id = planner.store.create(kind, &draft)?;
    println!("Added {kind}: {} ({id})", draft.name.trim());
    Ok(())
}

fn handle_edit(kind: ItemKind, id: &str, name: Option<String>, fields: ItemFields) -> Result<()> {
    let config = load_config()?;
    let mut planner = open_planner(&config)?;

    let mut draft = planner
        .store
        .snapshot()
        .draft_for(kind, id)
        .with_context(|| format!("No {kind} item with id {id}"))?;
    if let Some(name) = name {
        draft.name = name;
    }
    let draft = apply_fields(draft, fields);

    planner.store.update(kind, id, &draft)?;
    println!("Updated {kind}: {id}");
    Ok(())
}

fn handle_remove(kind: ItemKind, id: &str) -> Result<()> {
    let config = load_config()?;
    let mut planner = open_planner(&config)?;

    if planner.delete_item(kind, id)? {
        println!("Removed {kind}: {id}");
    } else {
        println!("No {kind} item with id {id}. Nothing removed");
    }
    Ok(())
}

fn handle_done(kind: ItemKind, id: String, date: Option<String>) -> Result<()> {
    let config = load_config()?;
    let zone = config.zone()?;
    let date = parse_optional_date(date, &zone)?;
    let mut planner = open_planner(&config)?;

    if !planner.store.snapshot().contains_item(kind, &id) {
        warn!(kind = %kind, item = %id, "marking an occurrence of an unknown item");
    }

    let key = OccurrenceKey::new(date, kind, id);
    let completed = planner.toggle_completion(key.clone())?;
    println!(
        "{key}: {}",
        if completed { "completed" } else { "not completed" }
    );
    Ok(())
}

fn handle_list() -> Result<()> {
    let config = load_config()?;
    let planner = open_planner(&config)?;
    let snapshot = planner.store.snapshot();

    println!("Daily rituals");
    for ritual in &snapshot.daily_rituals {
        println!(
            "- {} {} {}",
            ritual.id,
            ritual.time.as_deref().unwrap_or("--:--"),
            ritual.name
        );
    }

    println!("Weekly rituals");
    for ritual in &snapshot.weekly_rituals {
        let days = ritual.days.iter().cloned().collect::<Vec<_>>().join(",");
        println!(
            "- {} {} [{days}] {}",
            ritual.id,
            ritual.time.as_deref().unwrap_or("--:--"),
            ritual.name
        );
    }

    println!("Tasks");
    for task in &snapshot.tasks {
        println!("- {} {} {}", task.id, task.date, task.name);
    }

    Ok(())
}

fn handle_month(month: Option<String>) -> Result<()> {
    let config = load_config()?;
    let today = config.zone()?.now().date();
    let (year, month) = match month.as_deref() {
        Some(raw) => calendar::parse_month(raw)?,
        None => (today.year(), today.month()),
    };

    let planner = open_planner(&config)?;
    let view = calendar::month_view(year, month, planner.store.snapshot(), today)?;

    println!("{}", view.title);
    for day in &view.days {
        let entries = day
            .entries
            .iter()
            .map(|entry| {
                let mark = if entry.completed { "✓" } else { " " };
                format!("[{mark}] {} {}", entry.kind, entry.name)
            })
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{}{} {:>2} {entries}",
            if day.today { "*" } else { " " },
            day.date.format("%a"),
            day.date.day(),
        );
    }

    Ok(())
}

fn handle_check(at: Option<String>) -> Result<()> {
    let config = load_config()?;
    let replayed = at.is_some();
    let now = resolve_now(at, &config.zone()?)?;
    let planner = open_planner(&config)?.shared();
    let dispatcher = if replayed {
        Dispatcher::new(
            NotificationPermission {
                granted: config.notifications_enabled,
            },
            Arc::new(LogNotifier),
        )
    } else {
        build_dispatcher(&config)
    };

    let evaluation = reminder::run_check(&planner, now, &dispatcher, &config.icon_url())?;

    println!("Reminder check at {}", now.format("%Y-%m-%d %H:%M"));
    if evaluation.is_empty() {
        println!("- nothing due");
    }
    for alert in evaluation.alerts() {
        println!("- {:?} {} {} ({})", alert.phase, alert.kind, alert.name, alert.item_id);
    }
    Ok(())
}

async fn handle_sweep(at: Option<String>) -> Result<()> {
    let config = load_config()?;
    let now = resolve_now(at, &config.zone()?)?;
    let job = build_sweep_job(&config)?;

    let report = job.run_at(now).await?;
    println!(
        "Sweep {}: tenants={} matched={} sent={} failed={}",
        now.format("%Y-%m-%d %H:%M"),
        report.tenants,
        report.matched,
        report.delivery.success,
        report.delivery.failure
    );
    Ok(())
}

fn handle_tenant_command(command: TenantCommands) -> Result<()> {
    let config = load_config()?;
    let mut database = Database::open(&config.sweep_db_path)?;

    match command {
        TenantCommands::Add { tenant } => {
            database.upsert_tenant(&tenant)?;
            println!("Tenant registered: {tenant}");
        }
        TenantCommands::Token { tenant, token } => {
            ensure_tenant(&database, &tenant)?;
            if database.add_push_token(&tenant, &token)? {
                println!("Push token added to {tenant}");
            } else {
                println!("Push token already registered for {tenant}");
            }
        }
        TenantCommands::Untoken { tenant, token } => {
            if database.remove_push_token(&tenant, &token)? {
                println!("Push token removed from {tenant}");
            } else {
                println!("Push token not found for {tenant}");
            }
        }
        TenantCommands::Sync { tenant } => {
            ensure_tenant(&database, &tenant)?;
            let today = config.zone()?.now().date();
            let planner = open_planner(&config)?;

            for (list, items) in sweep::tenant_lists_from_snapshot(planner.store.snapshot(), today) {
                database.replace_tenant_items(&tenant, list, &items)?;
                println!("- {}: {} item(s)", list.as_str(), items.len());
            }
            println!("Snapshot published to {tenant}");
        }
        TenantCommands::Complete {
            tenant,
            list,
            name,
            undo,
        } => {
            let list = list.parse::<TenantList>()?;
            let updated = database.set_tenant_item_completed(&tenant, list, &name, !undo)?;
            if updated == 0 {
                bail!("No {} item named {name} for tenant {tenant}", list.as_str());
            }
            println!(
                "{tenant}/{}/{name}: {}",
                list.as_str(),
                if undo { "not completed" } else { "completed" }
            );
        }
        TenantCommands::List => {
            let tenant_ids = database.list_tenant_ids()?;
            if tenant_ids.is_empty() {
                println!("No tenants registered");
            }
            for tenant_id in tenant_ids {
                let record = database.tenant_record(&tenant_id)?;
                println!(
                    "- {tenant_id}: tokens={} daily={} weekly={} master={}",
                    record.fcm_tokens.len(),
                    record.daily.len(),
                    record.weekly.len(),
                    record.master.len()
                );
            }
        }
    }

    Ok(())
}

async fn handle_cache_command(command: CacheCommands) -> Result<()> {
    let config = load_config()?;
    config.ensure_bootstrap_files()?;
    let cache = build_cache(&config)?;

    match command {
        CacheCommands::Install => {
            let report = cache.install().await?;
            println!(
                "Installed {}: cached={} skipped={} failed={}",
                cache.generations().static_name,
                report.cached.len(),
                report.skipped.len(),
                report.failed.len()
            );
            for url in report.skipped.iter().chain(report.failed.iter()) {
                println!("- not cached: {url}");
            }
        }
        CacheCommands::Activate => {
            let outcome = cache.handle_message(CacheControlMessage::SkipWaiting).await?;
            if let MessageOutcome::Activated(report) = outcome {
                println!("Activated. superseded generations: {}", report.superseded.len());
                for name in report.superseded {
                    println!("- deleted {name}");
                }
            }
        }
        CacheCommands::Fetch { url, navigate } => {
            let url = Url::parse(&url).with_context(|| format!("Invalid URL: {url}"))?;
            let mut request = FetchRequest::get(url);
            request.navigate = navigate;

            let served = cache.fetch(&request).await?;
            println!(
                "{} {:?} status={} bytes={}",
                request.url,
                served.source,
                served.response.status,
                served.response.body.len()
            );
        }
        CacheCommands::Precache { urls } => {
            let count = cache.precache(&urls).await?;
            println!("Pre-cached {count} URL(s) into {}", cache.generations().static_name);
        }
    }

    Ok(())
}

async fn run_service(config: Config) -> Result<()> {
    config.ensure_bootstrap_files()?;
    let zone = config.zone()?;

    let planner = open_planner(&config)?.shared();
    let dispatcher = build_dispatcher(&config);
    let cache = Arc::new(build_cache(&config)?);
    let sweep_job = if config.sweep_enabled {
        Some(Arc::new(build_sweep_job(&config)?))
    } else {
        None
    };

    let shared_config = Arc::new(config);
    let reminder_job = Arc::new(ReminderJob::new(
        Arc::clone(&planner),
        dispatcher.clone(),
        shared_config.icon_url(),
        shared_config.ledger_retention_days,
    ));

    let api_state = ApiState {
        config: Arc::clone(&shared_config),
        zone,
        planner,
        dispatcher,
        cache: Arc::clone(&cache),
    };

    tokio::spawn(prepare_cache(cache));

    info!(
        tick_seconds = FIXED_TICK_SECONDS,
        sweep = sweep_job.is_some(),
        "RitualBell service started"
    );

    tokio::select! {
        ticker_result = scheduler::run_minute_ticker(move || {
            let job = Arc::clone(&reminder_job);
            async move {
                let now = zone.now();
                tokio::task::spawn_blocking(move || job.run_at(now).map(|_| ()))
                    .await
                    .context("Reminder tick task panicked")?
            }
        }) => {
            ticker_result?;
        }
        sweep_result = run_sweep_loop(zone, sweep_job) => {
            sweep_result?;
        }
        api_result = api::run_server(api_state) => {
            api_result?;
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

async fn run_sweep_loop(zone: Zone, job: Option<Arc<SweepJob>>) -> Result<()> {
    let Some(job) = job else {
        return std::future::pending().await;
    };

    scheduler::run_minute_aligned(zone, move |minute| {
        let job = Arc::clone(&job);
        async move { job.run_at(minute).await.map(|_| ()) }
    })
    .await
}

async fn prepare_cache(cache: Arc<CacheManager>) {
    if let Err(error) = cache.install().await {
        warn!(error = %error, "cache install failed");
        return;
    }
    if let Err(error) = cache.activate().await {
        warn!(error = %error, "cache activation failed");
    }
}

fn apply_fields(mut draft: ItemDraft, fields: ItemFields) -> ItemDraft {
    if let Some(time) = fields.time {
        draft.time = Some(time);
    }
    if let Some(description) = fields.description {
        draft.description = description;
    }
    if let Some(days) = fields.days {
        draft.days = days;
    }
    if let Some(date) = fields.date {
        draft.date = Some(date);
    }
    draft
}

fn ensure_tenant(database: &Database, tenant: &str) -> Result<()> {
    if !database.tenant_exists(tenant)? {
        bail!("Unknown tenant: {tenant}. Run `ritualbell tenant add {tenant}` first.");
    }
    Ok(())
}

fn open_planner(config: &Config) -> Result<Planner> {
    let store = Store::open(Box::new(JsonFileBackend::new(config.snapshot_path.clone())));
    let ledger = Database::open(&config.ledger_db_path)?;
    Ok(Planner::new(store, Box::new(ledger)))
}

fn build_dispatcher(config: &Config) -> Dispatcher {
    Dispatcher::new(
        NotificationPermission {
            granted: config.notifications_enabled,
        },
        Arc::new(DesktopNotifier),
    )
}

fn build_cache(config: &Config) -> Result<CacheManager> {
    CacheManager::from_config(config, Arc::new(ReqwestFetcher::new()?))
}

fn build_sweep_job(config: &Config) -> Result<SweepJob> {
    let database = Database::open(&config.sweep_db_path)?;
    let sender = HttpPushSender::from_config(config)?;
    Ok(SweepJob::new(database, Arc::new(sender)))
}

fn resolve_now(at: Option<String>, zone: &Zone) -> Result<NaiveDateTime> {
    at.as_deref()
        .map(parse_wall_clock)
        .transpose()
        .map(|parsed| parsed.unwrap_or_else(|| zone.now()))
}

fn parse_optional_date(input: Option<String>, zone: &Zone) -> Result<NaiveDate> {
    let Some(date) = input else {
        return Ok(zone.now().date());
    };

    NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .with_context(|| format!("Invalid date format: {date}. Example: 2024-06-05"))
}

fn load_or_default_config() -> Result<Config> {
    Config::load().or_else(|_| {
        let config = Config::default();
        config.ensure_bootstrap_files()?;
        config.save()?;
        Ok(config)
    })
}

fn load_config() -> Result<Config> {
    Config::load()
        .with_context(|| "Config file not found. Run `ritualbell onboard` first.".to_string())
}
