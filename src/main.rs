use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tokio::signal::unix::SignalKind;
use tracing::{error, info, warn};
mod config;
mod error;
mod events;
mod services;
mod utils;

use config::SharedConfig;
use services::{create_host_backend, run_event_loop, GeometryStore, LifecycleTracker, StoreAdmin, TokioTimers};

#[derive(Parser, Debug)]
#[command(name = "winpos")]
#[command(about = "Запоминает положение, размер и монитор окон и восстанавливает их при следующем открытии")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "winpos.toml")]
    config: String,

    /// Режим сухого запуска (эмуляция оконного менеджера, хранилище в памяти)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (по умолчанию берётся из конфигурации)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Запустить демон (по умолчанию)
    Run,
    /// Показать число сохранённых записей
    Count,
    /// Удалить записи старше N дней
    Cleanup {
        /// По умолчанию storage.cleanup_after_days
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=365))]
        days: Option<u32>,
    },
    /// Удалить все сохранённые записи
    Clear,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Загрузка конфигурации
    let shared = match SharedConfig::load(&args.config) {
        Ok(shared) => Arc::new(shared),
        Err(e) => {
            init_tracing(args.log_level.as_deref().unwrap_or("info"), "pretty")?;
            error!("Не удалось загрузить конфигурацию: {:#}", e);
            return Err(e);
        }
    };
    let config = shared.current();

    // Инициализация системы логирования
    init_tracing(
        args.log_level.as_deref().unwrap_or(&config.logging.level),
        &config.logging.format,
    )?;

    info!("Запуск winpos v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    match args.command.clone().unwrap_or(Command::Run) {
        Command::Run => run_daemon(&args, shared).await,
        Command::Count => {
            let admin = open_admin(&shared)?;
            println!("{}", admin.stats());
            Ok(())
        }
        Command::Cleanup { days } => {
            let admin = open_admin(&shared)?;
            let days = days.unwrap_or(config.storage.cleanup_after_days);
            let removed = admin.cleanup_older_than_days(days, Utc::now())?;
            println!("Удалено записей старше {} дней: {}", days, removed);
            Ok(())
        }
        Command::Clear => {
            let admin = open_admin(&shared)?;
            let removed = admin.clear_all()?;
            println!("Удалено записей: {}", removed);
            Ok(())
        }
    }
}

async fn run_daemon(args: &Args, shared: Arc<SharedConfig>) -> Result<()> {
    let config = shared.current();
    let dry_run = args.dry_run || config.backend.mode == "dry_run";

    if dry_run {
        warn!("Режим сухого запуска - окна эмулируются, хранилище только в памяти");
    }

    // Проверка окружения
    utils::environment::check_environment(&config, dry_run)?;

    let store = Arc::new(if dry_run {
        GeometryStore::in_memory()
    } else {
        GeometryStore::open(&config.storage.path)?
    });

    let host = create_host_backend(&config, dry_run)?;
    let (timers, mut fired) = TokioTimers::new();
    let mut tracker = LifecycleTracker::new(shared.clone(), store, host, timers);

    info!("Все компоненты инициализированы");

    run_event_loop(&mut tracker, &mut fired, &shared, wait_for_shutdown()).await?;

    info!("winpos завершил работу");
    Ok(())
}

/// Административные команды всегда работают с файлом хранилища
fn open_admin(shared: &SharedConfig) -> Result<StoreAdmin> {
    let config = shared.current();
    Ok(StoreAdmin::new(Arc::new(GeometryStore::open(&config.storage.path)?)))
}

/// Ctrl+C или SIGTERM
async fn wait_for_shutdown() {
    let mut terminate = match signal::unix::signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!("Не удалось подписаться на SIGTERM: {}", e);
            if let Err(err) = signal::ctrl_c().await {
                error!("Ошибка при ожидании сигнала завершения: {}", err);
            }
            return;
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
            Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
        },
        _ = terminate.recv() => info!("Получен сигнал завершения (SIGTERM)"),
    }
}

fn init_tracing(level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_days_are_limited_to_a_year() {
        let args = Args::try_parse_from(["winpos", "cleanup", "--days", "90"]).unwrap();
        assert!(matches!(args.command, Some(Command::Cleanup { days: Some(90) })));

        assert!(Args::try_parse_from(["winpos", "cleanup", "--days", "0"]).is_err());
        assert!(Args::try_parse_from(["winpos", "cleanup", "--days", "4294967295"]).is_err());
    }
}
