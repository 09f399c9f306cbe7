use anyhow::Context;
use clap::Parser;
use ehr_sync::utils::error::{ErrorSeverity, SyncError};
use ehr_sync::utils::{logger, validation::Validate};
use ehr_sync::{
    CliConfig, JsonFileCacheStore, RateLimitPolicy, RateLimiter, SoapTransport, SyncOrchestrator,
    SyncSettings,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    logger::init_logger(logger::LogFormat::from_flags(cli.json_logs), cli.verbose);

    tracing::info!("Starting ehr-sync");

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };
    if cli.verbose {
        tracing::debug!("Settings: {:?}", settings);
    }

    let limiter = Arc::new(RateLimiter::new(RateLimitPolicy::documented()));
    let transport = SoapTransport::new(&settings, limiter, settings.timeout())
        .context("failed to build SOAP transport")?;
    let store = JsonFileCacheStore::new(settings.cache_dir());

    let mut sync_config = settings.to_sync_config()?;
    if cli.once {
        sync_config.auto_sync = false;
    }

    let mut orchestrator = SyncOrchestrator::new(transport, store, sync_config);
    if let Some(date) = cli.date {
        tracing::info!("📅 Using {} as today", date);
        orchestrator = orchestrator.with_clock(move || date);
    }
    let orchestrator = Arc::new(orchestrator);

    let connected = match orchestrator.initialize().await {
        Ok(connected) => connected,
        Err(e) => exit_with(&e),
    };
    if !connected {
        tracing::warn!("⚠️ Remote unavailable, running in fallback mode");
    }

    if cli.once {
        let result = orchestrator.sync_now().await;
        println!("{}", serde_json::to_string_pretty(&result)?);
        if !result.success {
            std::process::exit(2);
        }
        return Ok(());
    }

    let result = orchestrator.sync_now().await;
    if result.success {
        tracing::info!(
            "✅ Initial sync: {} appointments, {} patients",
            result.appointments_found,
            result.patients_found
        );
    } else {
        tracing::warn!("⚠️ Initial sync failed: {}", result.errors.join("; "));
    }

    if !orchestrator.is_auto_sync_running() {
        tracing::info!("Auto-sync is disabled; exiting after initial sync");
        return Ok(());
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("🛑 Shutdown requested");
    orchestrator.shutdown();

    Ok(())
}

fn load_settings(cli: &CliConfig) -> ehr_sync::Result<SyncSettings> {
    let settings = SyncSettings::from_file(&cli.config)?;
    settings.validate()?;
    Ok(settings)
}

fn exit_with(e: &SyncError) -> ! {
    tracing::error!(
        "❌ Startup failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low | ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}
