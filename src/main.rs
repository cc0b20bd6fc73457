use std::{process, sync::Arc};

use tokio::net::TcpListener;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

use vetrina::{
    application::{
        AccountService, ListingService, SessionManager, driver::PersistenceDriver, error::AppError,
    },
    cache::{AdmissionGate, DirtyQueue, FlushScheduler, ObjectCache},
    config,
    domain::currency::RateTable,
    infra::{
        db::{FileDriver, MemoryDriver},
        error::InfraError,
        http::{self, AppState},
        telemetry::{self, RuntimeStats},
        uploads::PhotoStore,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (_cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;
    run_serve(settings).await
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let driver: Arc<dyn PersistenceDriver> = if settings.storage.is_memory() {
        info!(target = "vetrina::main", "Using in-memory persistence driver");
        Arc::new(MemoryDriver::new())
    } else {
        Arc::new(
            FileDriver::open(&settings.storage.data_dir)
                .map_err(|err| AppError::unexpected(format!("failed to open data dir: {err}")))?,
        )
    };

    let rates_path = settings.storage.rates_path();
    let rates = match RateTable::load(&rates_path) {
        Ok(table) => table,
        Err(err) => {
            warn!(
                target = "vetrina::main",
                path = %rates_path.display(),
                error = %err,
                "Rate file unavailable, using built-in table"
            );
            RateTable::builtin()
        }
    };

    // Indices are populated before the listener opens; nothing else
    // runs concurrently with the load.
    let snapshot = driver
        .load_all()
        .await
        .map_err(|err| AppError::unexpected(format!("failed to load records: {err}")))?;
    let queue = Arc::new(DirtyQueue::new());
    let cache = Arc::new(ObjectCache::from_snapshot(snapshot, rates, queue.clone()).await);

    let gate = Arc::new(AdmissionGate::new());
    let stats = Arc::new(RuntimeStats::new());
    let photos = Arc::new(PhotoStore::open(&settings.uploads.directory)?);
    let sessions = Arc::new(SessionManager::new(
        cache.clone(),
        settings.session.domain.clone(),
    ));
    let accounts = Arc::new(AccountService::new(cache.clone()));
    let listings = Arc::new(ListingService::new(cache.clone(), photos));

    let flusher = FlushScheduler::new(
        queue.clone(),
        driver.clone(),
        gate.clone(),
        stats.clone(),
        settings.cache.flush_batch,
        settings.cache.flush_tick,
    );
    let flusher_handle = tokio::spawn(flusher.run());
    let rates_handle = tokio::spawn(reload_rates_periodically(
        cache.clone(),
        rates_path,
        settings.cache.rates_reload,
    ));

    let state = AppState {
        cache,
        sessions,
        accounts,
        listings,
        gate: gate.clone(),
        stats,
        backpressure_threshold: settings.cache.backpressure_threshold,
        request_deadline: settings.server.request_deadline,
    };
    let router = http::build_router(
        state,
        &settings.uploads.directory,
        &settings.uploads.static_directory,
    );

    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "vetrina::main",
        addr = %settings.server.addr,
        "Listening"
    );

    let shutdown_gate = gate.clone();
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!(target = "vetrina::main", "Shutdown signal received");
            shutdown_gate.request_stop();
        })
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    // The latch may not be raised yet if serve returned on its own.
    gate.request_stop();
    rates_handle.abort();
    let _ = rates_handle.await;

    info!(
        target = "vetrina::main",
        remaining = queue.depth(),
        "Draining dirty queue before exit"
    );
    match tokio::time::timeout(settings.server.graceful_shutdown, flusher_handle).await {
        Ok(joined) => {
            let _ = joined;
            info!(target = "vetrina::main", "Clean shutdown");
        }
        Err(_) => warn!(
            target = "vetrina::main",
            remaining = queue.depth(),
            "Flush drain exceeded the graceful-shutdown window"
        ),
    }
    Ok(())
}

async fn reload_rates_periodically(
    cache: Arc<ObjectCache>,
    path: std::path::PathBuf,
    cadence: std::time::Duration,
) {
    let mut interval = tokio::time::interval(cadence);
    interval.tick().await;
    loop {
        interval.tick().await;
        match RateTable::load(&path) {
            Ok(table) => cache.refresh_rates(table).await,
            Err(err) => warn!(
                target = "vetrina::main",
                path = %path.display(),
                error = %err,
                "Rate reload failed, keeping previous table"
            ),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(target = "vetrina::main", error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
