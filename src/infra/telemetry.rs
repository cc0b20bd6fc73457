use std::sync::Once;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{Unit, describe_counter, describe_gauge};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

const STARTED_AT_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year]/[month]/[day] [hour]:[minute]:[second]");

/// Process-lifetime counters surfaced by the status endpoint.
#[derive(Debug)]
pub struct RuntimeStats {
    started_at: OffsetDateTime,
    db_errors: AtomicU64,
    recovered_panics: AtomicU64,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self {
            started_at: OffsetDateTime::now_utc(),
            db_errors: AtomicU64::new(0),
            recovered_panics: AtomicU64::new(0),
        }
    }

    pub fn started_at(&self) -> String {
        self.started_at
            .format(STARTED_AT_FORMAT)
            .unwrap_or_default()
    }

    pub fn record_db_error(&self) {
        self.db_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn db_errors(&self) -> u64 {
        self.db_errors.load(Ordering::Relaxed)
    }

    pub fn record_recovered_panic(&self) {
        self.recovered_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recovered_panics(&self) -> u64 {
        self.recovered_panics.load(Ordering::Relaxed)
    }
}

impl Default for RuntimeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_gauge!(
            "vetrina_dirty_queue_depth",
            Unit::Count,
            "Current number of entities awaiting flush."
        );
        describe_gauge!(
            "vetrina_dirty_queue_high_water",
            Unit::Count,
            "Maximum dirty-queue depth observed since process start."
        );
        describe_counter!(
            "vetrina_flush_total",
            Unit::Count,
            "Total number of successful entity flushes."
        );
        describe_counter!(
            "vetrina_flush_errors_total",
            Unit::Count,
            "Total number of failed flush attempts."
        );
        describe_counter!(
            "vetrina_adv_watch_total",
            Unit::Count,
            "Total number of recorded ad views."
        );
        describe_counter!(
            "vetrina_backpressure_rejects_total",
            Unit::Count,
            "Total number of writes refused due to dirty-queue overload."
        );
        describe_counter!(
            "vetrina_recovered_panics_total",
            Unit::Count,
            "Total number of handler panics converted to 500 responses."
        );
    });
}
