use once_cell::sync::OnceCell;
use std::any::Any;
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::{error, info};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::Registry;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    prelude::*,
    util::SubscriberInitExt,
};

#[cfg(debug_assertions)]
use better_panic::{Settings, Verbosity};

#[cfg(not(debug_assertions))]
use human_panic::setup_panic;


static INIT: Once = Once::new();
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// How [`install`] sets up logging and panic reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    /// Level used when `RUST_LOG` does not say otherwise
    pub level: LevelFilter,
    /// Directory for the daily-rolling JSON log; no file log when `None`
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
    /// Log panics through `tracing` before the stock panic report
    pub panic_hook: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::WARN,
            log_dir: None,
            file_prefix: "relay.log".to_string(),
            panic_hook: true,
        }
    }
}

impl DiagnosticsConfig {
    /// Warnings only, console output, panic hook on
    pub fn new() -> Self {
        Self::default()
    }

    /// Default level when `RUST_LOG` is unset
    pub fn level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Also write logs to a daily-rolling file in `dir`
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Name prefix of the rolling log files
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Whether to install the logging panic hook
    pub fn panic_hook(mut self, enabled: bool) -> Self {
        self.panic_hook = enabled;
        self
    }

    /// `RUST_LOG` directives on top of the configured level
    pub(crate) fn env_filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(self.level.into())
            .from_env_lossy()
    }
}

/// Non-blocking writer for a daily-rolling file in `dir`
pub(crate) fn file_writer(dir: &Path, prefix: &str) -> (NonBlocking, WorkerGuard) {
    let appender = tracing_appender::rolling::daily(dir, prefix);
    tracing_appender::non_blocking(appender)
}

/// Installs the process-wide `tracing` subscriber and panic hook.
///
/// Logs go to stderr and, when [`DiagnosticsConfig::log_dir`] is set, as
/// JSON to a daily-rolling file there. In debug builds panics are reported
/// by `better_panic`, in release builds by `human_panic`.
///
/// Only the first call has an effect; it returns `true`. A subscriber
/// installed elsewhere beforehand is left in place.
///
/// # Example
/// ```
/// use relay_core::diagnostics::{self, DiagnosticsConfig};
///
/// diagnostics::install(&DiagnosticsConfig::new().panic_hook(false));
/// assert!(!diagnostics::install(&DiagnosticsConfig::new()));
/// ```
pub fn install(config: &DiagnosticsConfig) -> bool {
    let mut installed = false;
    INIT.call_once(|| {
        installed = true;
        let console_layer = fmt::Layer::new().with_writer(io::stderr);
        let file_layer = config.log_dir.as_deref().map(|dir| {
            let (writer, guard) = file_writer(dir, &config.file_prefix);
            let _ = LOG_GUARD.set(guard);
            fmt::Layer::new().with_writer(writer).json()
        });
        let subscribed = Registry::default()
            .with(config.env_filter())
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .is_ok();

        if config.panic_hook {
            install_panic_hook();
        }
        if subscribed {
            info!(
                level = %config.level,
                file_log = config.log_dir.is_some(),
                "diagnostics installed"
            );
        }
    });
    installed
}

fn install_panic_hook() {
    #[cfg(debug_assertions)]
    {
        Settings::auto()
            .most_recent_first(false)
            .lineno_suffix(true)
            .verbosity(Verbosity::Full)
            .install();
    }

    #[cfg(not(debug_assertions))]
    {
        setup_panic!();
    }

    let previous_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info.location().map_or("unknown".to_string(), |l| {
            format!("{}:{}:{}", l.file(), l.line(), l.column())
        });
        error!(
            target: "relay::panic",
            location = %location,
            payload = %payload_message(panic_info.payload()),
            "panicked"
        );
        previous_hook(panic_info);
        let _ = io::stderr().flush();
    }));
}

/// Text of a panic payload raised with a string message
pub(crate) fn payload_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<unknown>")
}
