//! Diagnostics for the watcher process.
//!
//! Events are the program's output and go to the configured sink, usually
//! standard output. Everything here goes to standard error instead, tagged
//! with the component that produced it (`walker`, `table`, `dispatcher`,
//! `inotify`), so piping the event stream never picks up log lines.
//!
//! Levels come from the `[logging]` table of the settings, or from
//! `RUST_LOG` when it is set:
//!
//! ```toml
//! [logging]
//! default = "info"
//!
//! [logging.modules]
//! "treewatch::watcher" = "debug"
//! ```
//!
//! `RUST_LOG=treewatch=trace treewatch /srv/data` also shows dispatcher
//! state transitions.

use std::sync::Once;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Local wall-clock time with milliseconds; the date is left to the sink.
struct WallClock;

impl FormatTime for WallClock {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// `EnvFilter` directives for `config`, modules in a stable order.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();
    modules
        .into_iter()
        .fold(config.default.clone(), |mut directives, (module, level)| {
            directives.push_str(&format!(",{module}={level}"));
            directives
        })
}

/// Install the stderr subscriber.
///
/// Only the first call has an effect, so tests may call it freely.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = match std::env::var("RUST_LOG") {
            Ok(_) => EnvFilter::from_default_env(),
            Err(_) => EnvFilter::new(filter_directives(config)),
        };

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_timer(WallClock)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(stderr_layer).init();
    });
}

/// Install the stderr subscriber at the default `info` level.
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

#[doc(hidden)]
#[macro_export]
macro_rules! __component_event {
    ($level:ident, $component:expr, $event:expr) => {
        tracing::$level!("[{}] {}", $component, $event)
    };
    ($level:ident, $component:expr, $event:expr, $($arg:tt)*) => {
        tracing::$level!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// `[component] event: detail` at info level.
///
/// ```ignore
/// log_event!("walker", "populated", "{} watched", stats.watched);
/// ```
#[macro_export]
macro_rules! log_event {
    ($($tt:tt)*) => { $crate::__component_event!(info, $($tt)*) };
}

/// Same line shape at warn level, for failures the watcher survives.
#[macro_export]
macro_rules! warn_event {
    ($($tt:tt)*) => { $crate::__component_event!(warn, $($tt)*) };
}

/// Same line shape at debug level.
#[macro_export]
macro_rules! debug_event {
    ($($tt:tt)*) => { $crate::__component_event!(debug, $($tt)*) };
}
