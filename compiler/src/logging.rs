//! Logging setup for the frame compiler
//!
//! All diagnostics go through the `log` facade; binaries and tests pick a
//! backend here, backed by `env_logger`.
//!
//! ```rust,ignore
//! use compiler::logging;
//!
//! logging::init();                                   // Warn
//! logging::init_from_env();                          // RUST_LOG, default Warn
//! logging::init_with_level(log::LevelFilter::Debug); // explicit
//! ```
//!
//! Levels used by the crate:
//!
//! - `info!` - one summary line per phase (escape analysis, canonicalization)
//! - `debug!` - one line per node decision (virtualized, deoptimized, materialized)
//! - `trace!` - individual virtual entry writes and pass iterations
//!
//! Per-module filtering works as usual:
//!
//! ```bash
//! RUST_LOG=compiler::escape=debug vframe run frame.vfs
//! RUST_LOG=compiler::frame::access=trace vframe run frame.vfs
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging at Warn level. Later calls are no-ops.
pub fn init() {
    init_with_level(LevelFilter::Warn);
}

/// Initialize logging with a specific level. Later calls are no-ops.
pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {} - {}",
                    record.level(),
                    record.module_path().unwrap_or("unknown"),
                    record.args()
                )
            })
            .init();
    });
}

/// Initialize logging from `RUST_LOG`, defaulting to Warn.
pub fn init_from_env() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    });
}

/// Level for a `-v` count on the command line.
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Initialize logging for tests; output is captured by the test harness.
pub fn init_test() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .is_test(true)
        .try_init();
}
