//! Logger setup and conditional logging macros.
//!
//! Modules that log on every reconciliation define a `ENABLE_LOGS` const and use the
//! macros exported at the crate root:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_info, log_warn, log_error};
//!
//! log_info!("drift check finished");
//! ```

use log::LevelFilter;

/// Initialize `env_logger` at info level. Safe to call more than once.
///
/// Called before config is loaded so config warnings are not lost. The logger itself
/// accepts debug records; the global max level decides what is emitted.
pub fn init() {
    let _ = env_logger::Builder::new()
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
    set_debug(false);
}

/// Switch between info and debug output. `RUST_LOG` still wins.
pub fn set_debug(debug: bool) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    log::set_max_level(if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
}

/// Debug log gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Info log gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Warn log gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Error log gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_debug_flag_raises_level_after_init() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }

        init();
        assert_eq!(log::max_level(), LevelFilter::Info);

        set_debug(true);
        assert_eq!(log::max_level(), LevelFilter::Debug);

        set_debug(false);
        assert_eq!(log::max_level(), LevelFilter::Info);
    }
}
