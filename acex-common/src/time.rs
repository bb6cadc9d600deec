//! Timestamp utilities

use chrono::{DateTime, Local, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Run timestamp in `YYYYMMDD_HHMMSS` form, used for temp-file and
/// collision-disambiguation naming
pub fn run_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Log-line timestamp in `YYYY-MM-DD HH:MM:SS` form
pub fn log_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
