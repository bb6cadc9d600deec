//! Human-readable time formatting
//!
//! Provides consistent elapsed-time display for run summaries and progress
//! lines.

/// Format a duration in seconds as a human-readable string.
///
/// - `< 100s` → `X.XXs`
/// - `< 100m` → `M:SS.Xs`
/// - otherwise → `H:MM:SS`
///
/// # Examples
///
/// ```
/// use acex_common::human_time::format_elapsed;
///
/// assert_eq!(format_elapsed(45.0), "45.00s");
/// assert_eq!(format_elapsed(330.0), "5:30.0s");
/// assert_eq!(format_elapsed(3661.0), "1:01:01");
/// ```
pub fn format_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    if seconds < 100.0 {
        format!("{:.2}s", seconds)
    } else if seconds < 6000.0 {
        let minutes = (seconds / 60.0).floor() as u64;
        let secs = seconds - minutes as f64 * 60.0;
        format!("{}:{:04.1}s", minutes, secs)
    } else {
        let total = seconds.floor() as u64;
        let hours = total / 3600;
        let mins = (total % 3600) / 60;
        let secs = total % 60;
        format!("{}:{:02}:{:02}", hours, mins, secs)
    }
}
