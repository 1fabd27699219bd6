//! Human-readable duration formatting for progress and timing reports

use std::time::Duration;

/// Format thresholds (seconds)
const SHORT_FORMAT_MAX: u64 = 100; // < 100s → X.XXs
const MEDIUM_FORMAT_MAX: u64 = 6000; // < 100m → M:SS.Xs
const LONG_FORMAT_MAX: u64 = 90000; // < 25h → H:MM:SS
                                    // >= 25h → X.Xd

/// Format a duration with a precision that fits its magnitude.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tagger_common::human_time::format_duration;
///
/// assert_eq!(format_duration(Duration::from_millis(4500)), "4.50s");
/// assert_eq!(format_duration(Duration::from_secs(330)), "5:30.0s");
/// assert_eq!(format_duration(Duration::from_secs(7261)), "2:01:01");
/// assert_eq!(format_duration(Duration::from_secs(129600)), "1.5d");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < SHORT_FORMAT_MAX {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < MEDIUM_FORMAT_MAX {
        let minutes = secs / 60;
        let rem = duration.as_secs_f64() - (minutes * 60) as f64;
        format!("{}:{:04.1}s", minutes, rem)
    } else if secs < LONG_FORMAT_MAX {
        format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else {
        let days = secs as f64 / 86400.0;
        format!("{:.1}d", days)
    }
}

/// Format a completion ratio as `done/total (pp.p%)`
pub fn format_progress(done: u64, total: u64) -> String {
    let percentage = if total > 0 {
        (done as f64 / total as f64) * 100.0
    } else {
        0.0
    };
    format!("{}/{} ({:.1}%)", done, total, percentage)
}
