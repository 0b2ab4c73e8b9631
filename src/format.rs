//! Formatting helpers for user-facing status texts

use std::time::Duration;

/// Number of slots in the textual progress bar
const PROGRESS_BAR_SLOTS: usize = 10;

/// Format a byte count as megabytes with one decimal, e.g. `"123.4 MB"`
pub fn format_bytes(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

/// Format a transfer rate, e.g. `"2.5 MB/s"`
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{:.1} MB/s", bytes_per_sec / (1024.0 * 1024.0))
}

/// Format an ETA as `"45s"` or `"3m 12s"`
pub fn format_eta(eta: Duration) -> String {
    let total_secs = eta.as_secs();
    if total_secs < 60 {
        format!("{}s", total_secs)
    } else {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    }
}

/// Draw a fixed-width progress bar, e.g. `"█████░░░░░"` at 50%
pub fn progress_bar(percent: u8) -> String {
    let filled = (percent.min(100) as usize * PROGRESS_BAR_SLOTS) / 100;
    let mut bar = String::with_capacity(PROGRESS_BAR_SLOTS * 3);
    for _ in 0..filled {
        bar.push('█');
    }
    for _ in filled..PROGRESS_BAR_SLOTS {
        bar.push('░');
    }
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_render_as_megabytes() {
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes(1536 * 1024), "1.5 MB");
        assert_eq!(format_bytes(0), "0.0 MB");
    }

    #[test]
    fn eta_switches_to_minutes_at_sixty_seconds() {
        assert_eq!(format_eta(Duration::from_secs(45)), "45s");
        assert_eq!(format_eta(Duration::from_secs(60)), "1m 0s");
        assert_eq!(format_eta(Duration::from_secs(192)), "3m 12s");
    }

    #[test]
    fn progress_bar_is_always_full_width() {
        assert_eq!(progress_bar(0).chars().count(), 10);
        assert_eq!(progress_bar(50).chars().count(), 10);
        assert_eq!(progress_bar(100), "██████████");
        assert_eq!(progress_bar(255), "██████████");
        assert_eq!(progress_bar(50), "█████░░░░░");
    }
}
