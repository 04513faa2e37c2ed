//! Duration formatting matching the status-snapshot schema.

/// Format a duration as `Dd:HHh:MMm:SSs`, rounding fractional seconds half-up.
pub fn format_duration(duration: std::time::Duration) -> String {
    let total_seconds = (duration.as_secs_f64()).round() as u64;
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;
    format!("{}d:{:02}h:{:02}m:{:02}s", days, hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn formats_zero() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0d:00h:00m:00s");
    }

    #[test]
    fn formats_mixed_units() {
        // 1 day, 2 hours, 3 minutes, 4 seconds.
        let secs = 86_400 + 2 * 3_600 + 3 * 60 + 4;
        assert_eq!(format_duration(Duration::from_secs(secs)), "1d:02h:03m:04s");
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(format_duration(Duration::from_millis(59_600)), "0d:00h:01m:00s");
    }
}
