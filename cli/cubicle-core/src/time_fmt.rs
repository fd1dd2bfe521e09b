use std::time::Duration;

/// Renders a duration as a coarse, human "N units ago" phrase, rounding to
/// the nearest minute/hour/day. `None` (no prior timestamp) renders as
/// `"N/A"`.
pub fn rel_time(duration: Option<Duration>) -> String {
    let mut secs = match duration {
        Some(d) => d.as_secs_f64(),
        None => return String::from("N/A"),
    };
    secs /= 60.0;
    if secs < 59.5 {
        return format!("{secs:.0} minutes");
    }
    secs /= 60.0;
    if secs < 23.5 {
        return format!("{secs:.0} hours");
    }
    secs /= 24.0;
    format!("{secs:.0} days")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Option<Duration> {
        Some(Duration::from_secs(n))
    }

    #[test]
    fn renders_none_as_na() {
        assert_eq!(rel_time(None), "N/A");
    }

    #[test]
    fn rounds_through_minutes_hours_days() {
        assert_eq!(rel_time(secs(0)), "0 minutes");
        assert_eq!(rel_time(secs(30)), "0 minutes");
        assert_eq!(rel_time(secs(31)), "1 minutes");
        assert_eq!(rel_time(secs(89)), "1 minutes");
        assert_eq!(rel_time(secs(90)), "2 minutes");
        assert_eq!(rel_time(secs(59 * 60 + 29)), "59 minutes");
        assert_eq!(rel_time(secs(59 * 60 + 30)), "1 hours");
        assert_eq!(rel_time(secs(23 * 60 * 60 + 29 * 60 + 59)), "23 hours");
        assert_eq!(rel_time(secs(23 * 60 * 60 + 30 * 60)), "1 days");
        assert_eq!(rel_time(secs(365 * 24 * 60 * 60)), "365 days");
    }
}
