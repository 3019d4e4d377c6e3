use std::time::Duration;

/// Tracks how long the monitor has been producing readings. Times are monotonic stamps from
/// `Clock::monotonic`, so wall-clock corrections do not disturb the count.
#[derive(Debug, Default, Clone)]
pub struct SessionClock {
    start_time: Option<Duration>,
}

impl SessionClock {
    pub fn start_time(&self) -> Option<Duration> {
        self.start_time
    }

    /// Whole seconds since the first call. The first call starts the session.
    pub fn elapsed_secs(&mut self, now: Duration) -> u64 {
        let start = *self.start_time.get_or_insert(now);
        now.saturating_sub(start).as_secs()
    }

    pub fn elapsed(&mut self, now: Duration) -> String {
        format_elapsed(self.elapsed_secs(now))
    }
}

/// Renders a duration using only as many units as it needs.
pub fn format_elapsed(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = total_secs % 86_400 / 3_600;
    let minutes = total_secs % 3_600 / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        let unit = if days == 1 { "day" } else { "days" };
        format!("{} {} {:02}:{:02}:{:02}", days, unit, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{:02}:{:02}", minutes, seconds)
    } else {
        format!("{} sec.", seconds)
    }
}
