pub mod time;

pub use time::{Clock, LatencyTimer, ManualClock, SystemClock};

/// Renders a TTL for log lines.
pub fn format_ttl(ttl: Option<std::time::Duration>) -> String {
    match ttl {
        Some(ttl) => format!("{:?}", ttl),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_ttl() {
        assert_eq!(format_ttl(None), "none");
        assert_eq!(format_ttl(Some(Duration::from_millis(10))), "10ms");
    }
}
