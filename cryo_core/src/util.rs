//! Naming helpers shared by state snapshots and telemetry.

/// Key used for a (device, channel) pair in maps exposed to operators.
#[inline]
pub fn series_key(device: &str, channel: &str) -> String {
    format!("{device}::{channel}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_join_with_double_colon() {
        assert_eq!(series_key("Lakeshore372", "still"), "Lakeshore372::still");
    }
}
