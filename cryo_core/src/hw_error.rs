//! Maps `Box<dyn Error>` from trait boundaries to a typed `CommandError`.
//!
//! The traits in `cryo_traits` use `Box<dyn Error + Send + Sync>`; this module
//! classifies those as transient or configuration failures, with an optional
//! feature-gated path for `cryo_hardware::HwError` downcasting.

use crate::error::CommandError;

/// Map a trait-boundary error to a typed `CommandError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics. Unrecognized driver errors count as transient.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> CommandError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<cryo_hardware::error::HwError>() {
            return if hw.is_transient() {
                CommandError::Transient(hw.to_string())
            } else {
                CommandError::Configuration(hw.to_string())
            };
        }
    }

    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("unknown channel") || lower.contains("out of range") {
        CommandError::Configuration(s)
    } else {
        CommandError::Transient(s)
    }
}

/// Convenience for `map_err` on driver results.
pub(crate) fn boxed(e: Box<dyn std::error::Error + Send + Sync>) -> CommandError {
    map_hw_error(e.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_io_errors_are_transient() {
        let e = std::io::Error::other("serial port hiccup");
        assert!(map_hw_error(&e).is_transient());
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn hw_errors_classify_by_kind() {
        use cryo_hardware::error::HwError;
        assert!(map_hw_error(&HwError::Timeout).is_transient());
        let unknown = HwError::UnknownChannel {
            device: "CTC100A".into(),
            channel: "nope".into(),
        };
        assert!(matches!(
            map_hw_error(&unknown),
            CommandError::Configuration(_)
        ));
    }
}
