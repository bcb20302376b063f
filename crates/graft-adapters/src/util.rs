//! Small shared helpers: debug logging gate and string truncation.

use std::sync::atomic::{AtomicU8, Ordering};

const DEBUG_UNKNOWN: u8 = 0;
const DEBUG_ON: u8 = 1;
const DEBUG_OFF: u8 = 2;

static DEBUG_STDERR: AtomicU8 = AtomicU8::new(DEBUG_UNKNOWN);

/// Whether diagnostic stderr output is enabled (`GRAFT_DEBUG=1`).
/// Checked once; the result is cached for the process lifetime.
pub fn debug_stderr_enabled() -> bool {
    match DEBUG_STDERR.load(Ordering::Relaxed) {
        DEBUG_ON => true,
        DEBUG_OFF => false,
        _ => {
            let enabled = std::env::var("GRAFT_DEBUG")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            DEBUG_STDERR.store(
                if enabled { DEBUG_ON } else { DEBUG_OFF },
                Ordering::Relaxed,
            );
            enabled
        }
    }
}

/// Emit a diagnostic line when `GRAFT_DEBUG` is set.
pub fn debug_log(message: &str) {
    if debug_stderr_enabled() {
        eprintln!("  [graft] {}", message);
    }
}

/// Truncate to `max` characters, appending `...` when content was cut.
pub fn truncate_str(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate_str("short", 10), "short");
    }

    #[test]
    fn truncate_adds_ellipsis() {
        assert_eq!(truncate_str("a long string here", 9), "a long...");
    }

    #[test]
    fn truncate_handles_tiny_budgets() {
        assert_eq!(truncate_str("abcdef", 2), "ab");
        assert_eq!(truncate_str("abcdef", 0), "");
    }
}
