use crate::error::{EvseError, Result};
use tracing::Level;

/// Parse a case-insensitive level name (`TRACE` .. `ERROR`).
pub fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.trim().to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(EvseError::config(format!(
            "Invalid log level: {}",
            level_str
        ))),
    }
}

pub fn level_rank(level: Level) -> u8 {
    match level {
        Level::TRACE => 0,
        Level::DEBUG => 1,
        Level::INFO => 2,
        Level::WARN => 3,
        Level::ERROR => 4,
    }
}

/// The more verbose of two levels.
pub fn min_level(a: Level, b: Level) -> Level {
    if level_rank(a) <= level_rank(b) { a } else { b }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("Warning").unwrap(), Level::WARN);
        assert_eq!(parse_log_level("ERROR").unwrap(), Level::ERROR);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn min_level_prefers_verbose() {
        assert_eq!(min_level(Level::INFO, Level::DEBUG), Level::DEBUG);
        assert_eq!(min_level(Level::ERROR, Level::WARN), Level::WARN);
    }
}
