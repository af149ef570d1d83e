//! Line-oriented simulation scripts for `evse-sim`
//!
//! One command per line; blank lines and `#` comments are skipped.
//!
//! ```text
//! enable-charging +3600 6000 16000
//! plug
//! demand
//! meter charging 1500
//! no-demand
//! unplug
//! ```

use crate::error::{EvseError, Result};
use crate::evse::{FaultState, MeterKind};

/// An enable-until argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UntilArg {
    /// `null`: no deadline
    Indefinite,
    /// Absolute epoch seconds
    At(u32),
    /// `+N`: N seconds from when the line runs
    In(u32),
}

impl UntilArg {
    /// Resolve against the current time; relative values need a synced clock
    pub fn resolve(self, now: Option<u32>) -> Result<Option<u32>> {
        match self {
            UntilArg::Indefinite => Ok(None),
            UntilArg::At(at) => Ok(Some(at)),
            UntilArg::In(secs) => now
                .map(|now| Some(now.saturating_add(secs)))
                .ok_or_else(|| EvseError::generic("clock not synchronized for relative time")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCommand {
    Plug,
    Demand,
    NoDemand,
    Unplug,
    EnableCharging {
        until: UntilArg,
        minimum: i64,
        maximum: i64,
    },
    EnableDischarging {
        until: UntilArg,
        maximum: i64,
    },
    Disable,
    Fault(FaultState),
    ClearFault,
    Diagnostics,
    DiagnosticsComplete,
    Meter {
        meter: MeterKind,
        value: i64,
    },
    Sleep(f64),
    Status,
}

fn arg<'a>(parts: &[&'a str], index: usize, name: &str) -> Result<&'a str> {
    parts
        .get(index)
        .copied()
        .ok_or_else(|| EvseError::validation(name, "missing argument"))
}

fn number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| EvseError::validation(name.to_string(), format!("invalid number '{}'", value)))
}

fn until(value: &str) -> Result<UntilArg> {
    if value.eq_ignore_ascii_case("null") {
        return Ok(UntilArg::Indefinite);
    }
    match value.strip_prefix('+') {
        Some(relative) => Ok(UntilArg::In(number(relative, "until")?)),
        None => Ok(UntilArg::At(number(value, "until")?)),
    }
}

/// Parse one script line. `Ok(None)` for blank lines and comments.
pub fn parse_line(line: &str) -> Result<Option<ScriptCommand>> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(None);
    }
    let parts: Vec<&str> = line.split_whitespace().collect();

    let command = match parts[0] {
        "plug" => ScriptCommand::Plug,
        "demand" => ScriptCommand::Demand,
        "no-demand" => ScriptCommand::NoDemand,
        "unplug" => ScriptCommand::Unplug,
        "enable-charging" => ScriptCommand::EnableCharging {
            until: until(arg(&parts, 1, "until")?)?,
            minimum: number(arg(&parts, 2, "minimum")?, "minimum")?,
            maximum: number(arg(&parts, 3, "maximum")?, "maximum")?,
        },
        "enable-discharging" => ScriptCommand::EnableDischarging {
            until: until(arg(&parts, 1, "until")?)?,
            maximum: number(arg(&parts, 2, "maximum")?, "maximum")?,
        },
        "disable" => ScriptCommand::Disable,
        "fault" => {
            let kind = arg(&parts, 1, "fault")?;
            ScriptCommand::Fault(
                kind.parse::<FaultState>()
                    .map_err(|e| EvseError::validation("fault".to_string(), e))?,
            )
        }
        "clear-fault" => ScriptCommand::ClearFault,
        "diagnostics" => ScriptCommand::Diagnostics,
        "diagnostics-complete" => ScriptCommand::DiagnosticsComplete,
        "meter" => {
            let meter = match arg(&parts, 1, "meter")? {
                "charging" | "import" => MeterKind::Charging,
                "discharging" | "export" => MeterKind::Discharging,
                other => {
                    return Err(EvseError::validation(
                        "meter".to_string(),
                        format!("unknown meter '{}'", other),
                    ));
                }
            };
            ScriptCommand::Meter {
                meter,
                value: number(arg(&parts, 2, "value")?, "value")?,
            }
        }
        "sleep" => {
            let secs: f64 = number(arg(&parts, 1, "secs")?, "secs")?;
            if !secs.is_finite() || secs < 0.0 {
                return Err(EvseError::validation("secs", "must be a non-negative number"));
            }
            ScriptCommand::Sleep(secs)
        }
        "status" => ScriptCommand::Status,
        other => {
            return Err(EvseError::validation(
                "command".to_string(),
                format!("unknown command '{}'", other),
            ));
        }
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   # setup").unwrap(), None);
        assert_eq!(
            parse_line("plug  # cable in").unwrap(),
            Some(ScriptCommand::Plug)
        );
    }

    #[test]
    fn enable_charging_arguments() {
        assert_eq!(
            parse_line("enable-charging null 6000 16000").unwrap(),
            Some(ScriptCommand::EnableCharging {
                until: UntilArg::Indefinite,
                minimum: 6_000,
                maximum: 16_000,
            })
        );
        assert_eq!(
            parse_line("enable-charging +60 6000 16000").unwrap(),
            Some(ScriptCommand::EnableCharging {
                until: UntilArg::In(60),
                minimum: 6_000,
                maximum: 16_000,
            })
        );
        assert!(parse_line("enable-charging 5 6000").is_err());
    }

    #[test]
    fn fault_kinds_parse() {
        assert_eq!(
            parse_line("fault ground-fault").unwrap(),
            Some(ScriptCommand::Fault(FaultState::GroundFault))
        );
        assert!(parse_line("fault lightning").is_err());
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(parse_line("launch").is_err());
        assert!(parse_line("sleep -1").is_err());
    }

    #[test]
    fn relative_until_needs_clock() {
        assert_eq!(UntilArg::In(30).resolve(Some(100)).unwrap(), Some(130));
        assert!(UntilArg::In(30).resolve(None).is_err());
        assert_eq!(UntilArg::Indefinite.resolve(None).unwrap(), None);
    }
}
