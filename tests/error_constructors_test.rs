use evse_engine::error::{CommandError, EvseError};

#[test]
fn error_constructors_group_1() {
    assert!(matches!(EvseError::config("x"), EvseError::Config { .. }));
    assert!(matches!(EvseError::io("x"), EvseError::Io { .. }));
    assert!(matches!(
        EvseError::persistence("x"),
        EvseError::Persistence { .. }
    ));
    assert!(matches!(EvseError::timer("x"), EvseError::Timer { .. }));
}

#[test]
fn error_constructors_group_2() {
    assert!(matches!(
        EvseError::validation("f", "m"),
        EvseError::Validation { .. }
    ));
    assert!(matches!(EvseError::generic("x"), EvseError::Generic { .. }));
    let ser = EvseError::Serialization {
        message: "s".into(),
    };
    assert!(matches!(ser, EvseError::Serialization { .. }));
}

#[test]
fn command_status_converts() {
    let err: EvseError = CommandError::ConstraintError.into();
    assert!(matches!(
        err,
        EvseError::Command {
            status: CommandError::ConstraintError
        }
    ));
    assert_eq!(err.to_string(), "Command rejected: constraint error");
}

#[test]
fn foreign_errors_convert() {
    let io = std::io::Error::other("disk");
    assert!(matches!(EvseError::from(io), EvseError::Io { .. }));

    let json = serde_json::from_str::<u32>("nope").unwrap_err();
    assert!(matches!(
        EvseError::from(json),
        EvseError::Serialization { .. }
    ));

    let yaml = serde_yaml::from_str::<u32>("[").unwrap_err();
    assert!(matches!(
        EvseError::from(yaml),
        EvseError::Serialization { .. }
    ));
}

#[test]
fn display_includes_field() {
    let err = EvseError::validation("evse.clock_retry_secs", "Must be greater than 0");
    assert_eq!(
        err.to_string(),
        "Validation error: evse.clock_retry_secs - Must be greater than 0"
    );
}
