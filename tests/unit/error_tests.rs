//! Error display text and conversions.

use agent_conduit::{AppError, CancelReason};

/// Every variant is prefixed with its category.
#[test]
fn display_prefixes_category() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Io("disk".into()), "io: disk"),
        (AppError::Transport("transport closed".into()), "transport: transport closed"),
        (AppError::Protocol("nope".into()), "protocol: nope"),
        (AppError::Spawn("enoent".into()), "spawn: enoent"),
        (AppError::Process("down".into()), "process: down"),
        (AppError::NotFound("profile x".into()), "not found: profile x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

/// Cancellation reasons render in plain words.
#[test]
fn cancel_reasons_render() {
    assert_eq!(
        AppError::Cancelled(CancelReason::SessionSwitched).to_string(),
        "cancelled: session switched"
    );
    assert_eq!(CancelReason::SessionDeleted.to_string(), "session deleted");
    assert_eq!(CancelReason::ClientShutdown.to_string(), "client shutdown");
    assert_eq!(CancelReason::TransportReplaced.to_string(), "transport replaced");
}

/// TOML errors become configuration errors.
#[test]
fn toml_error_converts_to_config() {
    let err: AppError = toml::from_str::<toml::Value>("= broken").unwrap_err().into();
    assert!(matches!(err, AppError::Config(ref m) if m.starts_with("invalid config")), "{err}");
}

/// JSON errors become transport errors.
#[test]
fn json_error_converts_to_transport() {
    let err: AppError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
    assert!(matches!(err, AppError::Transport(ref m) if m.starts_with("json")), "{err}");
}

/// I/O errors keep their message.
#[test]
fn io_error_converts_to_io() {
    let err: AppError =
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone").into();
    assert!(matches!(err, AppError::Io(ref m) if m == "pipe gone"), "{err}");
}
