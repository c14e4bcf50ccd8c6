use super::error::{ConnectStage, ExhaustReason, PublishError, ReconnectExhausted};
use super::logging;
use std::time::Duration;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warning");
    logging::init("nonsense");
}

#[test]
fn test_exhausted_display_carries_attempts() {
    let err = ReconnectExhausted {
        reason: ExhaustReason::Timeout,
        attempts: 3,
        last_error: "connection refused".to_string(),
        retry_timeout: Duration::from_secs(10),
        retry_delay: Duration::from_secs(2),
    };
    let text = err.to_string();
    assert!(text.contains("reconnect timeout"));
    assert!(text.contains("3 attempt"));
}

#[test]
fn test_publish_error_messages() {
    let err = PublishError::connect(ConnectStage::ConfirmSelect, "not supported");
    assert_eq!(
        err.to_string(),
        "AMQP connect failed at confirm-select stage: not supported"
    );

    let err: PublishError = serde_json::from_str::<serde_json::Value>("{oops")
        .unwrap_err()
        .into();
    assert!(matches!(err, PublishError::Serialize(_)));
}
