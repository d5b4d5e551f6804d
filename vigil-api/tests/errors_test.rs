use std::error::Error;
use std::time::Duration;

use anyhow::anyhow;
use vigil_api::errors::TargetError;
use vigil_api::TargetResult;

#[test]
fn test_failed_error() {
    let error = TargetError::Failed("dns lookup refused".to_string());

    assert_eq!(error.to_string(), "Target failed: dns lookup refused");
    assert!(error.source().is_none());
}

#[test]
fn test_invalid_input_error() {
    let error = TargetError::InvalidInput("empty subject".to_string());
    assert_eq!(error.to_string(), "Invalid input: empty subject");
}

#[test]
fn test_timeout_error() {
    let error = TargetError::Timeout(Duration::from_secs(3));
    assert_eq!(error.to_string(), "Target timed out after 3s");
}

#[test]
fn test_panicked_error() {
    let error = TargetError::Panicked("index out of bounds".to_string());
    assert_eq!(error.to_string(), "Target panicked: index out of bounds");
}

#[test]
fn test_other_error_is_transparent() {
    let error: TargetError = anyhow!("whois server unreachable").into();

    // Transparent: display comes straight from the wrapped error
    assert_eq!(error.to_string(), "whois server unreachable");
    assert!(matches!(error, TargetError::Other(_)));
}

#[test]
fn test_question_mark_conversion() {
    fn lookup() -> TargetResult<u32> {
        let parsed: u32 = "not-a-number".parse().map_err(anyhow::Error::from)?;
        Ok(parsed)
    }

    let error = lookup().unwrap_err();
    assert!(matches!(error, TargetError::Other(_)));
    assert!(error.to_string().contains("invalid digit"));
}
