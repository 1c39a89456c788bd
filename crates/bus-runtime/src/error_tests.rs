//! Tests for error types.

use super::*;

#[test]
fn test_error_transience() {
    assert!(QueueError::Timeout {
        duration: Duration::from_secs(5),
    }
    .is_transient());

    assert!(!QueueError::QueueNotFound {
        queue_name: "test".to_string(),
    }
    .is_transient());

    assert!(QueueError::ConnectionFailed {
        message: "network error".to_string(),
    }
    .is_transient());

    assert!(!QueueError::MessageTooLarge {
        size: 1000,
        max_size: 500
    }
    .is_transient());
}

#[test]
fn test_lost_lock_is_permanent() {
    let lost = QueueError::MessageNotFound {
        receipt: "msg-1/lock-1".to_string(),
    };

    assert!(!lost.is_transient());
}

#[test]
fn test_provider_error_carries_its_own_classification() {
    let throttled = QueueError::ProviderError {
        provider: "AzureServiceBus".to_string(),
        code: "429".to_string(),
        message: "server busy".to_string(),
        transient: true,
    };
    let rejected = QueueError::ProviderError {
        provider: "AzureServiceBus".to_string(),
        code: "400".to_string(),
        message: "bad request".to_string(),
        transient: false,
    };

    assert!(throttled.is_transient());
    assert!(!rejected.is_transient());
}

#[test]
fn test_configuration_errors_convert_and_are_permanent() {
    let error: QueueError = ConfigurationError::Missing {
        key: "SharedAccessKey".to_string(),
    }
    .into();

    assert!(!error.is_transient());
    assert_eq!(
        error.to_string(),
        "Configuration error: Missing required configuration: SharedAccessKey"
    );
}
