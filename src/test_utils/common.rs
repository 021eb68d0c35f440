use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;

use crate::Record;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

/// Object literal to [`Record`]
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object literal, got {}", other),
    }
}

pub fn insert_frame(after: Value) -> Value {
    serde_json::json!({"op": "i", "payload": {"after": after}})
}

pub fn delete_frame(before: Value) -> Value {
    serde_json::json!({"op": "d", "payload": {"before": before}})
}

pub fn update_frame(
    before: Value,
    after: Value,
) -> Value {
    serde_json::json!({"op": "u", "payload": {"before": before, "after": after}})
}

pub fn reload_frame(after: Value) -> Value {
    serde_json::json!({"op": "r", "payload": {"after": after}})
}

/// Waits until `rx` holds a value satisfying `pred`, failing after 2 seconds.
pub async fn wait_for<T, F>(
    rx: &mut watch::Receiver<T>,
    pred: F,
) -> T
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            {
                let current = rx.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            if rx.changed().await.is_err() {
                let current = rx.borrow();
                assert!(pred(&current), "watch closed before the condition held");
                return current.clone();
            }
        }
    })
    .await;
    match result {
        Ok(value) => value,
        Err(_) => panic!("condition not reached in time"),
    }
}

/// Lets spawned tasks on the current-thread runtime run to quiescence
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
