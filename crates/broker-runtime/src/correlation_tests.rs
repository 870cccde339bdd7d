//! Tests for task-scoped correlation identifiers.

use super::*;

#[tokio::test]
async fn current_is_none_outside_any_scope() {
    assert!(CorrelationId::current().is_none());
}

#[tokio::test]
async fn scope_binds_the_identifier_for_nested_calls() {
    let id: CorrelationId = "corr-42".parse().unwrap();

    let observed = id
        .clone()
        .scope(async {
            // A nested synchronous call sees the same value.
            fn nested() -> Option<CorrelationId> {
                CorrelationId::current()
            }
            nested()
        })
        .await;

    assert_eq!(observed, Some(id));
    assert!(CorrelationId::current().is_none());
}

#[tokio::test]
async fn sibling_tasks_never_observe_each_others_value() {
    let a: CorrelationId = "task-a".parse().unwrap();
    let b: CorrelationId = "task-b".parse().unwrap();

    let task_a = tokio::spawn(a.clone().scope(async { CorrelationId::current() }));
    let task_b = tokio::spawn(b.clone().scope(async { CorrelationId::current() }));

    assert_eq!(task_a.await.unwrap(), Some(a));
    assert_eq!(task_b.await.unwrap(), Some(b));
}

#[tokio::test]
async fn current_or_new_generates_without_storing() {
    let first = CorrelationId::current_or_new();
    let second = CorrelationId::current_or_new();

    // Each call outside a scope mints a fresh identifier.
    assert_ne!(first, second);
}

#[test]
fn empty_identifier_is_rejected() {
    let result = "".parse::<CorrelationId>();
    assert!(matches!(
        result,
        Err(ValidationError::Required { ref field }) if field == "correlation_id"
    ));
}
