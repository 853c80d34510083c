/// Adaptive Throughput Tests
///
/// Scale-up, retry, activation wait and deferred scale-down, all on virtual time.
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};

mod helpers;
use helpers::*;

fn resources() -> Vec<Resource> {
    vec![
        Resource::Table,
        Resource::Index("gsi1".to_string()),
        Resource::Index("gsi2".to_string()),
    ]
}

fn writes(values: &[i64]) -> Vec<ProvisionedCapacity> {
    values.iter().map(|&w| ProvisionedCapacity::new(5, w)).collect()
}

/// Three throttled writes raise write capacity to 10, 20 and 40; the fourth attempt succeeds
#[tokio::test(start_paused = true)]
async fn test_write_capacity_doubles_until_success() {
    let backend = backend();
    let config = ScalingConfig {
        max_write_capacity: 50,
        ..Default::default()
    };
    let table = table_with_config(&backend, config);
    backend
        .fail_next(Operation::PointWrite, [throttled(), throttled(), throttled()])
        .await;

    let result = table.put(profile_item(&unique_partition("USER"), "Ada"), false).await;

    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(result.attempts, 4);
    assert_eq!(result.retry_delay, Duration::from_millis(500 + 1_000 + 2_000));
    assert_eq!(backend.calls(Operation::PointWrite).await, 4);

    let updates = backend.capacity_updates().await;
    assert_eq!(updates.len(), 9);
    for resource in resources() {
        assert_eq!(updates_for(&updates, &resource), writes(&[10, 20, 40]));
    }
}

/// Throttling that never stops surfaces the original error after max_retries + 1 attempts
#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_return_capacity_error() {
    let backend = backend();
    let table = table(&backend);
    backend.fail_always(Operation::PointWrite, throttled()).await;

    let result = table.put(profile_item(&unique_partition("USER"), "Ada"), false).await;

    assert_eq!(result.error(), Some(&throttled()));
    assert_eq!(result.attempts, 4);
    assert_eq!(result.status_code(), Some(503));
    assert_eq!(backend.calls(Operation::PointWrite).await, 4);
    assert_eq!(
        updates_for(&backend.capacity_updates().await, &Resource::Table),
        writes(&[10, 20, 40])
    );

    // A failed invocation owes no scale-down
    sleep(Duration::from_secs(3600)).await;
    assert_eq!(backend.capacity_updates().await.len(), 9);
}

/// Errors other than capacity errors are never retried
#[tokio::test(start_paused = true)]
async fn test_non_capacity_error_is_not_retried() {
    let backend = backend();
    let table = table(&backend);
    backend
        .fail_next(Operation::PointRead, [backend_failure()])
        .await;

    let result = table.get::<Profile>(&unique_partition("USER"), "PROFILE").await;

    assert!(matches!(result.error(), Some(Error::Transport { .. })));
    assert_eq!(result.attempts, 1);
    assert_eq!(result.retry_delay, Duration::ZERO);
    assert!(backend.capacity_updates().await.is_empty());
}

/// A failing capacity update ends the invocation with ScalingFailed
#[tokio::test(start_paused = true)]
async fn test_failed_scale_up_is_scaling_failed() {
    let backend = backend();
    let table = table(&backend);
    backend.fail_next(Operation::PointWrite, [throttled()]).await;
    backend
        .fail_next(Operation::UpdateCapacity, [backend_failure()])
        .await;

    let result = table.put(profile_item(&unique_partition("USER"), "Ada"), false).await;

    assert!(matches!(result.error(), Some(Error::ScalingFailed { .. })));
    assert_eq!(result.attempts, 1);
    assert_eq!(result.status_code(), Some(500));
    assert_eq!(backend.calls(Operation::PointWrite).await, 1);
    assert!(backend.is_empty().await);
}

/// A capacity change that never becomes active ends with ActivationTimeout
#[tokio::test(start_paused = true)]
async fn test_activation_timeout() {
    let backend = backend().with_activation_polls(u32::MAX);
    let config = ScalingConfig {
        activation_poll_interval: Duration::from_secs(1),
        max_activation_wait: Duration::from_secs(10),
        ..Default::default()
    };
    let table = table_with_config(&backend, config);
    backend.fail_next(Operation::PointWrite, [throttled()]).await;

    let result = table.put(profile_item(&unique_partition("USER"), "Ada"), false).await;

    assert_eq!(
        result.error(),
        Some(&Error::ActivationTimeout {
            waited: Duration::from_secs(10)
        })
    );
    assert_eq!(result.attempts, 1);
    assert_eq!(result.report().error.unwrap().code, "ACTIVATION_TIMEOUT");
}

/// The retry waits until every raised resource reports active
#[tokio::test(start_paused = true)]
async fn test_retry_waits_for_active_capacity() {
    let backend = backend().with_activation_polls(2);
    let table = table(&backend);
    backend.fail_next(Operation::PointWrite, [throttled()]).await;

    let started = Instant::now();
    let result = table.put(profile_item(&unique_partition("USER"), "Ada"), false).await;

    assert!(result.is_success());
    assert_eq!(result.attempts, 2);
    assert!(started.elapsed() >= Duration::from_secs(4));

    let capacities = table.capacity().await.unwrap();
    assert_eq!(capacities.len(), 3);
    assert!(capacities.iter().all(|c| c.is_active()));
    assert!(
        capacities
            .iter()
            .all(|c| c.capacity == ProvisionedCapacity::new(5, 10))
    );
}

/// One scaled success schedules exactly one scale-down after the cool-off
#[tokio::test(start_paused = true)]
async fn test_single_scale_down_after_cool_off() {
    let backend = backend();
    let table = table(&backend);
    backend.fail_next(Operation::PointWrite, [throttled()]).await;

    let result = table.put(profile_item(&unique_partition("USER"), "Ada"), false).await;
    assert!(result.is_success());
    assert_eq!(backend.capacity_updates().await.len(), 3);

    sleep(Duration::from_secs(299)).await;
    assert_eq!(backend.capacity_updates().await.len(), 3, "cool-off not over yet");

    sleep(Duration::from_secs(2)).await;
    let updates = backend.capacity_updates().await;
    assert_eq!(updates.len(), 6);
    for resource in resources() {
        assert_eq!(updates_for(&updates, &resource), writes(&[10, 5]));
    }

    sleep(Duration::from_secs(3600)).await;
    assert_eq!(backend.capacity_updates().await.len(), 6);
}

/// A caller that times out while capacity activates still gets it lowered
#[tokio::test(start_paused = true)]
async fn test_scale_down_survives_caller_timeout() {
    let backend = backend().with_activation_polls(2);
    let table = table(&backend);
    backend.fail_next(Operation::PointWrite, [throttled()]).await;

    let outcome = timeout(
        Duration::from_secs(3),
        table.put(profile_item(&unique_partition("USER"), "Ada"), false),
    )
    .await;

    assert!(outcome.is_err(), "capacity should still be activating");
    assert_eq!(backend.calls(Operation::PointWrite).await, 1);
    assert_eq!(backend.capacity_updates().await.len(), 3);

    sleep(Duration::from_secs(3600)).await;
    let updates = backend.capacity_updates().await;
    for resource in resources() {
        assert_eq!(updates_for(&updates, &resource), writes(&[10, 5]));
    }
}

/// The scale-down does nothing when capacity was already reset to base
#[tokio::test(start_paused = true)]
async fn test_scale_down_is_noop_after_external_reset() {
    let backend = backend();
    let table = table(&backend);
    backend.fail_next(Operation::PointWrite, [throttled()]).await;

    let result = table.put(profile_item(&unique_partition("USER"), "Ada"), false).await;
    assert!(result.is_success());

    for resource in resources() {
        backend
            .set_capacity(resource, ProvisionedCapacity::new(5, 5))
            .await;
    }
    let describes_before = backend.calls(Operation::DescribeCapacity).await;

    sleep(Duration::from_secs(301)).await;

    assert_eq!(backend.capacity_updates().await.len(), 3);
    assert_eq!(
        backend.calls(Operation::DescribeCapacity).await,
        describes_before + 3,
        "scale-down re-reads every raised resource"
    );
}

/// A scale-down never undoes a later, higher scale-up
#[tokio::test(start_paused = true)]
async fn test_scale_down_keeps_later_scale_up() {
    let backend = backend();
    let table = table(&backend);

    backend.fail_next(Operation::PointWrite, [throttled()]).await;
    let first = table.put(profile_item(&unique_partition("USER"), "Ada"), false).await;
    assert!(first.is_success());

    sleep(Duration::from_secs(100)).await;
    backend
        .fail_next(Operation::PointWrite, [throttled(), throttled()])
        .await;
    let second = table.put(profile_item(&unique_partition("USER"), "Grace"), false).await;
    assert!(second.is_success());

    // The first scale-down is due here and must leave 40 alone
    sleep(Duration::from_secs(250)).await;
    let updates = backend.capacity_updates().await;
    assert_eq!(updates.len(), 9);
    assert_eq!(
        updates_for(&updates, &Resource::Table),
        writes(&[10, 20, 40])
    );

    // The second scale-down owns 40 and lowers it
    sleep(Duration::from_secs(100)).await;
    let updates = backend.capacity_updates().await;
    assert_eq!(
        updates_for(&updates, &Resource::Table),
        writes(&[10, 20, 40, 5])
    );
}

/// A failing scale-down is dropped without affecting anything else
#[tokio::test(start_paused = true)]
async fn test_failed_scale_down_is_discarded() {
    let backend = backend();
    let table = table(&backend);
    backend.fail_next(Operation::PointWrite, [throttled()]).await;

    let result = table.put(profile_item(&unique_partition("USER"), "Ada"), false).await;
    assert!(result.is_success());

    backend
        .fail_always(Operation::DescribeCapacity, backend_failure())
        .await;
    sleep(Duration::from_secs(301)).await;

    assert_eq!(backend.capacity_updates().await.len(), 3);

    backend.clear_faults().await;
    let got = table
        .get::<Profile>(&result.value().unwrap().partition_key, "PROFILE")
        .await;
    assert!(got.into_result().unwrap().is_some());
}

/// Per-call overrides replace the process configuration
#[tokio::test(start_paused = true)]
async fn test_per_call_overrides() {
    let backend = backend();
    let table = table(&backend);
    let no_retries = table.with_overrides(ScalingOverrides {
        max_retries: Some(0),
        ..Default::default()
    });
    backend.fail_next(Operation::PointWrite, [throttled()]).await;

    let result = no_retries
        .put(profile_item(&unique_partition("USER"), "Ada"), false)
        .await;

    assert_eq!(result.error(), Some(&throttled()));
    assert_eq!(result.attempts, 1);
    assert!(backend.capacity_updates().await.is_empty());
}

/// Read throttling raises read capacity only
#[tokio::test(start_paused = true)]
async fn test_read_throttling_raises_read_capacity() {
    let backend = backend();
    let table = table(&backend);
    backend.fail_next(Operation::PointRead, [throttled()]).await;

    let result = table.get::<Profile>(&unique_partition("USER"), "PROFILE").await;

    assert!(result.is_success());
    assert_eq!(result.attempts, 2);
    for update in backend.capacity_updates().await {
        assert_eq!(update.capacity, ProvisionedCapacity::new(10, 5));
    }
}
