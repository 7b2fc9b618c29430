//! End-to-end exercise of the subsystem facade: ingest dedup, alerting
//! with cooldown, live stream delivery, and the query surface.

use std::time::Duration;

use anyhow::Result;
use error_monitor_rs::{ErrorMonitor, LogEvent, LogLevel, LogQuery, MonitorConfig, Severity};

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        batch_size: 1,
        batch_delay: Duration::from_millis(20),
        ..Default::default()
    }
}

async fn wait_for_records(monitor: &ErrorMonitor, expected: u64) -> Result<u64> {
    let mut total = 0;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        total = monitor.store().query(&LogQuery::default()).await?.total;
        if total >= expected {
            break;
        }
    }
    Ok(total)
}

#[test_log::test(tokio::test)]
async fn test_repeated_failures_merge_into_one_record() -> Result<()> {
    let monitor = ErrorMonitor::start(fast_config()).await?;

    for _ in 0..3 {
        monitor.submit(
            LogEvent::new(LogLevel::Error, "connection refused by catalog-db")
                .endpoint("/api/catalog"),
        );
    }

    assert_eq!(wait_for_records(&monitor, 1).await?, 1);

    // poll until all three occurrences have been merged
    let mut occurrences = 0;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let page = monitor.store().query(&LogQuery::default()).await?;
        occurrences = page.records[0].occurrence_count;
        if occurrences == 3 {
            break;
        }
    }
    assert_eq!(occurrences, 3);

    let stats = monitor.store().stats().await?;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.unique_fingerprints, 1);
    assert_eq!(stats.critical_count, 1);

    monitor.shutdown().await;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_capture_alerts_and_persists() -> Result<()> {
    let monitor = ErrorMonitor::start(fast_config()).await?;
    let mut handle = monitor.subscribe();

    let event = LogEvent::new(LogLevel::Error, "token expired for integration sync");
    let notification = monitor.capture(event.clone()).expect("first alert");
    assert_eq!(notification.severity, Severity::Critical);

    // identical failure inside the cooldown window is suppressed
    assert!(monitor.capture(event).is_none());

    let line = handle.next_frame().await.expect("stream frame");
    let frame: serde_json::Value = serde_json::from_str(line.trim_end())?;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["message"], "token expired for integration sync");

    // both occurrences still reach the analytics record
    assert_eq!(wait_for_records(&monitor, 1).await?, 1);

    monitor.shutdown().await;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_acknowledgment_reaches_subscribers() -> Result<()> {
    let monitor = ErrorMonitor::start(fast_config()).await?;

    let notification = monitor
        .capture(LogEvent::new(LogLevel::Error, "connection refused"))
        .expect("alert");

    let mut handle = monitor.subscribe();
    // late attach replays the active critical alert
    let replay = handle.next_frame().await.expect("replayed frame");
    let frame: serde_json::Value = serde_json::from_str(replay.trim_end())?;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["id"], notification.id.to_string());

    assert!(monitor.acknowledge(notification.id));
    let line = handle.next_frame().await.expect("acknowledgment frame");
    let frame: serde_json::Value = serde_json::from_str(line.trim_end())?;
    assert_eq!(frame["type"], "acknowledgment");
    assert_eq!(frame["acknowledgedIds"][0], notification.id.to_string());

    // detached subscribers stop receiving
    assert!(monitor.detach(handle.id()));
    assert_eq!(monitor.broker().registry().count(), 0);

    monitor.shutdown().await;
    Ok(())
}
