//! A termination signal stops a running pipeline cleanly.
//!
//! Kept in its own test binary: the termination flag is process-wide and
//! stays set once a signal was recorded.

mod helpers;

use std::path::Path;
use std::thread;
use std::time::Duration;

use site_metrics_sink::error_handling::PipelineEvent;
use site_metrics_sink::signals::Signal;
use site_metrics_sink::stream::{MemoryTopic, MEMORY_CONSUMER};
use site_metrics_sink::{Orchestrator, ShutdownReason};
use tempfile::TempDir;

use helpers::{fast_timings, read_back, sample_record, test_config, wait_until};

#[test]
fn test_sigterm_triggers_teardown() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("metrics.db");
    let topic = MemoryTopic::named("it-sigterm");
    for n in 0..8 {
        topic.publish(0, &sample_record(n, 200)).unwrap();
    }

    let orchestrator = Orchestrator::new(test_config(MEMORY_CONSUMER, "it-sigterm", &db_path))
        .with_timings(fast_timings());
    let stats = orchestrator.stats();
    let sender = thread::spawn(move || {
        wait_until(Duration::from_secs(10), || {
            stats.get(PipelineEvent::Persisted) >= 8
        });
        unsafe {
            libc::raise(libc::SIGTERM);
        }
    });

    let report = orchestrator.run().expect("pipeline run failed");
    sender.join().unwrap();

    assert_eq!(report.reason, ShutdownReason::Signal(Signal::Terminate));
    assert_eq!(report.persisted, 8);
    assert_eq!(report.deferred_signal, None);
    assert_eq!(topic.disconnect_count(), 1);
    assert_db_has(&db_path, 8);
}

fn assert_db_has(db_path: &Path, metrics: i64) {
    let (websites, count) = read_back(db_path);
    assert_eq!(websites.len() as i64, metrics);
    assert_eq!(count, metrics);
}
