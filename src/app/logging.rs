//! Progress logging utilities.

use log::info;

use crate::error_handling::{PipelineEvent, PipelineStats};

/// Logs how many records were persisted so far and the overall rate.
pub fn log_progress(start_time: std::time::Instant, stats: &PipelineStats) {
    let elapsed_secs = start_time.elapsed().as_secs_f64();
    let persisted = stats.get(PipelineEvent::Persisted);
    let rate = if elapsed_secs > 0.0 {
        persisted as f64 / elapsed_secs
    } else {
        0.0
    };
    info!(
        "Persisted {} of {} received records in {:.2} seconds (~{:.2} records/sec)",
        persisted,
        stats.get(PipelineEvent::Received),
        elapsed_secs,
        rate
    );
}
