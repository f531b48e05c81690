//! Statistics printing.

use log::info;

use crate::error_handling::{PipelineEvent, PipelineStats};

/// Prints every non-zero pipeline counter to the log.
pub fn print_pipeline_statistics(stats: &PipelineStats) {
    let received = stats.get(PipelineEvent::Received);
    info!("Pipeline Counts ({} records received):", received);
    for (event, count) in stats.snapshot() {
        if count > 0 {
            info!("   {}: {}", event.as_str(), count);
        }
    }
}

/// Prints a one-line summary of the run.
pub fn print_simple_summary(stats: &PipelineStats, elapsed_seconds: f64) {
    let persisted = stats.get(PipelineEvent::Persisted);
    info!(
        "✅ Persisted {} record{} ({} not persisted) in {:.1}s",
        persisted,
        if persisted == 1 { "" } else { "s" },
        stats.total_lost(),
        elapsed_seconds
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_pipeline_statistics_empty() {
        let stats = PipelineStats::new();
        // Should not panic when nothing happened
        print_pipeline_statistics(&stats);
        print_simple_summary(&stats, 0.0);
    }

    #[test]
    fn test_print_pipeline_statistics_with_counts() {
        let stats = PipelineStats::new();
        stats.increment(PipelineEvent::Received);
        stats.increment(PipelineEvent::Persisted);
        stats.increment(PipelineEvent::Dropped);
        print_pipeline_statistics(&stats);
        print_simple_summary(&stats, 1.5);
    }
}
