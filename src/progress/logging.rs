//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted {
                file,
                units,
                batches,
                ..
            } => {
                info!(file = %file, units, batches, "Starting analysis");
            }
            ProgressEvent::UnitApplied {
                file,
                unit_id,
                batch_id,
                degraded,
                ..
            } => {
                debug!(
                    file = %file,
                    unit_id = %unit_id,
                    batch_id = %batch_id,
                    degraded,
                    "Unit applied"
                );
            }
            ProgressEvent::BatchApplied {
                file,
                batch_id,
                units,
                degraded,
                ..
            } => {
                if *degraded {
                    warn!(file = %file, batch_id = %batch_id, units, "Batch applied degraded");
                } else {
                    debug!(file = %file, batch_id = %batch_id, units, "Batch applied");
                }
            }
            ProgressEvent::AggregateFinalized {
                file,
                key,
                name,
                success,
                ..
            } => {
                if *success {
                    info!(file = %file, aggregate = %key, name = %name, "Aggregate summarized");
                } else {
                    warn!(file = %file, aggregate = %key, name = %name, "Aggregate left without summary");
                }
            }
            ProgressEvent::RunCompleted {
                file,
                applied_batches,
                degraded_batches,
                duration,
                ..
            } => {
                info!(
                    file = %file,
                    applied_batches,
                    degraded_batches,
                    duration_ms = duration.as_millis() as u64,
                    "Analysis complete"
                );
            }
            ProgressEvent::RunFailed { file, error, .. } => {
                warn!(file = %file, error = %error, "Analysis failed");
            }
        }
    }
}
