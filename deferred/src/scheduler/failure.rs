//! Where payload failures go

use tracing::warn;

use crate::error::PayloadFailure;

/// Receives failures from payloads run by the worker
///
/// Called on the worker thread with no scheduler lock held. A slow sink delays
/// the next firing, so implementations should hand off rather than block.
pub trait FailureSink: Send + Sync {
    fn report(&self, failure: PayloadFailure);
}

/// Default sink: log and move on
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailureSink;

impl FailureSink for LogFailureSink {
    fn report(&self, failure: PayloadFailure) {
        warn!(
            task = %failure.task,
            name = %failure.name,
            scheduled_at = %failure.scheduled_at,
            kind = %failure.kind,
            "Scheduled task failed"
        );
    }
}

impl<F> FailureSink for F
where
    F: Fn(PayloadFailure) + Send + Sync,
{
    fn report(&self, failure: PayloadFailure) {
        self(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::error::FailureKind;
    use crate::task::TaskId;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_closure_sink_receives_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |failure: PayloadFailure| seen.lock().push(failure.name)
        };

        sink.report(PayloadFailure {
            task: TaskId::new(),
            name: "nightly".to_string(),
            scheduled_at: Timestamp::ZERO,
            kind: FailureKind::Error("disk full".to_string()),
        });

        assert_eq!(*seen.lock(), vec!["nightly".to_string()]);
    }

    #[test]
    fn test_log_sink_does_not_panic() {
        LogFailureSink.report(PayloadFailure {
            task: TaskId::new(),
            name: "quiet".to_string(),
            scheduled_at: Timestamp::ZERO,
            kind: FailureKind::Panic("oops".to_string()),
        });
    }
}
