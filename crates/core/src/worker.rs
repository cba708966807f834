//! Deadline-bounded calls into plugin code
//!
//! Recognizers and fallback fillers are untrusted, variable-latency code
//! that cannot be asked to cooperate with cancellation. Each call runs on
//! its own thread and reports over a one-slot channel; the supervisor waits
//! up to the deadline and then walks away. An abandoned thread finishes in
//! the background and its late result is dropped.

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// How a supervised call ended
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Failed(anyhow::Error),
    TimedOut,
}

/// Run `job` on a worker thread and wait at most `timeout` for its result.
///
/// A panic inside `job` drops the sender and is reported as `Failed`.
pub fn run_with_deadline<T, F>(label: &str, timeout: Duration, job: F) -> Outcome<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = bounded(1);

    let spawned = thread::Builder::new()
        .name(format!("intent-{}", label))
        .spawn(move || {
            // The receiver is gone once the supervisor gave up; nothing to report to
            let _ = tx.send(job());
        });

    if let Err(e) = spawned {
        return Outcome::Failed(anyhow!("failed to spawn worker for {}: {}", label, e));
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(value)) => Outcome::Completed(value),
        Ok(Err(e)) => Outcome::Failed(e),
        Err(RecvTimeoutError::Timeout) => Outcome::TimedOut,
        Err(RecvTimeoutError::Disconnected) => Outcome::Failed(anyhow!("worker for {} panicked", label)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_completed() {
        match run_with_deadline("ok", Duration::from_secs(1), || Ok(42)) {
            Outcome::Completed(v) => assert_eq!(v, 42),
            other => panic!("Expected Completed, got {:?}", other),
        }
    }

    #[test]
    fn test_error_is_failed() {
        let outcome: Outcome<()> = run_with_deadline("err", Duration::from_secs(1), || Err(anyhow!("boom")));
        match outcome {
            Outcome::Failed(e) => assert!(e.to_string().contains("boom")),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_panic_is_failed() {
        let outcome: Outcome<()> = run_with_deadline("panic", Duration::from_secs(1), || panic!("worker blew up"));
        assert!(matches!(outcome, Outcome::Failed(_)));
    }

    #[test]
    fn test_slow_job_times_out_without_blocking() {
        let started = Instant::now();
        let outcome = run_with_deadline("slow", Duration::from_millis(50), || {
            thread::sleep(Duration::from_secs(2));
            Ok(())
        });
        assert!(matches!(outcome, Outcome::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
