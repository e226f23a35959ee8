//! Per-transfer progress reporting.
//!
//! The store sends byte increments over an unbounded channel. The reporter
//! keeps a running total, writes `PROGRESS <total>` on every increment, and
//! repeats the current total whenever the stream stays quiet for
//! `REPORT_INTERVAL`. It exits once the sender side is dropped.

use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::debug;

use annex_mega_common::store::ProgressSink;

use crate::annex::AnnexWriter;

pub const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// A running reporter. `finish` waits for it to drain and returns the total.
pub struct ProgressReporter {
    handle: JoinHandle<u64>,
}

impl ProgressReporter {
    /// Spawn a reporter and return it together with the sink to hand to the
    /// store.
    pub fn start(out: AnnexWriter) -> (ProgressReporter, ProgressSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(report(out, rx, REPORT_INTERVAL));
        (ProgressReporter { handle }, tx)
    }

    pub async fn finish(self) -> u64 {
        // The task never panics on its own; a join error means the runtime is
        // shutting down and the total no longer matters.
        self.handle.await.unwrap_or_default()
    }
}

async fn report(out: AnnexWriter, mut rx: UnboundedReceiver<u64>, interval: Duration) -> u64 {
    let mut total: u64 = 0;
    let show = |total: u64| {
        // Write errors surface on the next protocol reply instead.
        let _ = out.send(&format!("PROGRESS {}", total));
    };

    loop {
        tokio::select! {
            increment = rx.recv() => match increment {
                Some(bytes) => {
                    total += bytes;
                    show(total);
                }
                None => break,
            },
            _ = tokio::time::sleep(interval) => show(total),
        }
    }

    debug!(total, "Progress stream closed");
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annex::tests::SharedBuf;

    #[tokio::test]
    async fn test_reports_running_total() {
        let buf = SharedBuf::default();
        let (reporter, sink) = ProgressReporter::start(AnnexWriter::new(buf.clone()));
        for n in [100, 250, 50] {
            sink.send(n).unwrap();
        }
        drop(sink);

        assert_eq!(reporter.finish().await, 400);
        assert_eq!(buf.lines(), vec!["PROGRESS 100", "PROGRESS 350", "PROGRESS 400"]);
    }

    #[tokio::test]
    async fn test_closed_stream_without_increments() {
        let buf = SharedBuf::default();
        let (reporter, sink) = ProgressReporter::start(AnnexWriter::new(buf.clone()));
        drop(sink);
        assert_eq!(reporter.finish().await, 0);
        assert!(buf.lines().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_repeats_total() {
        let buf = SharedBuf::default();
        let (reporter, sink) = ProgressReporter::start(AnnexWriter::new(buf.clone()));
        sink.send(42).unwrap();

        tokio::time::sleep(REPORT_INTERVAL * 2 + Duration::from_secs(1)).await;
        drop(sink);
        reporter.finish().await;

        assert_eq!(buf.lines(), vec!["PROGRESS 42", "PROGRESS 42", "PROGRESS 42"]);
    }
}
