//! Log file tailing for managed services.
//!
//! Services write their own log files; the tailer only follows. It polls
//! rather than blocking on file events because the file is rewritten by a
//! different process and may not exist yet when tailing begins.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt as _, AsyncSeekExt as _, BufReader};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::{LogEvent, SupervisorEvent, TAILER_STOP_TIMEOUT, TAIL_POLL_INTERVAL};

pub(crate) struct TailerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TailerHandle {
    pub(crate) fn spawn(
        service: String,
        path: PathBuf,
        seq: Arc<AtomicU64>,
        events: broadcast::Sender<SupervisorEvent>,
    ) -> Self {
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run(service, path, seq, events, cancel_rx));
        Self { cancel, task }
    }

    /// Signal the tailer and wait for it to exit, bounded by
    /// `TAILER_STOP_TIMEOUT`. A tailer that misses the deadline is
    /// abandoned; it still exits on its next poll tick.
    pub(crate) async fn stop(self) {
        let _ = self.cancel.send(true);
        if tokio::time::timeout(TAILER_STOP_TIMEOUT, self.task)
            .await
            .is_err()
        {
            log::warn!(
                "log tailer did not exit within {:?}, abandoning it",
                TAILER_STOP_TIMEOUT
            );
        }
    }
}

async fn run(
    service: String,
    path: PathBuf,
    seq: Arc<AtomicU64>,
    events: broadcast::Sender<SupervisorEvent>,
    cancel: watch::Receiver<bool>,
) {
    // A file that already exists holds history from earlier runs; skip to
    // its end. A file that appears later is read from the top so nothing
    // written between creation and our first open is lost.
    let skip_history = tokio::fs::metadata(&path).await.is_ok();

    let Some((mut reader, mut pos)) = open_when_available(&path, skip_history, &cancel).await
    else {
        return;
    };

    let mut buf: Vec<u8> = Vec::new();

    loop {
        if *cancel.borrow() {
            return;
        }

        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                if was_replaced(&path, pos).await {
                    log::debug!("log file for {service} rotated, reopening");
                    match open_when_available(&path, false, &cancel).await {
                        Some((r, p)) => {
                            reader = r;
                            pos = p;
                            buf.clear();
                        }
                        None => return,
                    }
                    continue;
                }
                sleep(TAIL_POLL_INTERVAL).await;
            }
            Ok(n) => {
                pos += n as u64;
                if buf.ends_with(b"\n") {
                    emit_line(&service, &buf, &seq, &events);
                    buf.clear();
                }
                // A line without its newline yet is a partial write; keep
                // accumulating until the writer finishes it.
            }
            Err(err) => {
                log::debug!("log read error for {service}: {err}, reopening");
                match open_when_available(&path, false, &cancel).await {
                    Some((r, p)) => {
                        reader = r;
                        pos = p;
                        buf.clear();
                    }
                    None => return,
                }
            }
        }
    }
}

fn emit_line(
    service: &str,
    raw: &[u8],
    seq: &AtomicU64,
    events: &broadcast::Sender<SupervisorEvent>,
) {
    let line = String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string();
    let _ = events.send(SupervisorEvent::Log(LogEvent {
        service: service.to_string(),
        line,
        seq: seq.fetch_add(1, Ordering::SeqCst),
    }));
}

/// Open the log file, waiting (cancellably) for it to be created. Returns
/// the reader plus the byte offset it starts at, or `None` on cancellation.
async fn open_when_available(
    path: &Path,
    seek_end: bool,
    cancel: &watch::Receiver<bool>,
) -> Option<(BufReader<File>, u64)> {
    loop {
        if *cancel.borrow() {
            return None;
        }
        match File::open(path).await {
            Ok(mut file) => {
                let pos = if seek_end {
                    match file.seek(SeekFrom::End(0)).await {
                        Ok(pos) => pos,
                        Err(_) => 0,
                    }
                } else {
                    0
                };
                return Some((BufReader::new(file), pos));
            }
            // Absence is expected while the service is still starting up.
            Err(_) => sleep(TAIL_POLL_INTERVAL).await,
        }
    }
}

/// Detect deletion or truncation: the file is gone, or shorter than what
/// we already consumed.
async fn was_replaced(path: &Path, pos: u64) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len() < pos,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::time::Duration;

    use super::*;

    fn new_tailer(
        path: &Path,
    ) -> (
        TailerHandle,
        broadcast::Receiver<SupervisorEvent>,
        Arc<AtomicU64>,
    ) {
        let (events, rx) = broadcast::channel(128);
        let seq = Arc::new(AtomicU64::new(0));
        let handle = TailerHandle::spawn(
            "svc".to_string(),
            path.to_path_buf(),
            Arc::clone(&seq),
            events,
        );
        (handle, rx, seq)
    }

    async fn next_log(rx: &mut broadcast::Receiver<SupervisorEvent>) -> LogEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for log event")
                .expect("event channel closed");
            if let SupervisorEvent::Log(log) = event {
                return log;
            }
        }
    }

    #[tokio::test]
    async fn reads_lines_appended_after_open_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.log");
        std::fs::write(&path, "old history\n").unwrap();

        let (handle, mut rx, _) = new_tailer(&path);
        // Give the tailer a moment to seek past the history.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "L1").unwrap();
        writeln!(file, "L2").unwrap();
        writeln!(file, "L3").unwrap();
        file.flush().unwrap();

        for (i, expected) in ["L1", "L2", "L3"].iter().enumerate() {
            let event = next_log(&mut rx).await;
            assert_eq!(event.line, *expected);
            assert_eq!(event.seq, i as u64);
        }

        handle.stop().await;
    }

    #[tokio::test]
    async fn file_created_after_start_loses_no_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.log");

        let (handle, mut rx, _) = new_tailer(&path);
        tokio::time::sleep(Duration::from_millis(250)).await;

        std::fs::write(&path, "L1\nL2\n").unwrap();

        assert_eq!(next_log(&mut rx).await.line, "L1");
        assert_eq!(next_log(&mut rx).await.line, "L2");

        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_returns_promptly_and_releases_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-created.log");

        let (handle, _rx, _) = new_tailer(&path);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let started = std::time::Instant::now();
        handle.stop().await;
        assert!(started.elapsed() < TAILER_STOP_TIMEOUT);
    }

    #[tokio::test]
    async fn sequence_continues_across_tailer_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.log");
        std::fs::write(&path, "").unwrap();

        let (first, mut rx, seq) = new_tailer(&path);
        tokio::time::sleep(Duration::from_millis(250)).await;

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "one").unwrap();
        file.flush().unwrap();
        assert_eq!(next_log(&mut rx).await.seq, 0);
        first.stop().await;

        let (events, mut rx2) = broadcast::channel(128);
        let second = TailerHandle::spawn(
            "svc".to_string(),
            path.clone(),
            Arc::clone(&seq),
            events,
        );
        tokio::time::sleep(Duration::from_millis(250)).await;

        writeln!(file, "two").unwrap();
        file.flush().unwrap();
        let event = next_log(&mut rx2).await;
        assert_eq!(event.line, "two");
        assert_eq!(event.seq, 1);

        second.stop().await;
    }

    #[tokio::test]
    async fn survives_truncation_and_keeps_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.log");
        std::fs::write(&path, "stale one\nstale two\n").unwrap();

        let (handle, mut rx, _) = new_tailer(&path);
        tokio::time::sleep(Duration::from_millis(250)).await;

        // Rewrite the file shorter than what the tailer consumed.
        std::fs::write(&path, "fresh\n").unwrap();

        assert_eq!(next_log(&mut rx).await.line, "fresh");

        handle.stop().await;
    }
}
