//! Tailing of log-file consoles while a server runs.

use crate::models::ServerConsole;
use crate::state::ServerEvent;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const LOG_EXTENSIONS: &[&str] = &["log", "txt"];

/// Polls a console's log file (or every `*.log`/`*.txt` in its directory) and
/// publishes each new line as a [`ServerEvent::LogLine`].
///
/// Files present at spawn time are read from their current end. Dropping the
/// monitor cancels it; [`dispose`](Self::dispose) also waits for the task.
#[derive(Debug)]
pub struct LogFileMonitor {
    target: Utf8PathBuf,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LogFileMonitor {
    pub fn spawn(
        server_id: Uuid,
        console: ServerConsole,
        directory: &Utf8Path,
        poll_interval: Duration,
        events: broadcast::Sender<ServerEvent>,
    ) -> Self {
        let target = resolve_target(directory, &console.path);
        let cancel = CancellationToken::new();

        let mut tail = Tail {
            server_id,
            console,
            target: target.clone(),
            files: HashMap::new(),
            events,
        };
        tail.seek_to_end();

        tracing::debug!("Monitoring log console {} for server {}", target, server_id);

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(10)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => tail.poll().await,
                }
            }
        });

        Self {
            target,
            cancel,
            task: Some(task),
        }
    }

    pub fn target(&self) -> &Utf8Path {
        &self.target
    }

    /// Stop tailing and wait for the task to finish.
    pub async fn dispose(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Log monitor for {} ended abnormally: {}", self.target, e);
            }
        }
    }
}

impl Drop for LogFileMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn resolve_target(directory: &Utf8Path, path: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        directory.join(path)
    }
}

#[derive(Default)]
struct TailedFile {
    offset: u64,
    partial: Vec<u8>,
}

struct Tail {
    server_id: Uuid,
    console: ServerConsole,
    target: Utf8PathBuf,
    files: HashMap<Utf8PathBuf, TailedFile>,
    events: broadcast::Sender<ServerEvent>,
}

impl Tail {
    fn seek_to_end(&mut self) {
        for file in list_log_files(&self.target) {
            if let Ok(metadata) = std::fs::metadata(&file) {
                self.files.insert(
                    file,
                    TailedFile {
                        offset: metadata.len(),
                        partial: Vec::new(),
                    },
                );
            }
        }
    }

    async fn poll(&mut self) {
        for file in list_log_files(&self.target) {
            if let Err(e) = self.read_new_lines(&file).await {
                tracing::debug!("Failed to read log {}: {}", file, e);
            }
        }
    }

    async fn read_new_lines(&mut self, path: &Utf8Path) -> std::io::Result<()> {
        let len = tokio::fs::metadata(path).await?.len();
        let tailed = self.files.entry(path.to_path_buf()).or_default();

        if len < tailed.offset {
            // Truncated or rotated in place
            tailed.offset = 0;
            tailed.partial.clear();
        }
        if len == tailed.offset {
            return Ok(());
        }

        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(tailed.offset)).await?;
        let mut buffer = Vec::new();
        let read = file.take(len - tailed.offset).read_to_end(&mut buffer).await?;
        tailed.offset += read as u64;
        tailed.partial.extend_from_slice(&buffer);

        let mut lines = Vec::new();
        while let Some(end) = tailed.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = tailed.partial.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }

        for line in lines {
            let _ = self.events.send(ServerEvent::LogLine {
                server_id: self.server_id,
                line,
                console: self.console.clone(),
            });
        }

        Ok(())
    }
}

/// The target itself when it is a file, else its `*.log`/`*.txt` children.
fn list_log_files(target: &Utf8Path) -> Vec<Utf8PathBuf> {
    if target.is_file() {
        return vec![target.to_path_buf()];
    }

    let Ok(entries) = target.read_dir_utf8() else {
        return Vec::new();
    };

    let mut files: Vec<Utf8PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| LOG_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn utf8_dir(temp: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
    }

    async fn next_line(rx: &mut broadcast::Receiver<ServerEvent>) -> String {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ServerEvent::LogLine { line, .. } => line,
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_list_log_files_filters_extensions() {
        let temp = tempfile::tempdir().unwrap();
        let dir = utf8_dir(&temp);
        std::fs::write(dir.join("server.log"), "").unwrap();
        std::fs::write(dir.join("chat.TXT"), "").unwrap();
        std::fs::write(dir.join("save.dat"), "").unwrap();

        let files = list_log_files(&dir);
        assert_eq!(files, vec![dir.join("chat.TXT"), dir.join("server.log")]);
    }

    #[tokio::test]
    async fn test_emits_only_new_complete_lines() {
        let temp = tempfile::tempdir().unwrap();
        let dir = utf8_dir(&temp);
        let log = dir.join("server.log");
        std::fs::write(&log, "old line\n").unwrap();

        let (tx, mut rx) = broadcast::channel(16);
        let server_id = Uuid::new_v4();
        let monitor = LogFileMonitor::spawn(
            server_id,
            ServerConsole::log_file("Server Log", "server.log"),
            &dir,
            Duration::from_millis(20),
            tx,
        );

        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
            write!(file, "first\r\nsecond\npart").unwrap();
        }

        assert_eq!(next_line(&mut rx).await, "first");
        assert_eq!(next_line(&mut rx).await, "second");

        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
            writeln!(file, "ial").unwrap();
        }
        assert_eq!(next_line(&mut rx).await, "partial");

        monitor.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_stops_monitoring() {
        let temp = tempfile::tempdir().unwrap();
        let dir = utf8_dir(&temp);

        let (tx, mut rx) = broadcast::channel(16);
        let monitor = LogFileMonitor::spawn(
            Uuid::new_v4(),
            ServerConsole::log_file("Logs", ""),
            &dir,
            Duration::from_millis(20),
            tx,
        );
        monitor.dispose().await;

        std::fs::write(dir.join("late.log"), "after dispose\n").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }
}
