//! 디렉터리 변경 감시 (폴링 방식)
//!
//! 고정 간격으로 디렉터리 목록과 파일 크기/수정 시각을 스냅샷하여
//! 생성/변경 이벤트를 만들어 냅니다. inotify 같은 OS 알림 대신
//! 폴링을 쓰므로 네트워크 파일시스템에서도 동작합니다.

use crate::error::{RelayError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 기본 폴링 간격
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// 감시 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOp {
    Create,
    Modify,
    Other,
}

/// 감시 이벤트
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub op: WatchOp,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileState {
    size: u64,
    modified: Option<SystemTime>,
    is_dir: bool,
}

/// 폴링 기반 디렉터리 watcher
pub struct DirWatcher {
    dir: PathBuf,
    interval: Duration,
}

impl DirWatcher {
    pub fn new(dir: PathBuf, interval: Duration) -> Self {
        DirWatcher { dir, interval }
    }

    /// 폴링 태스크를 띄우고 이벤트 수신 채널을 돌려줌
    ///
    /// 태스크는 token이 취소되거나 수신자가 버려지면 종료되므로
    /// 어느 경로로 빠져나가든 구독이 정리됩니다.
    pub fn spawn(self, token: CancellationToken) -> mpsc::Receiver<Result<WatchEvent>> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            self.run(token, tx).await;
        });
        rx
    }

    async fn run(self, token: CancellationToken, tx: mpsc::Sender<Result<WatchEvent>>) {
        let mut snapshot = match Self::scan(&self.dir).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
        };

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("watcher for {} canceled", self.dir.display());
                    return;
                }
                _ = sleep(self.interval) => {}
            }

            let current = match Self::scan(&self.dir).await {
                Ok(current) => current,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            };

            for (path, state) in &current {
                let op = match snapshot.get(path) {
                    None => Some(WatchOp::Create),
                    Some(prev) if prev != state => Some(WatchOp::Modify),
                    Some(_) => None,
                };
                if let Some(op) = op {
                    let event = WatchEvent {
                        path: path.clone(),
                        op,
                        is_dir: state.is_dir,
                    };
                    if tx.send(Ok(event)).await.is_err() {
                        // 수신자가 구독을 끝냄
                        return;
                    }
                }
            }
            snapshot = current;
        }
    }

    async fn scan(dir: &Path) -> Result<HashMap<PathBuf, FileState>> {
        let mut entries = fs::read_dir(dir).await.map_err(|e| {
            RelayError::IoError(format!("watch relay dir {}: {}", dir.display(), e))
        })?;

        let mut snapshot = HashMap::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            RelayError::IoError(format!("watch relay dir {}: {}", dir.display(), e))
        })? {
            let Ok(metadata) = entry.metadata().await else {
                // 스캔 사이에 지워진 파일은 다음 바퀴에서 처리됨
                continue;
            };
            snapshot.insert(
                entry.path(),
                FileState {
                    size: metadata.len(),
                    modified: metadata.modified().ok(),
                    is_dir: metadata.is_dir(),
                },
            );
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_detects_create_and_modify() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let watcher = DirWatcher::new(dir.path().to_path_buf(), Duration::from_millis(10));
        let mut events = watcher.spawn(token.clone());

        // 기준 스냅샷이 잡힌 뒤에 파일을 만들어야 생성 이벤트가 나옴
        tokio::time::sleep(Duration::from_millis(50)).await;

        let target = dir.path().join("mysql-bin.000001");
        tokio::fs::write(&target, b"1234").await.unwrap();

        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(event.op, WatchOp::Create);
        assert_eq!(event.path, target);
        assert!(!event.is_dir);

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&target)
            .await
            .unwrap();
        use tokio::io::AsyncWriteExt;
        file.write_all(b"5678").await.unwrap();
        file.flush().await.unwrap();

        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(event.op, WatchOp::Modify);
        assert_eq!(event.path, target);

        token.cancel();
    }

    #[tokio::test]
    async fn test_cancel_stops_task() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let watcher = DirWatcher::new(dir.path().to_path_buf(), Duration::from_millis(10));
        let mut events = watcher.spawn(token.clone());

        token.cancel();

        // 태스크가 종료되면 송신자가 버려져 채널이 닫힘
        let closed = timeout(WAIT, events.recv()).await.unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_missing_dir_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let token = CancellationToken::new();
        let watcher = DirWatcher::new(missing, Duration::from_millis(10));
        let mut events = watcher.spawn(token);

        let first = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert!(matches!(first, Err(RelayError::IoError(_))));
    }
}
