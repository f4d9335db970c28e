//! Relay 로그 디렉터리 reader
//!
//! relay 루트 아래의 epoch sub directory들을 차례로 읽어 하나의
//! 이벤트 스트림으로 만들어 냅니다. 세 단계의 루프로 구성됩니다:
//!
//! 1. epoch 루프: sub directory를 다 읽으면 다음 epoch으로 전환
//! 2. 디렉터리 루프: epoch 안의 파일들을 순서대로, 끝나면 재나열
//! 3. 파일 루프: 파일이 자라는 동안 같은 파일을 반복 파싱
//!
//! 전환/재파싱 판단 지점마다 파일 크기를 다시 확인하여
//! "EOF를 봤는데 그 사이 새 바이트가 붙은" 경합을 닫습니다.

use crate::decoder::BinlogFileDecoder;
use crate::epoch::{
    first_relay_filename, next_uuid, parse_uuid_index, parse_uuid_suffix, suffix_to_string,
    uuid_by_suffix, META_FILENAME, UUID_INDEX_FILENAME,
};
use crate::error::{RelayError, Result};
use crate::events::{BinlogEvent, BinlogEventData, EventType, FILE_HEADER_LEN};
use crate::filename::{is_relay_filename, BinlogFilename};
use crate::location::BinlogPosition;
use crate::stream::{event_channel, EventSender, EventStream};
use crate::watcher::{DirWatcher, WatchOp, DEFAULT_WATCH_INTERVAL};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Relay reader 설정
#[derive(Debug, Clone)]
pub struct RelayReaderConfig {
    /// relay 루트 디렉터리 (epoch sub directory들의 부모)
    pub relay_dir: PathBuf,
    /// 디렉터리 변경 감시 폴링 간격
    pub watch_interval: Duration,
}

impl RelayReaderConfig {
    pub fn new(relay_dir: impl Into<PathBuf>) -> Self {
        RelayReaderConfig {
            relay_dir: relay_dir.into(),
            watch_interval: DEFAULT_WATCH_INTERVAL,
        }
    }
}

/// Relay 로그 reader
///
/// 한 번에 하나의 스트림만 활성화될 수 있습니다. `start_sync`가 백그라운드
/// worker를 띄우고, `close`가 취소 후 worker 종료를 기다립니다.
pub struct RelayLogReader {
    cfg: RelayReaderConfig,
    index_path: PathBuf,
    uuids: Vec<String>,
    token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl RelayLogReader {
    pub fn new(cfg: RelayReaderConfig) -> Self {
        let index_path = cfg.relay_dir.join(UUID_INDEX_FILENAME);
        RelayLogReader {
            cfg,
            index_path,
            uuids: Vec::new(),
            token: CancellationToken::new(),
            worker: None,
        }
    }

    /// 지정한 위치부터 읽기 시작
    ///
    /// UUID index를 다시 읽어 epoch 목록을 갱신한 뒤 worker를 띄우고
    /// 이벤트 스트림을 즉시 돌려줍니다. 파싱이 비정상 종료되면 worker가
    /// 스트림에 에러를 붙여 닫고, 취소되면 조용히 닫습니다.
    pub async fn start_sync(&mut self, pos: BinlogPosition) -> Result<EventStream> {
        if pos.filename.is_empty() {
            return Err(RelayError::PositionRequired);
        }
        if self.worker.is_some() {
            return Err(RelayError::AlreadyRunning);
        }

        self.uuids = parse_uuid_index(&self.index_path).await?;
        info!("update relay UUIDs to {:?}", self.uuids);

        self.token = CancellationToken::new();
        let (sender, stream) = event_channel();
        let mut worker = ParseWorker {
            relay_dir: self.cfg.relay_dir.clone(),
            watch_interval: self.cfg.watch_interval,
            uuids: self.uuids.clone(),
            token: self.token.clone(),
            sender,
            latest_server_id: 0,
        };

        let handle = tokio::spawn(async move {
            info!("start read from pos {}", pos);
            match worker.parse_relay(pos).await {
                Err(RelayError::Canceled) => {
                    info!("parse relay finished because of cancellation");
                }
                Err(err) => {
                    error!("parse relay stopped because {}", err);
                    worker.sender.close_with_error(err);
                }
                Ok(()) => {
                    info!("parse relay finished");
                }
            }
        });
        self.worker = Some(handle);

        Ok(stream)
    }

    /// Reader 종료
    ///
    /// 취소 신호를 보내고 worker가 빠져나올 때까지 기다립니다.
    /// 여러 번 불러도, 시작한 적이 없어도 안전합니다.
    pub async fn close(&mut self) {
        info!("relay log reader closing");
        self.token.cancel();
        if let Some(handle) = self.worker.take() {
            let _ = handle.await;
        }
        info!("relay log reader closed");
    }
}

/// 다음 epoch으로의 전환 대상
#[derive(Debug, Clone, PartialEq, Eq)]
struct SwitchTarget {
    /// 전환할 epoch (suffix가 붙은 디렉터리 이름)
    next_uuid: String,
    /// 그 epoch의 첫 relay 파일명
    next_filename: String,
}

/// 파일 하나를 파싱한 뒤의 행동
#[derive(Debug, Clone, PartialEq, Eq)]
enum FileOutcome {
    /// 디렉터리에 파일이 더 남아 있으므로 다음 파일로 진행
    MoreFilesRemain,
    /// 같은 파일을 현재 오프셋부터 다시 파싱
    ReParse,
    /// 다음 epoch으로 전환
    Switch(SwitchTarget),
    /// 디렉터리를 다시 나열 (새 파일이 생겼을 수 있음)
    Relist,
}

/// 전환 여부 검사 결과
#[derive(Debug, Clone, PartialEq, Eq)]
enum SwitchCheck {
    /// 다음 epoch이 아직 없음
    NoNext,
    /// 검사 사이에 현재 파일이 자랐으므로 재파싱
    ReParse,
    /// 전환
    Switch(SwitchTarget),
}

/// 파일 크기 변화 검사 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeCheck {
    Unchanged,
    Grew,
}

/// 스트림 하나를 끝까지 구동하는 백그라운드 worker
struct ParseWorker {
    relay_dir: PathBuf,
    watch_interval: Duration,
    uuids: Vec<String>,
    token: CancellationToken,
    sender: EventSender,
    /// relay 로그에서 마지막으로 관측한 서버 ID (가짜 rotate에 사용)
    latest_server_id: u32,
}

impl ParseWorker {
    fn check_cancel(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(RelayError::Canceled)
        } else {
            Ok(())
        }
    }

    async fn send_event(&self, event: BinlogEvent) -> Result<()> {
        self.sender.send(event, &self.token).await
    }

    /// epoch 루프: sub directory를 끝까지 읽고 다음 epoch으로 전환
    async fn parse_relay(&mut self, mut pos: BinlogPosition) -> Result<()> {
        loop {
            self.check_cancel()?;

            let target = self.parse_dir_as_possible(pos).await?;

            let (_, suffix_int) = parse_uuid_suffix(&target.next_uuid)?;
            let uuid_suffix = suffix_to_string(suffix_int);
            let parsed = BinlogFilename::parse(&target.next_filename)?;

            // 다음 sub directory로 전환할 수 있도록 위치를 재인코딩
            pos = BinlogPosition::new(parsed.with_suffix(&uuid_suffix), FILE_HEADER_LEN);
        }
    }

    /// 디렉터리 루프: 한 epoch 안에서 읽을 수 있는 만큼 읽음
    ///
    /// 전환이 필요할 때에만 반환합니다. 마지막 파일을 다 읽고도 전환이
    /// 아니면 디렉터리를 다시 나열해 새 파일을 집어 듭니다.
    async fn parse_dir_as_possible(&mut self, pos: BinlogPosition) -> Result<SwitchTarget> {
        let (current_uuid, _uuid_suffix, real_pos) = self.extract_pos(&pos)?;
        let mut pos = real_pos;
        let mut first_parse = true;
        let dir = self.relay_dir.join(&current_uuid);

        loop {
            self.check_cancel()?;

            let files = collect_binlog_files(&dir, &pos.filename).await?;
            if files.is_empty() {
                return Err(RelayError::NotFound(format!(
                    "no relay log files match pos {} in {}",
                    pos,
                    dir.display()
                )));
            }

            debug!("start read from directory {}", dir.display());

            let mut latest_pos = pos.position;
            let mut latest_name = pos.filename.clone();
            let file_count = files.len();
            for (i, relay_file) in files.iter().enumerate() {
                self.check_cancel()?;

                if i == 0 {
                    if *relay_file != pos.filename {
                        return Err(RelayError::NotFound(format!(
                            "the first relay log {} does not match the start pos {}",
                            relay_file, pos
                        )));
                    }
                } else {
                    // 이후 파일들은 헤더 길이부터, 새 파일로 파싱
                    latest_pos = FILE_HEADER_LEN;
                    first_parse = true;
                }

                let possible_last = i == file_count - 1;
                let (outcome, new_pos) = self
                    .parse_file_as_possible(
                        &dir,
                        relay_file,
                        latest_pos,
                        first_parse,
                        &current_uuid,
                        possible_last,
                    )
                    .await?;
                first_parse = false;
                latest_pos = new_pos;

                if let FileOutcome::Switch(target) = outcome {
                    return Ok(target);
                }
                latest_name = relay_file.clone();
            }

            // 마지막 파일과 위치부터 다시 나열하여 이어서 파싱
            pos = BinlogPosition::new(latest_name, latest_pos);
        }
    }

    /// 파일 루프: 파일이 자라는 동안 같은 파일을 반복 파싱
    async fn parse_file_as_possible(
        &mut self,
        dir: &Path,
        relay_file: &str,
        offset: u64,
        first_parse: bool,
        current_uuid: &str,
        possible_last: bool,
    ) -> Result<(FileOutcome, u64)> {
        let mut latest_pos = offset;
        let mut first = first_parse;

        loop {
            self.check_cancel()?;

            let (outcome, new_pos) = self
                .parse_file(dir, relay_file, latest_pos, first, current_uuid, possible_last)
                .await?;
            first = false;
            latest_pos = new_pos;

            match outcome {
                FileOutcome::ReParse => {
                    debug!("continue to re-parse relay log file {}", relay_file);
                }
                other => return Ok((other, latest_pos)),
            }
        }
    }

    /// 파일 하나를 지정 오프셋부터 끝까지 파싱하고 다음 행동을 결정
    async fn parse_file(
        &mut self,
        dir: &Path,
        relay_file: &str,
        offset: u64,
        first_parse: bool,
        current_uuid: &str,
        possible_last: bool,
    ) -> Result<(FileOutcome, u64)> {
        let (_, suffix_int) = parse_uuid_suffix(current_uuid)?;
        let uuid_suffix = suffix_to_string(suffix_int);
        let full_path = dir.join(relay_file);
        let mut latest_pos = offset;

        debug!("start read from relay log file {}", full_path.display());

        if first_parse {
            // 파일을 처음 읽을 때는 가짜 ROTATE 이벤트를 먼저 내보내서
            // 소비자가 항상 새 파일의 시작을 알 수 있게 함
            let parsed = BinlogFilename::parse(relay_file)?;
            let fake = BinlogEvent::fake_rotate(
                &parsed.with_suffix(&uuid_suffix),
                offset,
                self.latest_server_id,
            );
            self.send_event(fake).await?;
        }

        match self
            .decode_events(&full_path, offset, &uuid_suffix, &mut latest_pos)
            .await
        {
            Err(RelayError::UnexpectedEof { path, offset }) if possible_last => {
                // 아직 기록 중일 수 있는 마지막 파일의 꼬리는 에러가 아님
                warn!(
                    "parse binlog file {} got EOF at offset {}",
                    path.display(),
                    offset
                );
            }
            Err(err) => {
                error!(
                    "parse binlog file {} from offset {} error {}",
                    full_path.display(),
                    offset,
                    err
                );
                return Err(err);
            }
            Ok(()) => {}
        }

        if !possible_last {
            // 디렉터리에 파일이 더 있으므로 이어서 파싱
            info!("more relay log files need to parse in {}", dir.display());
            return Ok((FileOutcome::MoreFilesRemain, latest_pos));
        }

        match self.check_switch(current_uuid, &full_path, latest_pos).await? {
            SwitchCheck::ReParse => return Ok((FileOutcome::ReParse, latest_pos)),
            SwitchCheck::Switch(target) => return Ok((FileOutcome::Switch(target), latest_pos)),
            SwitchCheck::NoNext => {}
        }

        let updated_path = self
            .wait_sub_dir_updated(dir, &full_path, latest_pos)
            .await?;
        if updated_path.ends_with(relay_file) {
            // 현재 파일이 갱신되었으므로 다시 파싱
            return Ok((FileOutcome::ReParse, latest_pos));
        }

        // 새 파일이 생겼을 수 있으므로 디렉터리 재나열
        Ok((FileOutcome::Relist, latest_pos))
    }

    /// 디코더를 구동하여 이벤트를 스트림으로 내보냄
    async fn decode_events(
        &mut self,
        path: &Path,
        offset: u64,
        uuid_suffix: &str,
        latest_pos: &mut u64,
    ) -> Result<()> {
        let mut decoder = BinlogFileDecoder::open(path, offset).await?;

        loop {
            self.check_cancel()?;

            let Some(mut event) = decoder.next_event().await? else {
                return Ok(());
            };

            if event.header.is_relay_log_event() {
                // 마스터 전환 시 relay writer가 공백을 메우려 만든 이벤트는 건너뜀
                debug!("skip event created by relay writer: {:?}", event.header);
                continue;
            }

            self.latest_server_id = event.header.server_id;

            match &mut event.data {
                BinlogEventData::Rotate(rotate) => {
                    // 소비자가 epoch을 구분할 수 있도록 다음 파일명에 suffix를 입힘
                    let parsed = BinlogFilename::parse(&rotate.next_binlog_name)?;
                    rotate.next_binlog_name = parsed.with_suffix(uuid_suffix);

                    if event.header.timestamp != 0 && event.header.log_pos != 0 {
                        // 진짜 rotate 이벤트만 파일 위치를 갱신
                        *latest_pos = event.header.log_pos as u64;
                    }
                    info!(
                        "rotate binlog to {}:{}",
                        rotate.next_binlog_name, rotate.position
                    );
                }
                _ => {
                    if event.header.event_type != EventType::FormatDescriptionEvent {
                        *latest_pos = event.header.log_pos as u64;
                    }
                }
            }

            self.send_event(event).await?;
        }
    }

    /// 다음 epoch으로 전환해야 하는지 검사
    async fn check_switch(
        &self,
        current_uuid: &str,
        latest_file_path: &Path,
        latest_size: u64,
    ) -> Result<SwitchCheck> {
        let Some((next_uuid, _suffix)) = next_uuid(&self.uuids, current_uuid) else {
            return Ok(SwitchCheck::NoNext);
        };

        // 다음 epoch의 첫 relay 파일. sub directory 생성과 첫 파일 기록은
        // 원자적이지 않으므로, 없으면 에러로 올려 운영 절차에 맡김
        let next_filename = first_relay_filename(&self.relay_dir.join(&next_uuid)).await?;

        match file_size_updated(latest_file_path, latest_size).await? {
            SizeCheck::Grew => {
                // 검사하는 사이에 현재 파일이 자랐으므로 전환 대신 재파싱
                Ok(SwitchCheck::ReParse)
            }
            SizeCheck::Unchanged => Ok(SwitchCheck::Switch(SwitchTarget {
                next_uuid,
                next_filename,
            })),
        }
    }

    /// 디렉터리 변경을 기다림 (다음 epoch이 아직 없을 때)
    ///
    /// 변경된 파일의 경로를 돌려줍니다. 구독 직후 파일 크기를 한 번 더
    /// 확인하여 EOF와 구독 사이의 경합을 커버합니다.
    async fn wait_sub_dir_updated(
        &self,
        dir: &Path,
        latest_file_path: &Path,
        latest_size: u64,
    ) -> Result<PathBuf> {
        let watcher = DirWatcher::new(dir.to_path_buf(), self.watch_interval);
        let mut events = watcher.spawn(self.token.child_token());

        if file_size_updated(latest_file_path, latest_size).await? == SizeCheck::Grew {
            return Ok(latest_file_path.to_path_buf());
        }

        loop {
            tokio::select! {
                _ = self.token.cancelled() => return Err(RelayError::Canceled),
                event = events.recv() => {
                    let Some(event) = event else {
                        return Err(RelayError::Internal(format!(
                            "watcher channel for relay log dir {} closed",
                            dir.display()
                        )));
                    };
                    let event = event?;
                    debug!("watcher receive event {:?}", event);

                    if event.is_dir {
                        debug!("skip watcher event for directory {}", event.path.display());
                        continue;
                    }
                    if !matches!(event.op, WatchOp::Create | WatchOp::Modify) {
                        continue;
                    }
                    let base_name = event
                        .path
                        .file_name()
                        .map(|name| name.to_string_lossy().to_string())
                        .unwrap_or_default();
                    if !is_relay_filename(&base_name) {
                        debug!(
                            "skip watcher event for invalid relay log file {}",
                            base_name
                        );
                        continue;
                    }
                    return Ok(event.path);
                }
            }
        }
    }

    /// 호출자 위치에서 (epoch, suffix, 실제 위치) 추출
    ///
    /// 파일명에 suffix가 들어 있으면 해당 epoch에, 없으면 최신(현재
    /// 마스터) epoch에 바인딩합니다.
    fn extract_pos(&self, pos: &BinlogPosition) -> Result<(String, String, BinlogPosition)> {
        if self.uuids.is_empty() {
            return Err(RelayError::NotFound(format!(
                "relay sub dir with index file {}",
                self.relay_dir.join(UUID_INDEX_FILENAME).display()
            )));
        }

        let parsed = BinlogFilename::parse(&pos.filename)?;
        if let Some(suffix) = &parsed.uuid_suffix {
            let uuid = uuid_by_suffix(&self.uuids, suffix).ok_or_else(|| {
                RelayError::NotFound(format!(
                    "UUID suffix {} with UUIDs {:?}",
                    suffix, self.uuids
                ))
            })?;
            let real_pos = BinlogPosition::new(parsed.real_name(), pos.position);
            return Ok((uuid, suffix.clone(), real_pos));
        }

        // suffix가 없으면 최신 epoch 사용
        let uuid = self
            .uuids
            .last()
            .cloned()
            .ok_or_else(|| RelayError::NotFound("relay sub dir".to_string()))?;
        let (_, suffix_int) = parse_uuid_suffix(&uuid)?;
        Ok((uuid, suffix_to_string(suffix_int), pos.clone()))
    }
}

/// 시작 파일명 이상의 시퀀스를 가진 relay 파일들을 순서대로 수집
async fn collect_binlog_files(dir: &Path, start_name: &str) -> Result<Vec<String>> {
    let start = BinlogFilename::parse(start_name)?;

    let mut entries = fs::read_dir(dir).await.map_err(|e| {
        RelayError::IoError(format!("read relay dir {}: {}", dir.display(), e))
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| {
        RelayError::IoError(format!("read relay dir {}: {}", dir.display(), e))
    })? {
        if let Ok(file_type) = entry.file_type().await {
            if file_type.is_dir() {
                continue;
            }
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name == META_FILENAME || name == UUID_INDEX_FILENAME {
            continue;
        }
        let Ok(parsed) = BinlogFilename::parse(&name) else {
            continue;
        };
        if parsed.base_name != start.base_name {
            continue;
        }
        if parsed.sequence_number() < start.sequence_number() {
            continue;
        }
        files.push(parsed);
    }

    files.sort();
    Ok(files.iter().map(|f| f.real_name()).collect())
}

/// 파일 크기가 변했는지 검사
///
/// 같으면 `Unchanged`, 커졌으면 `Grew`, 줄었으면 `FileShrunk` 에러.
/// relay 파일은 append-only이므로 줄어드는 것은 불변식 위반입니다.
async fn file_size_updated(path: &Path, last_size: u64) -> Result<SizeCheck> {
    let metadata = fs::metadata(path).await.map_err(|e| {
        RelayError::IoError(format!("get stat for relay log {}: {}", path.display(), e))
    })?;
    let current_size = metadata.len();

    if current_size == last_size {
        Ok(SizeCheck::Unchanged)
    } else if current_size > last_size {
        debug!(
            "relay log file {} size has changed from {} to {}",
            path.display(),
            last_size,
            current_size
        );
        Ok(SizeCheck::Grew)
    } else {
        Err(RelayError::FileShrunk {
            path: path.to_path_buf(),
            last_size,
            current_size,
        })
    }
}
