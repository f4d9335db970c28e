//! Binlog 처리 위치 추적 (Location 및 LocationRecorder)
//!
//! Binlog 파일명 + 위치 + GTID 집합으로 정확한 재시작 지점을 추적합니다.
//! 예: "mysql-bin.000003" 파일의 4097 바이트 위치
//!
//! LocationRecorder는 이벤트 하나를 소비할 때마다 다음을 유지합니다:
//! - cur_start: 현재 이벤트의 시작 위치 (직전 이벤트의 끝 위치)
//! - cur_end: 현재 이벤트의 끝 위치
//! - txn_end: 마지막으로 완료된 트랜잭션의 끝 위치

use crate::events::{BinlogEvent, BinlogEventData, EventType, FILE_HEADER_LEN};
use crate::gtid::GtidSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binlog 파일 위치 정보
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinlogPosition {
    /// 바이너리 로그 파일명 (e.g., "mysql-bin.000001")
    pub filename: String,
    /// 바이트 위치
    pub position: u64,
}

impl BinlogPosition {
    pub fn new(filename: impl Into<String>, position: u64) -> Self {
        BinlogPosition {
            filename: filename.into(),
            position,
        }
    }

    /// 파일명에서 시퀀스 번호 추출
    pub fn file_sequence(&self) -> Option<u64> {
        self.filename.rsplit('.').next().and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.position)
    }
}

/// 업스트림 로그 좌표 (파일 위치 + GTID 집합)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    /// 파일명과 바이트 위치
    pub position: BinlogPosition,
    /// 이 위치까지 적용된 GTID 집합
    pub gtid_set: GtidSet,
    /// 마지막으로 관측된 업스트림 서버 ID
    pub server_id: Option<u32>,
}

impl Location {
    pub fn new(filename: impl Into<String>, position: u64) -> Self {
        Location {
            position: BinlogPosition::new(filename, position),
            gtid_set: GtidSet::new(),
            server_id: None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "file": self.position.filename,
            "pos": self.position.position,
            "gtids": self.gtid_set.to_string(),
            "server_id": self.server_id,
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(gtids: {})", self.position, self.gtid_set)
    }
}

/// 실제 업스트림 기록에서 나온 이벤트인지 여부
///
/// 파일 헤더성 이벤트와 하트비트, 인공 이벤트는 위치를 전진시키지 않습니다.
pub fn should_update_position(event: &BinlogEvent) -> bool {
    match event.header.event_type {
        EventType::FormatDescriptionEvent
        | EventType::HeartbeatEvent
        | EventType::IgnorableEvent
        | EventType::PreviousGtidsEvent
        | EventType::MariadbGtidListEvent => return false,
        _ => {}
    }
    !event.header.is_artificial()
}

#[derive(Debug)]
struct RecorderInner {
    cur_start: Location,
    cur_end: Location,
    txn_end: Location,
    /// session binlog_format='statement'로 기록된 DML은 쿼리 이벤트로
    /// 나타나므로, BEGIN/COMMIT 사이 여부로 트랜잭션 경계를 구분합니다.
    in_dml: bool,
}

impl RecorderInner {
    fn save_txn_end(&mut self) {
        self.txn_end = self.cur_end.clone();
    }
}

/// 스트림별 위치 추적 상태 머신
///
/// update는 스트림 소비자가 한 이벤트씩 호출하고, cur_end는 상태 보고
/// 경로가 다른 태스크에서 읽으므로 내부 락으로 보호합니다.
pub struct LocationRecorder {
    inner: Mutex<RecorderInner>,
}

impl LocationRecorder {
    pub fn new() -> Self {
        let zero = Location::new("", 0);
        LocationRecorder {
            inner: Mutex::new(RecorderInner {
                cur_start: zero.clone(),
                cur_end: zero.clone(),
                txn_end: zero,
                in_dml: false,
            }),
        }
    }

    /// 스트림 시작 위치로 초기화
    ///
    /// in_dml도 함께 초기화되므로 이전 스트림의 statement-mode 감지
    /// 상태가 새 스트림으로 새지 않습니다.
    pub fn reset(&self, loc: Location) {
        let mut inner = self.inner.lock();
        inner.cur_start = loc.clone();
        inner.cur_end = loc.clone();
        inner.txn_end = loc;
        inner.in_dml = false;
    }

    pub fn cur_start_location(&self) -> Location {
        self.inner.lock().cur_start.clone()
    }

    pub fn cur_end_location(&self) -> Location {
        self.inner.lock().cur_end.clone()
    }

    pub fn txn_end_location(&self) -> Location {
        self.inner.lock().txn_end.clone()
    }

    pub fn in_dml(&self) -> bool {
        self.inner.lock().in_dml
    }

    /// 이벤트 하나를 반영하여 위치를 갱신
    ///
    /// - cur_start는 cur_end를 이어받습니다
    /// - cur_end는 제자리에서 갱신됩니다
    /// - 트랜잭션의 마지막 이벤트라면 txn_end에 cur_end를 복제합니다
    pub fn update(&self, event: &BinlogEvent) {
        let mut inner = self.inner.lock();

        inner.cur_start = inner.cur_end.clone();

        if !should_update_position(event) {
            return;
        }

        if let BinlogEventData::Rotate(rotate) = &event.data {
            if inner.cur_end.position.filename != rotate.next_binlog_name {
                inner.cur_end.position.filename = rotate.next_binlog_name.clone();
                inner.cur_end.position.position = FILE_HEADER_LEN;
                inner.save_txn_end();
            }
            return;
        }

        inner.cur_end.position.position = event.header.log_pos as u64;
        inner.cur_end.server_id = Some(event.header.server_id);

        match &event.data {
            BinlogEventData::Xid(xid) => {
                // InnoDB 같은 트랜잭션 엔진에서는 COMMIT이 XID 이벤트로 기록됨
                if let Some(gtid_set) = &xid.gtid_set {
                    inner.cur_end.gtid_set = gtid_set.clone();
                }
                inner.save_txn_end();
                inner.in_dml = false;
            }
            BinlogEventData::Query(query) => {
                match query.query.trim() {
                    "BEGIN" => {
                        // MySQL은 DML 트랜잭션 시작 시 "BEGIN" 쿼리 이벤트를 기록함.
                        // MariaDB는 기록하지 않으므로 statement-mode DML 구분이 불가능함.
                        inner.in_dml = true;
                    }
                    "COMMIT" => {
                        // MyISAM 같은 비트랜잭션 엔진에서는 COMMIT이 쿼리 이벤트로 기록됨
                        inner.in_dml = false;
                    }
                    _ => {}
                }

                if inner.in_dml {
                    return;
                }

                if let Some(gtid_set) = &query.gtid_set {
                    inner.cur_end.gtid_set = gtid_set.clone();
                }
                inner.save_txn_end();
            }
            BinlogEventData::MariadbGtid(gtid) => {
                if !gtid.is_ddl() {
                    inner.in_dml = true;
                }
            }
            _ => {}
        }
    }
}

impl Default for LocationRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocationRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        write!(
            f,
            "cur_start: {}, cur_end: {}, txn_end: {}",
            inner.cur_start, inner.cur_end, inner.txn_end
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{
        EventHeader, MariadbGtidEventData, QueryEventData, RotateEventData, XidEventData,
        LOG_EVENT_ARTIFICIAL_F, MARIADB_FL_DDL,
    };

    fn header(event_type: EventType, log_pos: u32) -> EventHeader {
        EventHeader {
            timestamp: 1700000000,
            event_type,
            server_id: 1,
            event_length: 0,
            log_pos,
            flags: 0,
        }
    }

    fn query_event(log_pos: u32, text: &str) -> BinlogEvent {
        BinlogEvent {
            header: header(EventType::QueryEvent, log_pos),
            data: BinlogEventData::Query(QueryEventData {
                thread_id: 1,
                exec_time: 0,
                database: "test".to_string(),
                query: text.to_string(),
                gtid_set: None,
            }),
        }
    }

    fn xid_event(log_pos: u32) -> BinlogEvent {
        BinlogEvent {
            header: header(EventType::XidEvent, log_pos),
            data: BinlogEventData::Xid(XidEventData {
                xid: 42,
                gtid_set: None,
            }),
        }
    }

    fn rotate_event(next_name: &str, log_pos: u32) -> BinlogEvent {
        BinlogEvent {
            header: header(EventType::RotateEvent, log_pos),
            data: BinlogEventData::Rotate(RotateEventData {
                next_binlog_name: next_name.to_string(),
                position: 4,
            }),
        }
    }

    fn heartbeat_event(log_pos: u32) -> BinlogEvent {
        BinlogEvent {
            header: header(EventType::HeartbeatEvent, log_pos),
            data: BinlogEventData::Unknown(Vec::new()),
        }
    }

    fn recorder_at(filename: &str, position: u64) -> LocationRecorder {
        let recorder = LocationRecorder::new();
        recorder.reset(Location::new(filename, position));
        recorder
    }

    #[test]
    fn test_start_follows_previous_end() {
        let recorder = recorder_at("mysql-bin.000001", 4);

        let events = vec![
            query_event(200, "CREATE TABLE t (id INT)"),
            query_event(350, "CREATE TABLE t2 (id INT)"),
            xid_event(500),
        ];

        let mut prev_end = recorder.cur_end_location();
        for event in &events {
            recorder.update(event);
            assert_eq!(recorder.cur_start_location(), prev_end);
            prev_end = recorder.cur_end_location();
        }
    }

    #[test]
    fn test_offset_monotonic_and_rotate_resets() {
        let recorder = recorder_at("mysql-bin.000001", 4);

        recorder.update(&query_event(200, "CREATE TABLE t (id INT)"));
        assert_eq!(recorder.cur_end_location().position.position, 200);

        recorder.update(&xid_event(300));
        assert_eq!(recorder.cur_end_location().position.position, 300);

        recorder.update(&rotate_event("mysql-bin.000002", 350));
        let end = recorder.cur_end_location();
        assert_eq!(end.position.filename, "mysql-bin.000002");
        assert_eq!(end.position.position, FILE_HEADER_LEN);
        assert_eq!(recorder.txn_end_location(), end);
    }

    #[test]
    fn test_rotate_to_same_file_is_noop() {
        let recorder = recorder_at("mysql-bin.000001", 120);

        recorder.update(&rotate_event("mysql-bin.000001", 150));
        let end = recorder.cur_end_location();
        assert_eq!(end.position.filename, "mysql-bin.000001");
        assert_eq!(end.position.position, 120);
    }

    #[test]
    fn test_statement_dml_does_not_advance_txn_end() {
        let recorder = recorder_at("mysql-bin.000001", 4);
        let start_txn_end = recorder.txn_end_location();

        recorder.update(&query_event(100, "BEGIN"));
        assert!(recorder.in_dml());
        assert_eq!(recorder.txn_end_location(), start_txn_end);

        recorder.update(&query_event(200, "INSERT INTO t VALUES (1)"));
        assert_eq!(recorder.txn_end_location(), start_txn_end);

        recorder.update(&query_event(300, "INSERT INTO t VALUES (2)"));
        assert_eq!(recorder.txn_end_location(), start_txn_end);

        recorder.update(&query_event(400, "COMMIT"));
        assert!(!recorder.in_dml());
        let txn_end = recorder.txn_end_location();
        assert_eq!(txn_end.position.position, 400);
    }

    #[test]
    fn test_xid_always_commits() {
        let recorder = recorder_at("mysql-bin.000001", 4);

        recorder.update(&query_event(100, "BEGIN"));
        recorder.update(&query_event(200, "INSERT INTO t VALUES (1)"));
        recorder.update(&xid_event(300));

        assert!(!recorder.in_dml());
        assert_eq!(recorder.txn_end_location().position.position, 300);
    }

    #[test]
    fn test_non_advancing_events_move_start_only() {
        let recorder = recorder_at("mysql-bin.000001", 4);

        recorder.update(&query_event(100, "CREATE TABLE t (id INT)"));
        let end_before = recorder.cur_end_location();

        recorder.update(&heartbeat_event(999));
        assert_eq!(recorder.cur_start_location(), end_before);
        assert_eq!(recorder.cur_end_location(), end_before);

        // 인공 이벤트도 위치를 전진시키지 않음
        let mut fake = rotate_event("mysql-bin.000009", 0);
        fake.header.flags |= LOG_EVENT_ARTIFICIAL_F;
        recorder.update(&fake);
        assert_eq!(recorder.cur_end_location(), end_before);
    }

    #[test]
    fn test_commit_event_applies_gtid() {
        let recorder = recorder_at("mysql-bin.000001", 4);
        let gtid_set =
            GtidSet::parse("550e8400-e29b-41d4-a716-446655440000:1-7").unwrap();

        let mut commit = xid_event(500);
        if let BinlogEventData::Xid(data) = &mut commit.data {
            data.gtid_set = Some(gtid_set.clone());
        }
        recorder.update(&commit);

        assert_eq!(recorder.cur_end_location().gtid_set, gtid_set);
        assert_eq!(recorder.txn_end_location().gtid_set, gtid_set);
    }

    #[test]
    fn test_mariadb_gtid_marks_dml() {
        let recorder = recorder_at("mysql-bin.000001", 4);

        let dml = BinlogEvent {
            header: header(EventType::MariadbGtidEvent, 100),
            data: BinlogEventData::MariadbGtid(MariadbGtidEventData {
                sequence: 9,
                domain_id: 0,
                flags: 0,
            }),
        };
        recorder.update(&dml);
        assert!(recorder.in_dml());

        recorder.update(&xid_event(200));
        assert!(!recorder.in_dml());

        let ddl = BinlogEvent {
            header: header(EventType::MariadbGtidEvent, 300),
            data: BinlogEventData::MariadbGtid(MariadbGtidEventData {
                sequence: 10,
                domain_id: 0,
                flags: MARIADB_FL_DDL,
            }),
        };
        recorder.update(&ddl);
        assert!(!recorder.in_dml());
    }

    #[test]
    fn test_reset_clears_dml_flag() {
        let recorder = recorder_at("mysql-bin.000001", 4);

        recorder.update(&query_event(100, "BEGIN"));
        assert!(recorder.in_dml());

        recorder.reset(Location::new("mysql-bin.000005", 4));
        assert!(!recorder.in_dml());

        // 재시작 직후의 일반 쿼리는 트랜잭션 경계로 취급됨
        recorder.update(&query_event(80, "CREATE TABLE t (id INT)"));
        assert_eq!(recorder.txn_end_location().position.position, 80);
    }
}
