//! MySQL Binlog 이벤트 타입 및 데이터 구조 정의
//!
//! Relay 로그 파일에 기록된 이벤트의 공통 헤더와,
//! 위치 추적에 필요한 이벤트 페이로드를 정의합니다.

use crate::gtid::GtidSet;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Binlog 파일 헤더 길이 (매직 넘버 4 바이트)
pub const FILE_HEADER_LEN: u64 = 4;

/// 이벤트 공통 헤더 길이
pub const EVENT_HEADER_LEN: usize = 19;

/// Relay writer가 마스터 전환 시 공백을 메우기 위해 만든 이벤트 플래그
pub const LOG_EVENT_RELAY_LOG_F: u16 = 0x0040;

/// 서버가 실제로 기록하지 않은 인공(artificial) 이벤트 플래그
pub const LOG_EVENT_ARTIFICIAL_F: u16 = 0x0020;

/// MariaDB GTID 이벤트의 DDL 플래그
pub const MARIADB_FL_DDL: u8 = 0x20;

/// MySQL Binlog 이벤트 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    /// 알 수 없는 이벤트
    Unknown = 0,
    /// 쿼리 이벤트 (DDL, BEGIN/COMMIT)
    QueryEvent = 2,
    /// 로테이션 이벤트 (새 binlog 파일)
    RotateEvent = 4,
    /// 포맷 기술 이벤트 (파일 선두)
    FormatDescriptionEvent = 15,
    /// XID 이벤트 (트랜잭션 엔진 커밋)
    XidEvent = 16,
    /// 테이블 맵 이벤트 (스키마 정보)
    TableMapEvent = 19,
    /// 하트비트 이벤트
    HeartbeatEvent = 27,
    /// 무시 가능한 이벤트
    IgnorableEvent = 28,
    /// WRITE_ROWS 이벤트 (INSERT)
    WriteRowsEvent = 30,
    /// UPDATE_ROWS 이벤트 (UPDATE)
    UpdateRowsEvent = 31,
    /// DELETE_ROWS 이벤트 (DELETE)
    DeleteRowsEvent = 32,
    /// GTID 이벤트 (Global Transaction ID)
    GtidEvent = 33,
    /// 익명 GTID 이벤트
    AnonymousGtidEvent = 34,
    /// PREVIOUS_GTIDS 이벤트 (파일 선두의 GTID 스냅샷)
    PreviousGtidsEvent = 35,
    /// MariaDB GTID 이벤트
    MariadbGtidEvent = 162,
    /// MariaDB GTID 리스트 이벤트
    MariadbGtidListEvent = 163,
}

impl EventType {
    pub fn from_u8(val: u8) -> Self {
        match val {
            2 => EventType::QueryEvent,
            4 => EventType::RotateEvent,
            15 => EventType::FormatDescriptionEvent,
            16 => EventType::XidEvent,
            19 => EventType::TableMapEvent,
            27 => EventType::HeartbeatEvent,
            28 => EventType::IgnorableEvent,
            30 => EventType::WriteRowsEvent,
            31 => EventType::UpdateRowsEvent,
            32 => EventType::DeleteRowsEvent,
            33 => EventType::GtidEvent,
            34 => EventType::AnonymousGtidEvent,
            35 => EventType::PreviousGtidsEvent,
            162 => EventType::MariadbGtidEvent,
            163 => EventType::MariadbGtidListEvent,
            _ => EventType::Unknown,
        }
    }
}

/// Binlog 이벤트 헤더 (19 바이트 고정)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위)
    pub timestamp: u32,
    /// 이벤트 타입
    pub event_type: EventType,
    /// MySQL 서버 ID
    pub server_id: u32,
    /// 이벤트 길이 (헤더 포함, 바이트)
    pub event_length: u32,
    /// 이 이벤트가 끝나는 파일 내 위치
    pub log_pos: u32,
    /// 이벤트 플래그
    pub flags: u16,
}

impl EventHeader {
    /// 서버가 실제로 기록하지 않은 인공 이벤트 여부
    pub fn is_artificial(&self) -> bool {
        self.flags & LOG_EVENT_ARTIFICIAL_F != 0
    }

    /// relay writer가 만들어 넣은 이벤트 여부
    pub fn is_relay_log_event(&self) -> bool {
        self.flags & LOG_EVENT_RELAY_LOG_F != 0
    }

    /// 타임스탬프를 UTC 시각으로 변환
    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.timestamp as i64, 0)
            .single()
            .unwrap_or_default()
    }
}

/// 로테이션 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateEventData {
    /// 다음 바이너리 로그 파일명
    pub next_binlog_name: String,
    /// 다음 파일에서 읽기 시작할 위치
    pub position: u64,
}

/// 쿼리 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEventData {
    /// 스레드 ID
    pub thread_id: u32,
    /// 실행 시간 (초)
    pub exec_time: u32,
    /// 데이터베이스명
    pub database: String,
    /// 쿼리 문자열
    pub query: String,
    /// 커밋 시점에 적용된 GTID 집합 (있는 경우)
    pub gtid_set: Option<GtidSet>,
}

/// XID 이벤트 데이터 (트랜잭션 엔진의 커밋)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XidEventData {
    /// 트랜잭션 XID
    pub xid: u64,
    /// 커밋 시점에 적용된 GTID 집합 (있는 경우)
    pub gtid_set: Option<GtidSet>,
}

/// GTID 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtidEventData {
    /// GTID 문자열 (format: uuid:sequence-number)
    pub gtid: String,
    /// 커밋 플래그
    pub flags: u8,
}

/// MariaDB GTID 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MariadbGtidEventData {
    /// 시퀀스 번호
    pub sequence: u64,
    /// 도메인 ID
    pub domain_id: u32,
    /// GTID 플래그
    pub flags: u8,
}

impl MariadbGtidEventData {
    /// 이 GTID가 DDL 트랜잭션을 선언하는지 여부
    pub fn is_ddl(&self) -> bool {
        self.flags & MARIADB_FL_DDL != 0
    }
}

/// 위치 추적에 필요한 이벤트 페이로드
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BinlogEventData {
    Rotate(RotateEventData),
    Query(QueryEventData),
    Xid(XidEventData),
    Gtid(GtidEventData),
    MariadbGtid(MariadbGtidEventData),
    /// 위치 추적과 무관한 이벤트의 원본 페이로드
    Unknown(Vec<u8>),
}

/// 완성된 Binlog 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinlogEvent {
    /// 이벤트 헤더
    pub header: EventHeader,
    /// 이벤트 데이터
    pub data: BinlogEventData,
}

impl BinlogEvent {
    /// 새 파일 읽기 시작을 알리는 가짜 ROTATE 이벤트 생성
    ///
    /// 업스트림 복제 세션이 시작될 때 서버가 보내는 이벤트를 흉내냅니다.
    /// timestamp와 log_pos가 0이므로 위치 갱신에는 사용되지 않습니다.
    pub fn fake_rotate(next_binlog_name: &str, position: u64, server_id: u32) -> Self {
        let body_len = 8 + next_binlog_name.len();
        BinlogEvent {
            header: EventHeader {
                timestamp: 0,
                event_type: EventType::RotateEvent,
                server_id,
                event_length: (EVENT_HEADER_LEN + body_len) as u32,
                log_pos: 0,
                flags: LOG_EVENT_ARTIFICIAL_F,
            },
            data: BinlogEventData::Rotate(RotateEventData {
                next_binlog_name: next_binlog_name.to_string(),
                position,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_from_u8() {
        assert_eq!(EventType::from_u8(4), EventType::RotateEvent);
        assert_eq!(EventType::from_u8(16), EventType::XidEvent);
        assert_eq!(EventType::from_u8(35), EventType::PreviousGtidsEvent);
        assert_eq!(EventType::from_u8(200), EventType::Unknown);
    }

    #[test]
    fn test_fake_rotate() {
        let event = BinlogEvent::fake_rotate("mysql-bin|000001.000003", 4, 7);
        assert!(event.header.is_artificial());
        assert_eq!(event.header.timestamp, 0);
        assert_eq!(event.header.log_pos, 0);
        assert_eq!(event.header.server_id, 7);

        match event.data {
            BinlogEventData::Rotate(rotate) => {
                assert_eq!(rotate.next_binlog_name, "mysql-bin|000001.000003");
                assert_eq!(rotate.position, 4);
            }
            _ => panic!("expected rotate data"),
        }
    }

    #[test]
    fn test_mariadb_gtid_ddl_flag() {
        let gtid = MariadbGtidEventData {
            sequence: 10,
            domain_id: 0,
            flags: MARIADB_FL_DDL,
        };
        assert!(gtid.is_ddl());

        let dml = MariadbGtidEventData {
            sequence: 11,
            domain_id: 0,
            flags: 0,
        };
        assert!(!dml.is_ddl());
    }
}
