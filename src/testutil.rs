//! 테스트용 relay 파일 생성 도우미
//!
//! 디코더가 읽는 바이너리 형식 그대로 이벤트를 기록합니다.

use byteorder::{LittleEndian, WriteBytesExt};
use uuid::Uuid;

use crate::decoder::BINLOG_MAGIC;
use crate::events::EVENT_HEADER_LEN;

/// 테스트 이벤트 타임스탬프 (0이 아니어야 진짜 이벤트로 취급됨)
pub const TEST_TIMESTAMP: u32 = 1_700_000_000;

/// Relay 파일 바이트 빌더
pub struct RelayFileBuilder {
    buf: Vec<u8>,
    pos: u64,
    server_id: u32,
}

impl RelayFileBuilder {
    /// 매직 넘버로 시작하는 새 파일
    pub fn new(server_id: u32) -> Self {
        RelayFileBuilder {
            buf: BINLOG_MAGIC.to_vec(),
            pos: BINLOG_MAGIC.len() as u64,
            server_id,
        }
    }

    /// 기존 파일 꼬리에 이어 붙일 조각 (매직 없음)
    pub fn continuation(server_id: u32, start_pos: u64) -> Self {
        RelayFileBuilder {
            buf: Vec::new(),
            pos: start_pos,
            server_id,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// 다음 이벤트가 기록될 파일 내 위치
    pub fn pos(&self) -> u64 {
        self.pos
    }

    fn push_event(&mut self, event_type: u8, flags: u16, body: &[u8]) -> &mut Self {
        let event_length = (EVENT_HEADER_LEN + body.len()) as u32;
        self.pos += event_length as u64;

        self.buf.write_u32::<LittleEndian>(TEST_TIMESTAMP).unwrap();
        self.buf.write_u8(event_type).unwrap();
        self.buf.write_u32::<LittleEndian>(self.server_id).unwrap();
        self.buf.write_u32::<LittleEndian>(event_length).unwrap();
        self.buf.write_u32::<LittleEndian>(self.pos as u32).unwrap();
        self.buf.write_u16::<LittleEndian>(flags).unwrap();
        self.buf.extend_from_slice(body);
        self
    }

    pub fn format_description(&mut self) -> &mut Self {
        self.push_event(15, 0, &[0u8; 57])
    }

    pub fn query(&mut self, database: &str, sql: &str) -> &mut Self {
        let mut body = Vec::new();
        body.write_u32::<LittleEndian>(1).unwrap(); // thread_id
        body.write_u32::<LittleEndian>(0).unwrap(); // exec_time
        body.write_u8(database.len() as u8).unwrap();
        body.write_u16::<LittleEndian>(0).unwrap(); // error_code
        body.write_u16::<LittleEndian>(0).unwrap(); // status vars 없음
        body.extend_from_slice(database.as_bytes());
        body.push(0);
        body.extend_from_slice(sql.as_bytes());
        self.push_event(2, 0, &body)
    }

    pub fn xid(&mut self, xid: u64) -> &mut Self {
        let mut body = Vec::new();
        body.write_u64::<LittleEndian>(xid).unwrap();
        self.push_event(16, 0, &body)
    }

    pub fn gtid(&mut self, uuid: &str, gno: u64) -> &mut Self {
        let uuid = Uuid::parse_str(uuid).unwrap();
        let mut body = Vec::new();
        body.write_u8(1).unwrap();
        body.extend_from_slice(uuid.as_bytes());
        body.write_u64::<LittleEndian>(gno).unwrap();
        self.push_event(33, 0, &body)
    }

    pub fn rotate(&mut self, next_name: &str, position: u64) -> &mut Self {
        let mut body = Vec::new();
        body.write_u64::<LittleEndian>(position).unwrap();
        body.extend_from_slice(next_name.as_bytes());
        self.push_event(4, 0, &body)
    }

    pub fn heartbeat(&mut self) -> &mut Self {
        self.push_event(27, 0, &[])
    }
}
