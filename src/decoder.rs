//! Relay 파일 binlog 이벤트 디코더
//!
//! Binlog 파일의 바이너리 형식을 파싱합니다.
//! 헤더: 4 바이트 매직 넘버 (0xfe 0x62 0x69 0x6e)
//! 각 이벤트:
//!   - Timestamp (4 bytes)
//!   - Type (1 byte)
//!   - Server ID (4 bytes)
//!   - Event Length (4 bytes)
//!   - Log Position (4 bytes)
//!   - Flags (2 bytes)
//!   - Event Data (variable)
//!
//! 디코더는 콜백이 아니라 pull 방식입니다: `next_event`가 이벤트를
//! 하나씩 돌려주고, 파일 끝에서 `Ok(None)`을 돌려줍니다. 이벤트
//! 중간에서 파일이 끝나면 `UnexpectedEof`를 돌려주는데, 이는 아직
//! 기록 중인 파일의 꼬리일 수 있다는 신호입니다.

use crate::error::{RelayError, Result};
use crate::events::{
    BinlogEvent, BinlogEventData, EventHeader, EventType, GtidEventData, MariadbGtidEventData,
    QueryEventData, RotateEventData, XidEventData, EVENT_HEADER_LEN, FILE_HEADER_LEN,
};
use crate::gtid::GtidSet;
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Buf;
use std::io::{Cursor, SeekFrom};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

/// Binlog 파일 매직 넘버 (".bin" in ASCII)
pub(crate) const BINLOG_MAGIC: [u8; 4] = [0xfe, 0x62, 0x69, 0x6e];

/// Relay 파일 하나를 지정 오프셋부터 읽는 디코더
pub struct BinlogFileDecoder {
    path: PathBuf,
    file: File,
    offset: u64,
    /// 이번 디코드 동안 관측된 GTID 누적 (커밋 이벤트에 첨부)
    gtid_set: GtidSet,
}

impl BinlogFileDecoder {
    /// 파일을 열고 매직 넘버 확인 후 오프셋으로 이동
    pub async fn open(path: impl Into<PathBuf>, offset: u64) -> Result<Self> {
        let path = path.into();
        if offset < FILE_HEADER_LEN {
            return Err(RelayError::BinlogParseError(format!(
                "invalid start offset {} for {}",
                offset,
                path.display()
            )));
        }

        let mut file = File::open(&path).await.map_err(|e| {
            RelayError::IoError(format!("open binlog file {}: {}", path.display(), e))
        })?;

        let mut magic = [0u8; FILE_HEADER_LEN as usize];
        file.read_exact(&mut magic).await.map_err(|_| {
            RelayError::BinlogParseError(format!(
                "binlog file {} too short for magic number",
                path.display()
            ))
        })?;
        if magic != BINLOG_MAGIC {
            return Err(RelayError::BinlogParseError(format!(
                "invalid binlog magic number in {}",
                path.display()
            )));
        }

        if offset > FILE_HEADER_LEN {
            file.seek(SeekFrom::Start(offset)).await.map_err(|e| {
                RelayError::IoError(format!("seek binlog file {}: {}", path.display(), e))
            })?;
        }

        Ok(BinlogFileDecoder {
            path,
            file,
            offset,
            gtid_set: GtidSet::new(),
        })
    }

    /// 다음에 읽을 파일 내 오프셋
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 다음 이벤트 디코드
    ///
    /// 이벤트 경계에서 파일이 끝나면 `Ok(None)`,
    /// 이벤트 중간에서 끝나면 `UnexpectedEof`.
    pub async fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
        let mut header_buf = [0u8; EVENT_HEADER_LEN];
        let read = self.read_full(&mut header_buf).await?;
        if read == 0 {
            return Ok(None);
        }
        if read < EVENT_HEADER_LEN {
            return Err(RelayError::UnexpectedEof {
                path: self.path.clone(),
                offset: self.offset,
            });
        }

        let header = parse_header(&header_buf)?;
        if (header.event_length as usize) < EVENT_HEADER_LEN {
            return Err(RelayError::BinlogParseError(format!(
                "event length {} below header size at {}:{}",
                header.event_length,
                self.path.display(),
                self.offset
            )));
        }

        let body_len = header.event_length as usize - EVENT_HEADER_LEN;
        let mut body = vec![0u8; body_len];
        let read = self.read_full(&mut body).await?;
        if read < body_len {
            return Err(RelayError::UnexpectedEof {
                path: self.path.clone(),
                offset: self.offset,
            });
        }

        let mut data = parse_event_data(&header, body).map_err(|err| {
            RelayError::BinlogParseError(format!(
                "{} at {}:{}",
                err,
                self.path.display(),
                self.offset
            ))
        })?;
        match &mut data {
            BinlogEventData::Gtid(gtid) => {
                self.gtid_set.add_gtid(&gtid.gtid)?;
            }
            BinlogEventData::Xid(xid) => {
                xid.gtid_set = Some(self.gtid_set.clone());
            }
            BinlogEventData::Query(query) => {
                query.gtid_set = Some(self.gtid_set.clone());
            }
            _ => {}
        }

        self.offset += header.event_length as u64;
        Ok(Some(BinlogEvent { header, data }))
    }

    /// buf가 가득 차거나 EOF에 도달할 때까지 읽음
    async fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut read = 0;
        while read < buf.len() {
            let n = self.file.read(&mut buf[read..]).await.map_err(|e| {
                RelayError::IoError(format!("read binlog file {}: {}", self.path.display(), e))
            })?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }
}

/// 이벤트 공통 헤더 파싱
fn parse_header(data: &[u8]) -> Result<EventHeader> {
    let mut cursor = Cursor::new(data);

    let timestamp = ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)?;
    let event_type = ReadBytesExt::read_u8(&mut cursor)?;
    let server_id = ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)?;
    let event_length = ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)?;
    let log_pos = ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)?;
    let flags = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)?;

    Ok(EventHeader {
        timestamp,
        event_type: EventType::from_u8(event_type),
        server_id,
        event_length,
        log_pos,
        flags,
    })
}

/// 위치 추적에 필요한 이벤트 페이로드 파싱
fn parse_event_data(header: &EventHeader, body: Vec<u8>) -> Result<BinlogEventData> {
    match header.event_type {
        EventType::RotateEvent => parse_rotate(&body),
        EventType::QueryEvent => parse_query(&body),
        EventType::XidEvent => parse_xid(&body),
        EventType::GtidEvent => parse_gtid(&body),
        EventType::MariadbGtidEvent => parse_mariadb_gtid(&body),
        _ => Ok(BinlogEventData::Unknown(body)),
    }
}

/// 로테이션 이벤트 파싱 (position 8 bytes + 다음 파일명)
fn parse_rotate(body: &[u8]) -> Result<BinlogEventData> {
    let mut buf = body;
    if buf.remaining() < 8 {
        return Err(RelayError::BinlogParseError(
            "rotate event too short".to_string(),
        ));
    }
    let position = buf.get_u64_le();
    let next_binlog_name = String::from_utf8_lossy(buf).to_string();

    Ok(BinlogEventData::Rotate(RotateEventData {
        next_binlog_name,
        position,
    }))
}

/// 쿼리 이벤트 파싱
fn parse_query(body: &[u8]) -> Result<BinlogEventData> {
    let mut buf = body;
    if buf.remaining() < 13 {
        return Err(RelayError::BinlogParseError(
            "query event too short".to_string(),
        ));
    }
    let thread_id = buf.get_u32_le();
    let exec_time = buf.get_u32_le();
    let db_len = buf.get_u8() as usize;
    let _error_code = buf.get_u16_le();
    let status_len = buf.get_u16_le() as usize;

    // status vars + 데이터베이스명 + null 종결자
    if buf.remaining() < status_len + db_len + 1 {
        return Err(RelayError::BinlogParseError(
            "query event too short".to_string(),
        ));
    }
    buf.advance(status_len);
    let database = String::from_utf8_lossy(&buf[..db_len]).to_string();
    buf.advance(db_len + 1);
    let query = String::from_utf8_lossy(buf).to_string();

    Ok(BinlogEventData::Query(QueryEventData {
        thread_id,
        exec_time,
        database,
        query,
        gtid_set: None,
    }))
}

/// XID 이벤트 파싱 (xid 8 bytes)
fn parse_xid(body: &[u8]) -> Result<BinlogEventData> {
    let mut buf = body;
    if buf.remaining() < 8 {
        return Err(RelayError::BinlogParseError(
            "xid event too short".to_string(),
        ));
    }
    let xid = buf.get_u64_le();

    Ok(BinlogEventData::Xid(XidEventData {
        xid,
        gtid_set: None,
    }))
}

/// GTID 이벤트 파싱 (flags 1 + sid 16 + gno 8, 이후는 무시)
fn parse_gtid(body: &[u8]) -> Result<BinlogEventData> {
    let mut buf = body;
    if buf.remaining() < 25 {
        return Err(RelayError::BinlogParseError(
            "gtid event too short".to_string(),
        ));
    }
    let flags = buf.get_u8();
    let mut sid = [0u8; 16];
    buf.copy_to_slice(&mut sid);
    let gno = buf.get_u64_le();

    let uuid = Uuid::from_bytes(sid);
    Ok(BinlogEventData::Gtid(GtidEventData {
        gtid: format!("{}:{}", uuid, gno),
        flags,
    }))
}

/// MariaDB GTID 이벤트 파싱 (sequence 8 + domain 4 + flags 1)
fn parse_mariadb_gtid(body: &[u8]) -> Result<BinlogEventData> {
    let mut buf = body;
    if buf.remaining() < 13 {
        return Err(RelayError::BinlogParseError(
            "mariadb gtid event too short".to_string(),
        ));
    }
    let sequence = buf.get_u64_le();
    let domain_id = buf.get_u32_le();
    let flags = buf.get_u8();

    Ok(BinlogEventData::MariadbGtid(MariadbGtidEventData {
        sequence,
        domain_id,
        flags,
    }))
}
