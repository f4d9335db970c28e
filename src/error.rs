//! Relay 처리 관련 에러 타입

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("binlog 파일명이 지정되지 않았습니다")]
    PositionRequired,

    #[error("relay reader가 이미 실행 중입니다")]
    AlreadyRunning,

    #[error("찾을 수 없습니다: {0}")]
    NotFound(String),

    #[error("relay 파일 크기가 줄어들었습니다: {} ({last_size} -> {current_size})", path.display())]
    FileShrunk {
        path: PathBuf,
        last_size: u64,
        current_size: u64,
    },

    #[error("binlog 파일이 이벤트 중간에 끝났습니다: {}:{offset}", path.display())]
    UnexpectedEof { path: PathBuf, offset: u64 },

    #[error("Binlog 파싱 에러: {0}")]
    BinlogParseError(String),

    #[error("GTID 처리 에러: {0}")]
    GtidError(String),

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("채널이 닫혔습니다")]
    ChannelClosed,

    #[error("작업이 취소되었습니다")]
    Canceled,

    #[error("내부 상태 에러: {0}")]
    Internal(String),
}

impl From<io::Error> for RelayError {
    fn from(err: io::Error) -> Self {
        RelayError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
