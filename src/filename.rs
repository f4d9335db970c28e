//! Relay 파일명 코덱
//!
//! 서로 다른 마스터 epoch의 binlog 위치를 구분하기 위해 파일명에
//! UUID suffix를 끼워 넣습니다:
//!
//! `mysql-bin.000003` (sub dir `c6ae5afe-....000002` 안)
//!   => `mysql-bin|000002.000003`
//!
//! suffix가 붙은 위치는 suffix가 없는 위치보다 항상 뒤로 정렬되므로
//! suffix 없는 위치에서 자동으로 이어받을 수 있습니다.

use crate::error::{RelayError, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

/// 파일명에 epoch suffix를 끼워 넣을 때 쓰는 구분자
pub const POS_UUID_SUFFIX_SEPARATOR: char = '|';

fn filename_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<base>.+)\.(?P<seq>\d+)$").expect("valid regex"))
}

/// 분해된 relay 파일명
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinlogFilename {
    /// 베이스 이름 (e.g., "mysql-bin")
    pub base_name: String,
    /// epoch suffix (인코딩된 이름에만 존재, e.g., "000002")
    pub uuid_suffix: Option<String>,
    /// 고정폭 십진수 시퀀스 (e.g., "000003")
    pub sequence: String,
}

impl BinlogFilename {
    /// 파일명 파싱 (인코딩된 형식과 실제 형식 모두 지원)
    pub fn parse(name: &str) -> Result<Self> {
        let captures = filename_regex().captures(name).ok_or_else(|| {
            RelayError::BinlogParseError(format!("Invalid binlog filename: {}", name))
        })?;
        let base = &captures["base"];
        let sequence = captures["seq"].to_string();

        match base.split_once(POS_UUID_SUFFIX_SEPARATOR) {
            Some((base_name, suffix)) => {
                if base_name.is_empty() || suffix.is_empty() {
                    return Err(RelayError::BinlogParseError(format!(
                        "Invalid binlog filename: {}",
                        name
                    )));
                }
                Ok(BinlogFilename {
                    base_name: base_name.to_string(),
                    uuid_suffix: Some(suffix.to_string()),
                    sequence,
                })
            }
            None => Ok(BinlogFilename {
                base_name: base.to_string(),
                uuid_suffix: None,
                sequence,
            }),
        }
    }

    /// 시퀀스 번호
    pub fn sequence_number(&self) -> u64 {
        self.sequence.parse().unwrap_or(0)
    }

    /// suffix를 뺀 실제 디스크상의 파일명
    pub fn real_name(&self) -> String {
        format!("{}.{}", self.base_name, self.sequence)
    }

    /// 지정한 epoch suffix를 끼운 인코딩된 파일명
    pub fn with_suffix(&self, uuid_suffix: &str) -> String {
        format!(
            "{}{}{}.{}",
            self.base_name, POS_UUID_SUFFIX_SEPARATOR, uuid_suffix, self.sequence
        )
    }
}

impl fmt::Display for BinlogFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.uuid_suffix {
            Some(suffix) => write!(
                f,
                "{}{}{}.{}",
                self.base_name, POS_UUID_SUFFIX_SEPARATOR, suffix, self.sequence
            ),
            None => write!(f, "{}.{}", self.base_name, self.sequence),
        }
    }
}

impl PartialOrd for BinlogFilename {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BinlogFilename {
    /// (base, suffix, 시퀀스 번호) 순의 전순서.
    /// suffix 없는 이름이 suffix 있는 이름보다 앞에 옵니다.
    fn cmp(&self, other: &Self) -> Ordering {
        self.base_name
            .cmp(&other.base_name)
            .then_with(|| self.uuid_suffix.cmp(&other.uuid_suffix))
            .then_with(|| self.sequence_number().cmp(&other.sequence_number()))
    }
}

/// relay 파일명으로 해석 가능한지 여부 (meta 파일 등 걸러내기용)
pub fn is_relay_filename(name: &str) -> bool {
    BinlogFilename::parse(name).is_ok()
}
