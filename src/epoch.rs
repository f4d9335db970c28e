//! 마스터 epoch (relay sub directory) 관리
//!
//! relay 루트 아래에는 마스터 UUID마다 하나씩 sub directory가 있습니다:
//!
//! ```text
//! relay/
//!   server-uuid.index                               (epoch 목록, 오래된 순)
//!   c6ae5afe-c7a3-11e8-a19d-0242ac130006.000001/
//!     relay.meta
//!     mysql-bin.000001
//!     mysql-bin.000002
//!   0e52f8bb-e95c-11e8-8a57-0242ac130004.000002/
//!     ...
//! ```
//!
//! 디렉터리 이름의 마지막 숫자가 epoch suffix이며, 파일명 인코딩에
//! 쓰입니다.

use crate::error::{RelayError, Result};
use crate::filename::BinlogFilename;
use std::path::Path;
use tokio::fs;
use uuid::Uuid;

/// relay 루트의 epoch 목록 파일명
pub const UUID_INDEX_FILENAME: &str = "server-uuid.index";

/// 각 epoch 디렉터리의 메타데이터 파일명 (파일 열거 시 건너뜀)
pub const META_FILENAME: &str = "relay.meta";

/// epoch suffix의 고정폭
const SUFFIX_WIDTH: usize = 6;

/// suffix 정수를 고정폭 문자열로 변환 (2 → "000002")
pub fn suffix_to_string(suffix: u32) -> String {
    format!("{:0width$}", suffix, width = SUFFIX_WIDTH)
}

/// epoch 디렉터리 이름에서 (서버 UUID, suffix) 추출
///
/// "c6ae5afe-c7a3-11e8-a19d-0242ac130006.000002" → (uuid, 2)
pub fn parse_uuid_suffix(dir_name: &str) -> Result<(String, u32)> {
    let (uuid, suffix) = dir_name.rsplit_once('.').ok_or_else(|| {
        RelayError::Internal(format!("relay sub dir name without suffix: {}", dir_name))
    })?;
    if Uuid::parse_str(uuid).is_err() {
        return Err(RelayError::Internal(format!(
            "relay sub dir name with invalid UUID: {}",
            dir_name
        )));
    }
    let suffix = suffix.parse::<u32>().map_err(|_| {
        RelayError::Internal(format!("relay sub dir name with invalid suffix: {}", dir_name))
    })?;
    Ok((uuid.to_string(), suffix))
}

/// 목록에서 suffix가 일치하는 epoch 찾기
pub fn uuid_by_suffix(uuids: &[String], suffix: &str) -> Option<String> {
    uuids
        .iter()
        .find(|uuid| {
            parse_uuid_suffix(uuid)
                .map(|(_, s)| suffix_to_string(s) == suffix)
                .unwrap_or(false)
        })
        .cloned()
}

/// 현재 epoch의 다음 epoch과 그 suffix 문자열 찾기
///
/// 목록은 오래된 순이므로 현재 epoch이 마지막이면 다음은 없습니다.
pub fn next_uuid(uuids: &[String], current: &str) -> Option<(String, String)> {
    for i in (0..uuids.len().saturating_sub(1)).rev() {
        if uuids[i] == current {
            let next = uuids[i + 1].clone();
            let suffix = parse_uuid_suffix(&next).ok().map(|(_, s)| suffix_to_string(s))?;
            return Some((next, suffix));
        }
    }
    None
}

/// UUID index 파일 읽기 (한 줄에 epoch 하나, 오래된 순)
pub async fn parse_uuid_index(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).await.map_err(|e| {
        RelayError::NotFound(format!("relay UUID index file {}: {}", path.display(), e))
    })?;

    let uuids: Vec<String> = content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect();
    Ok(uuids)
}

/// epoch 디렉터리에서 첫 relay 파일명 찾기 (meta 파일은 건너뜀)
pub async fn first_relay_filename(dir: &Path) -> Result<String> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| {
        RelayError::IoError(format!("read relay dir {}: {}", dir.display(), e))
    })?;

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort();

    for name in names {
        if name == META_FILENAME || name == UUID_INDEX_FILENAME {
            continue;
        }
        BinlogFilename::parse(&name)?;
        return Ok(name);
    }

    Err(RelayError::NotFound(format!(
        "binlog files in dir {}",
        dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const EPOCH1: &str = "c6ae5afe-c7a3-11e8-a19d-0242ac130006.000001";
    const EPOCH2: &str = "0e52f8bb-e95c-11e8-8a57-0242ac130004.000002";

    #[test]
    fn test_parse_uuid_suffix() {
        let (uuid, suffix) = parse_uuid_suffix(EPOCH1).unwrap();
        assert_eq!(uuid, "c6ae5afe-c7a3-11e8-a19d-0242ac130006");
        assert_eq!(suffix, 1);
        assert_eq!(suffix_to_string(suffix), "000001");

        assert!(parse_uuid_suffix("no-suffix-here").is_err());
        assert!(parse_uuid_suffix("not-a-uuid.000001").is_err());
    }

    #[test]
    fn test_uuid_by_suffix() {
        let uuids = vec![EPOCH1.to_string(), EPOCH2.to_string()];
        assert_eq!(uuid_by_suffix(&uuids, "000002"), Some(EPOCH2.to_string()));
        assert_eq!(uuid_by_suffix(&uuids, "000009"), None);
    }

    #[test]
    fn test_next_uuid() {
        let uuids = vec![EPOCH1.to_string(), EPOCH2.to_string()];

        let (next, suffix) = next_uuid(&uuids, EPOCH1).unwrap();
        assert_eq!(next, EPOCH2);
        assert_eq!(suffix, "000002");

        // 마지막 epoch의 다음은 없음
        assert_eq!(next_uuid(&uuids, EPOCH2), None);
        assert_eq!(next_uuid(&uuids, "unknown"), None);
    }

    #[tokio::test]
    async fn test_parse_uuid_index() {
        let dir = tempfile::tempdir().unwrap();
        let index_path: PathBuf = dir.path().join(UUID_INDEX_FILENAME);

        tokio::fs::write(&index_path, format!("{}\n{}\n\n", EPOCH1, EPOCH2))
            .await
            .unwrap();

        let uuids = parse_uuid_index(&index_path).await.unwrap();
        assert_eq!(uuids, vec![EPOCH1.to_string(), EPOCH2.to_string()]);

        let missing = dir.path().join("missing.index");
        assert!(matches!(
            parse_uuid_index(&missing).await,
            Err(RelayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_first_relay_filename() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(META_FILENAME), "meta")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("mysql-bin.000002"), "x")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("mysql-bin.000001"), "x")
            .await
            .unwrap();

        let first = first_relay_filename(dir.path()).await.unwrap();
        assert_eq!(first, "mysql-bin.000001");
    }

    #[tokio::test]
    async fn test_first_relay_filename_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            first_relay_filename(dir.path()).await,
            Err(RelayError::NotFound(_))
        ));
    }
}
