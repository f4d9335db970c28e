//! GTID (Global Transaction ID) 관리
//!
//! GTID 형식: UUID:sequence-number
//! 여러 서버의 GTID 집합을 추적: "uuid1:1-100,uuid2:1-50"

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// GTID 시퀀스 범위 (양 끝 포함)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GtidRange {
    pub start: u64,
    pub end: u64,
}

impl GtidRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(RelayError::GtidError(format!(
                "Invalid range: {}-{}",
                start, end
            )));
        }
        Ok(GtidRange { start, end })
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.start && value <= self.end
    }

    /// 겹치거나 연접한 범위 병합
    fn try_merge(&self, other: &GtidRange) -> Option<GtidRange> {
        if self.end.saturating_add(1) >= other.start && other.end.saturating_add(1) >= self.start {
            Some(GtidRange {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            })
        } else {
            None
        }
    }
}

impl fmt::Display for GtidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// 전체 GTID 집합 (서버 UUID별 범위 목록)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtidSet {
    sets: BTreeMap<String, Vec<GtidRange>>,
}

impl GtidSet {
    pub fn new() -> Self {
        GtidSet {
            sets: BTreeMap::new(),
        }
    }

    /// GTID 집합 문자열 파싱
    ///
    /// "uuid1:1-100:200,uuid2:1-50"처럼 UUID마다 ':'로 구분된
    /// 범위가 이어지고, ','로 구분된 조각이 UUID로 시작하면
    /// 새 서버 집합이 시작됩니다.
    pub fn parse(gtid_str: &str) -> Result<Self> {
        let mut gtid_set = GtidSet::new();

        if gtid_str.is_empty() || gtid_str == "NULL" {
            return Ok(gtid_set);
        }

        let mut current_uuid: Option<String> = None;
        for segment in gtid_str.split(',') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            let intervals = match segment.split_once(':') {
                Some((head, rest)) if Uuid::parse_str(head).is_ok() => {
                    current_uuid = Some(head.to_string());
                    rest
                }
                _ => segment,
            };

            let uuid = current_uuid.clone().ok_or_else(|| {
                RelayError::GtidError(format!("Interval without UUID: {}", segment))
            })?;

            for interval in intervals.split(':') {
                let range = Self::parse_interval(interval)?;
                gtid_set.insert_range(&uuid, range);
            }
        }

        Ok(gtid_set)
    }

    fn parse_interval(interval: &str) -> Result<GtidRange> {
        let interval = interval.trim();
        match interval.split_once('-') {
            Some((start, end)) => {
                let start = start.parse::<u64>().map_err(|_| {
                    RelayError::GtidError(format!("Invalid interval: {}", interval))
                })?;
                let end = end.parse::<u64>().map_err(|_| {
                    RelayError::GtidError(format!("Invalid interval: {}", interval))
                })?;
                GtidRange::new(start, end)
            }
            None => {
                let seq = interval.parse::<u64>().map_err(|_| {
                    RelayError::GtidError(format!("Invalid sequence: {}", interval))
                })?;
                GtidRange::new(seq, seq)
            }
        }
    }

    /// 단일 GTID 추가 (format: "uuid:sequence")
    pub fn add_gtid(&mut self, gtid: &str) -> Result<()> {
        let (uuid, seq) = gtid
            .split_once(':')
            .ok_or_else(|| RelayError::GtidError(format!("Invalid GTID format: {}", gtid)))?;
        if Uuid::parse_str(uuid).is_err() {
            return Err(RelayError::GtidError(format!("Invalid GTID UUID: {}", gtid)));
        }
        let seq = seq
            .parse::<u64>()
            .map_err(|_| RelayError::GtidError(format!("Invalid sequence: {}", gtid)))?;

        self.insert_range(uuid, GtidRange { start: seq, end: seq });
        Ok(())
    }

    fn insert_range(&mut self, uuid: &str, range: GtidRange) {
        let ranges = self.sets.entry(uuid.to_string()).or_default();
        ranges.push(range);
        ranges.sort();

        // 정렬 후 한 번에 병합
        let mut merged: Vec<GtidRange> = Vec::with_capacity(ranges.len());
        for range in ranges.drain(..) {
            match merged.last_mut() {
                Some(last) => {
                    if let Some(joined) = last.try_merge(&range) {
                        *last = joined;
                    } else {
                        merged.push(range);
                    }
                }
                None => merged.push(range),
            }
        }
        *ranges = merged;
    }

    pub fn contains(&self, gtid: &str) -> bool {
        let Some((uuid, seq)) = gtid.split_once(':') else {
            return false;
        };
        let Ok(seq) = seq.parse::<u64>() else {
            return false;
        };
        self.sets
            .get(uuid)
            .map(|ranges| ranges.iter().any(|r| r.contains(seq)))
            .unwrap_or(false)
    }

    /// 다른 집합과 합집합
    pub fn merge(&mut self, other: &GtidSet) {
        for (uuid, ranges) in &other.sets {
            for range in ranges {
                self.insert_range(uuid, *range);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sets.values().all(|ranges| ranges.is_empty())
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (uuid, ranges) in &self.sets {
            if ranges.is_empty() {
                continue;
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            let range_strs: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
            write!(f, "{}:{}", uuid, range_strs.join(":"))?;
        }
        Ok(())
    }
}
