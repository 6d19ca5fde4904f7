//! Binlog 처리 위치 추적 및 체크포인트 순서 보장
//!
//! Binlog 파일명 + 위치로 재시작 지점을 표현하고,
//! 비동기 전송이 순서 없이 완료되더라도 체크포인트는 수신 순서대로만 전진시킵니다.

use crate::error::RelayError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

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
        self.filename
            .split('.')
            .last()
            .and_then(|s| s.parse().ok())
    }
}

impl Ord for BinlogPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.file_sequence()
            .cmp(&other.file_sequence())
            .then_with(|| self.filename.cmp(&other.filename))
            .then_with(|| self.position.cmp(&other.position))
    }
}

impl PartialOrd for BinlogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.position)
    }
}

/// "mysql-bin.000003:4097" 형식 파싱
impl FromStr for BinlogPosition {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (filename, position) = s
            .rsplit_once(':')
            .ok_or_else(|| RelayError::InvalidRecord(format!("Invalid position: {}", s)))?;
        let position = position
            .parse::<u64>()
            .map_err(|_| RelayError::InvalidRecord(format!("Invalid position offset: {}", s)))?;
        if filename.is_empty() {
            return Err(RelayError::InvalidRecord(format!("Invalid position file: {}", s)));
        }
        Ok(BinlogPosition::new(filename, position))
    }
}

/// 상위 리더가 제공하는 체크포인트 저장소
///
/// 수신된 레코드마다 정확히 한 번, 수신 순서대로 호출됩니다.
pub trait Checkpointer: Send + Sync {
    fn set_position(&self, position: &BinlogPosition);
}

/// 마지막 체크포인트를 메모리에 보관하는 기본 구현
#[derive(Debug, Default)]
pub struct SharedCheckpoint {
    latest: RwLock<Option<BinlogPosition>>,
}

impl SharedCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<BinlogPosition> {
        self.latest.read().clone()
    }
}

impl Checkpointer for SharedCheckpoint {
    fn set_position(&self, position: &BinlogPosition) {
        debug!("Checkpoint advanced to {}", position);
        *self.latest.write() = Some(position.clone());
    }
}

/// 수신 순서 번호. `CheckpointTracker::admit`이 발급하고 `resolve`로 한 번만 소비됨
#[derive(Debug, PartialEq, Eq)]
#[must_use = "every admitted record must be resolved exactly once"]
pub struct Ticket {
    seq: u64,
    position: BinlogPosition,
}

impl Ticket {
    pub fn position(&self) -> &BinlogPosition {
        &self.position
    }
}

struct Slot {
    position: BinlogPosition,
    resolved: bool,
}

struct TrackerState {
    /// 다음에 발급할 순서 번호
    next_seq: u64,
    /// 아직 체크포인트로 내보내지 않은 가장 앞의 순서 번호
    head_seq: u64,
    slots: VecDeque<Slot>,
}

/// 체크포인트 low-water-mark 추적기
///
/// 레코드는 수신 순서대로 `admit`되고, 결과가 확정되면 `resolve`됩니다.
/// 앞선 레코드가 모두 확정된 구간만 `Checkpointer`로 전달하므로,
/// 늦게 수신된 레코드가 먼저 완료되어도 체크포인트가 앞서 나가지 않습니다.
pub struct CheckpointTracker<C: Checkpointer + ?Sized> {
    checkpointer: std::sync::Arc<C>,
    state: Mutex<TrackerState>,
}

impl<C: Checkpointer + ?Sized> CheckpointTracker<C> {
    pub fn new(checkpointer: std::sync::Arc<C>) -> Self {
        CheckpointTracker {
            checkpointer,
            state: Mutex::new(TrackerState {
                next_seq: 0,
                head_seq: 0,
                slots: VecDeque::new(),
            }),
        }
    }

    /// 레코드 수신 등록
    pub fn admit(&self, position: BinlogPosition) -> Ticket {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.slots.push_back(Slot {
            position: position.clone(),
            resolved: false,
        });
        Ticket { seq, position }
    }

    /// 레코드 결과 확정. 앞쪽부터 연속으로 확정된 위치를 순서대로 내보냄
    ///
    /// 체크포인트 호출 순서를 보장하기 위해 락을 쥔 채로 `Checkpointer`를 호출합니다.
    pub fn resolve(&self, ticket: Ticket) {
        let mut state = self.state.lock();
        let index = (ticket.seq - state.head_seq) as usize;
        match state.slots.get_mut(index) {
            Some(slot) => slot.resolved = true,
            None => return,
        }

        while state.slots.front().map_or(false, |slot| slot.resolved) {
            if let Some(slot) = state.slots.pop_front() {
                state.head_seq += 1;
                self.checkpointer.set_position(&slot.position);
            }
        }
    }

    /// 아직 체크포인트로 내보내지 못한 레코드 수
    pub fn pending(&self) -> usize {
        self.state.lock().slots.len()
    }
}
