//! 테스트용 가짜 협력 객체

use crate::error::TransportError;
use crate::events::DomainEvent;
use crate::position::{BinlogPosition, Checkpointer};
use crate::transport::{Ack, SendHandle, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// 호출된 체크포인트를 순서대로 기록
#[derive(Default)]
pub struct RecordingCheckpointer {
    positions: Mutex<Vec<BinlogPosition>>,
}

impl RecordingCheckpointer {
    pub fn positions(&self) -> Vec<BinlogPosition> {
        self.positions.lock().clone()
    }
}

impl Checkpointer for RecordingCheckpointer {
    fn set_position(&self, position: &BinlogPosition) {
        self.positions.lock().push(position.clone());
    }
}

/// 전송 한 건의 동작
#[derive(Debug, Clone)]
pub enum Script {
    /// 지연 후 성공
    Ack(Duration),
    /// 지연 후 비동기 실패
    Fail(Duration, TransportError),
    /// `send` 호출 시점에 동기 실패
    Reject(TransportError),
}

/// 미리 정해둔 순서대로 동작하는 전송. 스크립트가 비면 즉시 성공
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    sent: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        ScriptedTransport {
            scripts: Mutex::new(scripts.into_iter().collect()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// `send`가 호출된 이벤트 sid 목록
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, event: &DomainEvent) -> Result<SendHandle, TransportError> {
        self.sent.lock().push(event.sid.to_string());
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::Ack(Duration::ZERO));

        let (delay, result) = match script {
            Script::Reject(e) => return Err(e),
            Script::Ack(delay) => (delay, Ok(Ack::new(event.sid.to_string()))),
            Script::Fail(delay, e) => (delay, Err(e)),
        };

        let (tx, handle) = SendHandle::pending();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tx.complete(result);
        });
        Ok(handle)
    }
}
