//! 아웃바운드 메시지 버스 전송 인터페이스
//!
//! `Transport::send`는 동기적으로 실패하거나(크기 초과, 인코딩 실패, 재시도 초과)
//! 완료 신호를 한 번 전달하는 `SendHandle`을 반환합니다.

use crate::error::TransportError;
use crate::events::DomainEvent;
use parking_lot::Mutex;
use std::io::Write;
use tokio::sync::oneshot;

/// 전송 확인 토큰 (내구성 확인 외에는 사용하지 않음)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub token: String,
}

impl Ack {
    pub fn new(token: impl Into<String>) -> Self {
        Ack {
            token: token.into(),
        }
    }
}

pub type Completion = Result<Ack, TransportError>;

/// 전송 완료를 알리는 쪽. 정확히 한 번만 `complete`할 수 있음
#[derive(Debug)]
pub struct CompletionSender(oneshot::Sender<Completion>);

impl CompletionSender {
    pub fn complete(self, result: Completion) {
        // 수신 쪽이 사라졌다면 결과를 받을 곳이 없음
        let _ = self.0.send(result);
    }
}

/// 진행 중인 전송 하나에 대한 완료 신호
#[derive(Debug)]
pub struct SendHandle(oneshot::Receiver<Completion>);

impl SendHandle {
    /// 나중에 완료될 전송용 채널 쌍
    pub fn pending() -> (CompletionSender, SendHandle) {
        let (tx, rx) = oneshot::channel();
        (CompletionSender(tx), SendHandle(rx))
    }

    /// 이미 결과가 정해진 전송
    pub fn ready(result: Completion) -> SendHandle {
        let (tx, handle) = Self::pending();
        tx.complete(result);
        handle
    }

    /// 완료 대기. 완료 신호 없이 송신 쪽이 사라지면 `Other`
    pub async fn wait(self) -> Completion {
        self.0.await.unwrap_or_else(|_| {
            Err(TransportError::Other(
                "completion dropped without a result".to_string(),
            ))
        })
    }
}

/// 메시지 버스 producer
pub trait Transport: Send + Sync {
    fn send(&self, event: &DomainEvent) -> Result<SendHandle, TransportError>;
}

/// 이벤트 JSON 인코딩 + 크기 제한 검사
pub fn encode_event(event: &DomainEvent, max_bytes: usize) -> Result<Vec<u8>, TransportError> {
    let bytes = serde_json::to_vec(event)
        .map_err(|e| TransportError::PayloadEncodingFailed(e.to_string()))?;
    if bytes.len() > max_bytes {
        return Err(TransportError::PayloadTooLarge(bytes.len()));
    }
    Ok(bytes)
}

/// 한 줄에 이벤트 하나씩 JSON으로 기록하는 전송 (stdout, 파일 등)
pub struct JsonLinesTransport<W: Write + Send> {
    writer: Mutex<W>,
    max_bytes: usize,
    sent: Mutex<u64>,
}

impl<W: Write + Send> JsonLinesTransport<W> {
    pub fn new(writer: W, max_bytes: usize) -> Self {
        JsonLinesTransport {
            writer: Mutex::new(writer),
            max_bytes,
            sent: Mutex::new(0),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> Transport for JsonLinesTransport<W> {
    fn send(&self, event: &DomainEvent) -> Result<SendHandle, TransportError> {
        let mut line = encode_event(event, self.max_bytes)?;
        line.push(b'\n');

        let result = {
            let mut writer = self.writer.lock();
            writer.write_all(&line).and_then(|_| writer.flush())
        };

        let completion = match result {
            Ok(()) => {
                let mut sent = self.sent.lock();
                *sent += 1;
                Ok(Ack::new(format!("{}:{}", event.sid, *sent)))
            }
            Err(e) => Err(TransportError::Other(e.to_string())),
        };
        Ok(SendHandle::ready(completion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RecordBuilder;
    use crate::events::RawChangeRecord;
    use crate::position::BinlogPosition;
    use crate::resolver::Entity;
    use crate::sid::AccountSid;

    fn event() -> DomainEvent {
        let record = RawChangeRecord::new(Some("insert"), BinlogPosition::new("mysql-bin.000001", 4))
            .with_column("sid", "NO12345678901234567890123456789012")
            .with_column("datecreated", "2019-02-14 11:25:15");
        let entity = Entity::new(AccountSid::parse("AC12345678901234567890123456789012").unwrap());
        RecordBuilder::new().build(&record, &entity).unwrap()
    }

    #[tokio::test]
    async fn test_send_handle_pending() {
        let (tx, handle) = SendHandle::pending();
        tokio::spawn(async move { tx.complete(Ok(Ack::new("offset-1"))) });
        assert_eq!(handle.wait().await, Ok(Ack::new("offset-1")));
    }

    #[test]
    fn test_send_handle_ready() {
        let handle = SendHandle::ready(Err(TransportError::RetryBudgetExhausted));
        assert_eq!(
            tokio_test::block_on(handle.wait()),
            Err(TransportError::RetryBudgetExhausted)
        );
    }

    #[tokio::test]
    async fn test_send_handle_dropped() {
        let (tx, handle) = SendHandle::pending();
        drop(tx);
        assert!(matches!(handle.wait().await, Err(TransportError::Other(_))));
    }

    #[tokio::test]
    async fn test_json_lines_transport() {
        let transport = JsonLinesTransport::new(Vec::new(), 64 * 1024);
        let handle = transport.send(&event()).unwrap();
        assert!(handle.wait().await.is_ok());

        let output = String::from_utf8(transport.into_inner()).unwrap();
        assert_eq!(output.lines().count(), 1);
        let json: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(json["payload_type"], "webhook");
    }

    #[test]
    fn test_payload_too_large() {
        let transport = JsonLinesTransport::new(Vec::new(), 16);
        match transport.send(&event()) {
            Err(TransportError::PayloadTooLarge(size)) => assert!(size > 16),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
