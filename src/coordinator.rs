//! 도메인 이벤트 비동기 발행 및 결과 처리
//!
//! 동시에 진행되는 전송 수는 `max_in_flight`로 제한되며 (1이면 완전 직렬화),
//! 체크포인트는 `CheckpointTracker`를 통해 수신 순서대로만 전진합니다.
//! 레코드 상태: Pending → Sending → {Acked, Failed}

use crate::error::TransportError;
use crate::events::DomainEvent;
use crate::metrics::Metrics;
use crate::position::{BinlogPosition, CheckpointTracker, Checkpointer, Ticket};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// 레코드 처리 결과 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    /// 발행 대상이 아님. 카운터 변화 없음
    Skipped,
    TransientFailure,
    PermanentFailure,
}

impl OutcomeKind {
    pub fn failure(transient: bool) -> Self {
        if transient {
            OutcomeKind::TransientFailure
        } else {
            OutcomeKind::PermanentFailure
        }
    }
}

/// 레코드 하나의 최종 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub kind: OutcomeKind,
    pub position: BinlogPosition,
}

/// 완료 태스크와 공유하는 상태
struct Settlement {
    tracker: CheckpointTracker<dyn Checkpointer>,
    metrics: Arc<dyn Metrics>,
}

impl Settlement {
    fn settle(&self, ticket: Ticket, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Success => self.metrics.mark_success(),
            OutcomeKind::TransientFailure | OutcomeKind::PermanentFailure => {
                self.metrics.mark_failure()
            }
            OutcomeKind::Skipped => {}
        }
        debug!("Record at {} settled as {:?}", ticket.position(), kind);
        self.tracker.resolve(ticket);
    }
}

/// 수신 등록된 레코드 하나
///
/// `settle` 또는 `PublishCoordinator::submit`으로 결과가 확정되어야 하며,
/// 확정 없이 drop되면 (처리 future 취소 등) 일시적 실패로 정리되어
/// 뒤따르는 레코드의 체크포인트가 막히지 않습니다.
#[must_use = "every admitted record must be settled or submitted"]
pub struct Admission {
    ticket: Option<Ticket>,
    position: BinlogPosition,
    settlement: Arc<Settlement>,
}

impl Admission {
    pub fn position(&self) -> &BinlogPosition {
        &self.position
    }

    /// 발행 전에 결과가 정해진 레코드 (건너뜀, 계정 해석/빌드 실패)
    pub fn settle(mut self, kind: OutcomeKind) -> PublishOutcome {
        if let Some(ticket) = self.ticket.take() {
            self.settlement.settle(ticket, kind);
        }
        PublishOutcome {
            kind,
            position: self.position.clone(),
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            warn!(
                "Record at {} was abandoned before its outcome was known",
                self.position
            );
            self.settlement.settle(ticket, OutcomeKind::TransientFailure);
        }
    }
}

pub struct PublishCoordinator {
    transport: Arc<dyn Transport>,
    settlement: Arc<Settlement>,
    permits: Arc<Semaphore>,
    max_in_flight: u32,
}

impl PublishCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        checkpointer: Arc<dyn Checkpointer>,
        metrics: Arc<dyn Metrics>,
        max_in_flight: usize,
    ) -> Self {
        let limit = Semaphore::MAX_PERMITS.min(u32::MAX as usize);
        let max_in_flight = max_in_flight.clamp(1, limit) as u32;
        PublishCoordinator {
            transport,
            settlement: Arc::new(Settlement {
                tracker: CheckpointTracker::new(checkpointer),
                metrics,
            }),
            permits: Arc::new(Semaphore::new(max_in_flight as usize)),
            max_in_flight,
        }
    }

    /// 수신 순서대로 레코드 등록
    pub fn admit(&self, position: BinlogPosition) -> Admission {
        Admission {
            ticket: Some(self.settlement.tracker.admit(position.clone())),
            position,
            settlement: self.settlement.clone(),
        }
    }

    /// 이벤트 발행. 전송 창이 가득 차 있으면 자리가 날 때까지 대기
    ///
    /// 결과는 완료 태스크에서 카운터와 체크포인트에 반영됩니다.
    /// 자리를 기다리는 중에 취소되면 `Admission`의 drop이 레코드를 정리합니다.
    pub async fn submit(&self, event: DomainEvent, admission: Admission) {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("[{}] [{}] publish window closed", event.sid, event.account_sid);
                admission.settle(OutcomeKind::TransientFailure);
                return;
            }
        };

        let sid = event.sid.to_string();
        let account_sid = event.account_sid.to_string();

        let handle = match self.transport.send(&event) {
            Ok(handle) => handle,
            Err(e) => {
                log_rejected(&sid, &account_sid, &e);
                admission.settle(OutcomeKind::failure(e.is_transient()));
                drop(permit);
                return;
            }
        };

        tokio::spawn(async move {
            let kind = match handle.wait().await {
                Ok(ack) => {
                    info!(
                        "[{}] [{}] successfully sent debug event ({})",
                        sid, account_sid, ack.token
                    );
                    OutcomeKind::Success
                }
                Err(e) => {
                    error!(
                        "[{}] [{}] failed to send debug event: {}",
                        sid, account_sid, e
                    );
                    OutcomeKind::failure(e.is_transient())
                }
            };
            admission.settle(kind);
            drop(permit);
        });
    }

    /// 진행 중인 전송 수
    pub fn in_flight(&self) -> usize {
        self.max_in_flight as usize - self.permits.available_permits()
    }

    /// 체크포인트로 아직 내보내지 못한 레코드 수
    pub fn pending(&self) -> usize {
        self.settlement.tracker.pending()
    }

    /// 진행 중인 모든 전송이 끝날 때까지 대기
    pub async fn drain(&self) {
        if let Ok(permits) = self.permits.acquire_many(self.max_in_flight).await {
            drop(permits);
        }
    }
}

fn log_rejected(sid: &str, account_sid: &str, err: &TransportError) {
    match err {
        TransportError::PayloadTooLarge(size) => warn!(
            "[{}] [{}] payload is too large, record size is {}",
            sid, account_sid, size
        ),
        TransportError::PayloadEncodingFailed(reason) => warn!(
            "[{}] [{}] failed to encode debug event: {}",
            sid, account_sid, reason
        ),
        TransportError::RetryBudgetExhausted => {
            warn!("[{}] [{}] maxed out retry attempts", sid, account_sid)
        }
        TransportError::Other(reason) => warn!(
            "[{}] [{}] exception while sending debug event: {}",
            sid, account_sid, reason
        ),
    }
}
