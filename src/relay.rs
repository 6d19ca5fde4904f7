//! 변경 레코드 릴레이 - 레코드 단위 처리 진입점
//!
//! 처리 단계:
//! 1. 분류 (INSERT만 발행 대상, 나머지는 즉시 체크포인트)
//! 2. 계정 해석 (single-flight 캐시)
//! 3. 도메인 이벤트 빌드
//! 4. 비동기 발행 (체크포인트는 수신 순서대로)

use crate::builder::RecordBuilder;
use crate::classifier::EventClassifier;
use crate::coordinator::{OutcomeKind, PublishCoordinator, PublishOutcome};
use crate::error::ResolutionError;
use crate::events::RawChangeRecord;
use crate::metrics::Metrics;
use crate::position::Checkpointer;
use crate::resolver::{Entity, EntityLookup, EntityResolver};
use crate::transport::Transport;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// 릴레이 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// 동시에 진행 가능한 전송 수 (1이면 직렬)
    pub max_in_flight: usize,
    /// 전송 가능한 최대 페이로드 크기 (bytes)
    pub max_payload_bytes: usize,
    /// 계정 조회 시도 횟수 (1이면 재시도 없음)
    pub resolve_attempts: u32,
    /// 플래그 508 계정의 이벤트를 건너뛸지 여부
    pub skip_flagged_accounts: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            max_in_flight: 1,
            max_payload_bytes: 1_000_000,
            resolve_attempts: 1,
            skip_flagged_accounts: false,
        }
    }
}

impl RelayConfig {
    /// 환경 변수에서 설정 읽기. 없거나 잘못된 값은 기본값 사용
    pub fn from_env() -> Self {
        let defaults = RelayConfig::default();
        RelayConfig {
            max_in_flight: env_or("RELAY_MAX_IN_FLIGHT", defaults.max_in_flight),
            max_payload_bytes: env_or("RELAY_MAX_PAYLOAD_BYTES", defaults.max_payload_bytes),
            resolve_attempts: env_or("RELAY_RESOLVE_ATTEMPTS", defaults.resolve_attempts),
            skip_flagged_accounts: env_or(
                "RELAY_SKIP_FLAGGED_ACCOUNTS",
                defaults.skip_flagged_accounts,
            ),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// 변경 레코드 릴레이
pub struct Relay {
    classifier: EventClassifier,
    resolver: EntityResolver<dyn EntityLookup>,
    builder: RecordBuilder,
    coordinator: PublishCoordinator,
    metrics: Arc<dyn Metrics>,
}

impl Relay {
    pub fn new(
        config: &RelayConfig,
        lookup: Arc<dyn EntityLookup>,
        transport: Arc<dyn Transport>,
        checkpointer: Arc<dyn Checkpointer>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Relay {
            classifier: EventClassifier::new(config.skip_flagged_accounts),
            resolver: EntityResolver::with_attempts(lookup, config.resolve_attempts),
            builder: RecordBuilder::new(),
            coordinator: PublishCoordinator::new(
                transport,
                checkpointer,
                metrics.clone(),
                config.max_in_flight,
            ),
            metrics,
        }
    }

    /// 레코드 하나 처리
    ///
    /// 발행 전에 결과가 정해지면 그 결과를, 발행을 시작했으면 None을 반환합니다.
    /// 어느 경우든 이 레코드의 체크포인트는 정확히 한 번 전진합니다.
    /// 처리 도중 future가 drop되어도 마찬가지이며, 이때는 일시적 실패로 집계됩니다.
    pub async fn process(&self, record: RawChangeRecord) -> Option<PublishOutcome> {
        let admission = self.coordinator.admit(record.position.clone());

        if !self.classifier.is_relevant(&record) {
            debug!(
                "Skipping {} - {}",
                record.row_type.as_deref().unwrap_or("null"),
                record.to_log_json()
            );
            return Some(admission.settle(OutcomeKind::Skipped));
        }

        let entity = match self.resolve_account(&record).await {
            Ok(entity) => entity,
            Err(e) => {
                error!(
                    "Error while getting account info for record {}: {}",
                    record.to_log_json(),
                    e
                );
                let kind = OutcomeKind::failure(e.is_transient());
                return Some(admission.settle(kind));
            }
        };

        if self.classifier.should_skip_entity(&entity) {
            debug!(
                "Skipping {} - debug events disabled for account {}",
                record.sid().unwrap_or_default(),
                entity.sid
            );
            return Some(admission.settle(OutcomeKind::Skipped));
        }

        let event = match self.builder.build(&record, &entity) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    "[{}] [{}] Error while building debug payload from {}: {}",
                    record.sid().unwrap_or_default(),
                    entity.sid,
                    record.to_log_json(),
                    e
                );
                return Some(admission.settle(OutcomeKind::PermanentFailure));
            }
        };

        self.coordinator.submit(event, admission).await;
        None
    }

    async fn resolve_account(
        &self,
        record: &RawChangeRecord,
    ) -> Result<Arc<Entity>, ResolutionError> {
        let id = record
            .account_sid()
            .ok_or(ResolutionError::MissingIdentifier)?;
        self.resolver.resolve(&id).await
    }

    /// 채널이 닫힐 때까지 레코드를 순서대로 처리하고, 진행 중인 전송을 모두 기다림
    pub async fn run(&self, mut records: mpsc::Receiver<RawChangeRecord>) -> u64 {
        info!("Relay started");
        let mut processed = 0u64;

        while let Some(record) = records.recv().await {
            self.process(record).await;
            processed += 1;
        }

        self.drain().await;
        info!(
            "Relay stopped after {} records (succeeded: {}, failed: {})",
            processed,
            self.metrics.succeeded(),
            self.metrics.failed()
        );
        processed
    }

    /// 진행 중인 모든 전송이 끝날 때까지 대기
    pub async fn drain(&self) {
        self.coordinator.drain().await;
    }

    pub fn metrics(&self) -> &Arc<dyn Metrics> {
        &self.metrics
    }
}
