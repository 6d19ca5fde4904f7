//! MySQL Binlog 변경 레코드 릴레이
//!
//! replication 로그의 행 단위 변경 레코드를 받아 도메인 이벤트로 변환한 뒤
//! 메시지 버스로 발행합니다.
//! 주요 기능:
//! - INSERT 레코드 선별
//! - 계정 정보 조회 (single-flight 캐시)
//! - 선택 필드 손상에 관대한 이벤트 빌드
//! - 비동기 발행과 순서가 보장된 체크포인트 전진

pub mod builder;
pub mod classifier;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod metrics;
pub mod position;
pub mod relay;
pub mod resolver;
pub mod sid;
pub mod transport;

#[cfg(test)]
mod testing;

pub use builder::RecordBuilder;
pub use classifier::EventClassifier;
pub use coordinator::{Admission, OutcomeKind, PublishCoordinator, PublishOutcome};
pub use error::{BuildError, RelayError, ResolutionError, Result, TransportError};
pub use events::{CellValue, DomainEvent, LogLevel, Payload, RawChangeRecord};
pub use metrics::{Metrics, PrometheusMetrics, RelayMetrics};
pub use position::{BinlogPosition, Checkpointer, SharedCheckpoint};
pub use relay::{Relay, RelayConfig};
pub use resolver::{Entity, EntityLookup, EntityResolver, StaticLookup};
pub use sid::{AccountSid, Sid};
pub use transport::{JsonLinesTransport, SendHandle, Transport};
