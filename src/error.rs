//! Relay 관련 에러 타입

use thiserror::Error;
use std::io;

/// 구조화된 식별자(SID) 파싱 에러
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SidError {
    #[error("유효하지 않은 SID 형식: {0}")]
    InvalidFormat(String),

    #[error("알 수 없는 SID prefix: {0}")]
    UnknownPrefix(String),
}

/// 외부 계정 조회 에러
#[derive(Error, Debug, Clone)]
#[error("계정 조회 실패: {0}")]
pub struct LookupError(pub String);

impl LookupError {
    pub fn new(msg: impl Into<String>) -> Self {
        LookupError(msg.into())
    }
}

/// 계정 해석 에러
///
/// single-flight 대기자 모두에게 같은 결과를 전달해야 하므로 Clone 가능
#[derive(Error, Debug, Clone)]
pub enum ResolutionError {
    #[error("accountsid 컬럼이 없습니다")]
    MissingIdentifier,

    #[error("유효하지 않은 계정 식별자: {0}")]
    InvalidIdentifier(#[from] SidError),

    #[error("계정 조회 에러: {0}")]
    Lookup(#[from] LookupError),

    #[error("진행 중이던 계정 조회가 중단되었습니다: {0}")]
    Abandoned(String),
}

impl ResolutionError {
    /// 식별자 자체의 문제가 아니라 조회 실패인 경우
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResolutionError::Lookup(_) | ResolutionError::Abandoned(_)
        )
    }
}

/// 레코드 빌드 에러 (필수 필드 누락/손상)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("필수 필드 누락: {0}")]
    MissingField(&'static str),

    #[error("필수 필드 {field} 파싱 실패: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// 아웃바운드 전송 에러
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("페이로드가 너무 큽니다: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("페이로드 인코딩 실패: {0}")]
    PayloadEncodingFailed(String),

    #[error("재시도 횟수 초과")]
    RetryBudgetExhausted,

    #[error("전송 에러: {0}")]
    Other(String),
}

impl TransportError {
    /// 같은 이벤트를 다시 보내면 성공할 여지가 있는지 여부
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::RetryBudgetExhausted | TransportError::Other(_)
        )
    }
}

/// 입력 파싱과 설정 로딩 에러
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("레코드 파싱 에러: {0}")]
    InvalidRecord(String),

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<io::Error> for RelayError {
    fn from(err: io::Error) -> Self {
        RelayError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
