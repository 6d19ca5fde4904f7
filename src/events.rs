//! 변경 레코드(입력) 및 도메인 이벤트(출력) 데이터 구조 정의

use crate::error::{RelayError, Result};
use crate::position::BinlogPosition;
use crate::sid::{AccountSid, Sid};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::error;

/// 셀 값 (replication 로그가 전달하는 스칼라)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
}

impl CellValue {
    /// 문자열 표현. NULL은 None
    pub fn as_string(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::String(s) => Some(s.clone()),
            CellValue::Int64(i) => Some(i.to_string()),
            CellValue::UInt64(u) => Some(u.to_string()),
            CellValue::Double(d) => Some(d.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl From<serde_json::Value> for CellValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => CellValue::Null,
            Value::Bool(b) => CellValue::Int64(b as i64),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    CellValue::Int64(i)
                } else if let Some(u) = n.as_u64() {
                    CellValue::UInt64(u)
                } else {
                    CellValue::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => CellValue::String(s),
            other => CellValue::String(other.to_string()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::String(value.to_string())
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int64(value)
    }
}

/// 변경 연산 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Insert,
    Update,
    Delete,
    Other,
}

impl OperationType {
    /// 레코드 타입 태그 해석 (대소문자 무시)
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
            Some("insert") => OperationType::Insert,
            Some("update") => OperationType::Update,
            Some("delete") => OperationType::Delete,
            _ => OperationType::Other,
        }
    }
}

/// 상위 리더가 전달하는 행 단위 변경 레코드
#[derive(Debug, Clone, PartialEq)]
pub struct RawChangeRecord {
    /// 원본 타입 태그 ("insert", "update", ...). 없을 수도 있음
    pub row_type: Option<String>,
    /// 데이터베이스명
    pub database: String,
    /// 테이블명
    pub table: String,
    /// 재시작 지점
    pub position: BinlogPosition,
    /// 트랜잭션 내 행 순번
    pub xoffset: u64,
    /// 컬럼명과 값 (원본 순서 유지)
    columns: Vec<(String, CellValue)>,
}

/// Maxwell 형식 JSON 한 줄
#[derive(Deserialize)]
struct JsonRow {
    #[serde(rename = "type")]
    row_type: Option<String>,
    #[serde(default)]
    database: String,
    #[serde(default)]
    table: String,
    position: String,
    #[serde(default)]
    xoffset: u64,
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
}

impl RawChangeRecord {
    pub fn new(row_type: Option<&str>, position: BinlogPosition) -> Self {
        RawChangeRecord {
            row_type: row_type.map(str::to_string),
            database: String::new(),
            table: String::new(),
            position,
            xoffset: 0,
            columns: Vec::new(),
        }
    }

    /// 컬럼 추가 (같은 이름이 있으면 교체)
    pub fn with_column(mut self, name: &str, value: impl Into<CellValue>) -> Self {
        let value = value.into();
        match self
            .columns
            .iter_mut()
            .find(|(col, _)| col.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((name.to_string(), value)),
        }
        self
    }

    /// "position", "type", "data" 필드를 가진 JSON 한 줄 파싱
    pub fn from_json(line: &str) -> Result<Self> {
        let row: JsonRow = serde_json::from_str(line)?;
        let position = row.position.parse::<BinlogPosition>()?;

        let mut record = RawChangeRecord::new(row.row_type.as_deref(), position);
        record.database = row.database;
        record.table = row.table;
        record.xoffset = row.xoffset;
        for (name, value) in row.data {
            record = record.with_column(&name, CellValue::from(value));
        }
        Ok(record)
    }

    pub fn operation(&self) -> OperationType {
        OperationType::from_tag(self.row_type.as_deref())
    }

    /// 컬럼 조회 (대소문자 무시)
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .find(|(col, _)| col.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// 컬럼의 문자열 값. 없거나 NULL이면 None
    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name).and_then(CellValue::as_string)
    }

    pub fn sid(&self) -> Option<String> {
        self.get_string("sid")
    }

    pub fn account_sid(&self) -> Option<String> {
        self.get_string("accountsid")
    }

    /// 로그 출력용 JSON
    ///
    /// datecreated가 epoch 초가 아니면 epoch 초로 바꾸고, "@id"가 없으면 sid로 채웁니다.
    pub fn to_log_json(&self) -> serde_json::Value {
        let mut data = serde_json::Map::new();
        for (name, value) in &self.columns {
            data.insert(
                name.clone(),
                serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
            );
        }

        if let Some(created) = self.get_string("datecreated") {
            if !created.chars().all(|c| c.is_ascii_digit()) {
                match parse_timestamp(&created) {
                    Some(ts) => {
                        data.insert("datecreated".to_string(), ts.timestamp().into());
                    }
                    None => error!("Failed to set datecreated from {}", created),
                }
            }
        }

        if !data.contains_key("@id") {
            if let Some(sid) = self.sid() {
                data.insert("@id".to_string(), sid.into());
            }
        }

        serde_json::Value::Object(data)
    }
}

/// 타임스탬프 파싱: RFC 3339, "YYYY-MM-DD HH:MM:SS[.fff]" (UTC), epoch 초
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return raw
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// 이벤트 심각도 (Debug가 가장 낮음)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// 이름(대소문자 무시) 또는 숫자 코드 (0 = ERROR, 1 = WARNING)
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" | "WARNING" | "1" => Some(LogLevel::Warning),
            "ERROR" | "0" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// 웹훅 요청 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WebhookRequest {
    /// HTTP 메서드 (GET, POST, ...)
    pub method: Option<String>,
    /// 요청 URL
    pub url: Option<String>,
    /// 요청 헤더 (form-urlencoded 컬럼에서 디코딩)
    pub headers: Option<BTreeMap<String, String>>,
    /// 요청 파라미터
    pub parameters: Option<BTreeMap<String, String>>,
}

/// 웹훅 응답 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// HTTP 상태 코드
    pub status_code: Option<i32>,
    /// 응답 헤더
    pub headers: Option<BTreeMap<String, String>>,
    /// 응답 본문
    pub body: Option<String>,
}

/// 웹훅 디버그 이벤트 본문
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub request: WebhookRequest,
    pub response: WebhookResponse,
    /// API 버전 (e.g., "2010-04-01")
    pub api_version: Option<String>,
    /// 원본 플래그 비트
    pub flags: Option<i32>,
    /// 에러 코드
    pub error_code: Option<i32>,
    /// 원본 로그 레벨 숫자 코드
    pub log: Option<i32>,
    /// 알림 요약 SID
    pub notification_summary_sid: Option<Sid>,
    /// 메시지 텍스트 (form-urlencoded 컬럼에서 디코딩, 없으면 빈 맵)
    pub message_text: BTreeMap<String, String>,
    /// 메시지 시각 (없으면 datecreated)
    pub message_date: DateTime<Utc>,
    /// 마지막 수정 시각
    pub date_updated: Option<DateTime<Utc>>,
}

/// 페이로드 종류별 tagged union
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "payload_type", content = "payload", rename_all = "lowercase")]
pub enum Payload {
    Webhook(WebhookPayload),
}

/// 메시지 버스로 발행되는 도메인 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainEvent {
    /// 이벤트 SID (레코드의 sid 컬럼)
    pub sid: Sid,
    /// 이벤트가 속한 계정
    pub account_sid: AccountSid,
    /// 상위 계정. 하위 계정이 아니면 None
    pub master_account_sid: Option<AccountSid>,
    /// 원본 요청 SID
    pub request_sid: Option<Sid>,
    /// 서비스 SID
    pub service_sid: Option<Sid>,
    /// 연관 리소스 SID (call, message 등)
    pub correlation_sid: Option<Sid>,
    /// 레코드 생성 시각
    pub date_created: DateTime<Utc>,
    pub log_level: LogLevel,
    /// "payload_type" + "payload" 필드로 직렬화
    #[serde(flatten)]
    pub payload: Payload,
    /// correlation SID prefix로 정해지는 제품명
    pub product_name: Option<&'static str>,
}

impl DomainEvent {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(RelayError::from)
    }
}
