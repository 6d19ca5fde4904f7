//! 변경 레코드 → 도메인 이벤트 변환
//!
//! 필수 필드(sid, datecreated)가 없거나 손상된 경우에만 `BuildError`를 반환합니다.
//! 선택 필드의 파싱 실패는 경고 로그를 남기고 값을 비워 둔 채 계속 진행합니다.

use crate::error::BuildError;
use crate::events::{
    parse_timestamp, CellValue, DomainEvent, LogLevel, Payload, RawChangeRecord, WebhookPayload,
    WebhookRequest, WebhookResponse,
};
use crate::resolver::Entity;
use crate::sid::Sid;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// correlation SID prefix → 제품 이름
const PRODUCT_NAMES: &[(&str, &str)] = &[
    ("SM", "Programmable SMS"),
    ("MM", "Programmable SMS"),
    ("MG", "Programmable SMS"),
    ("CA", "Programmable Voice"),
    ("CF", "Programmable Voice"),
    ("RE", "Programmable Voice"),
    ("RU", "API"),
    ("RQ", "API"),
    ("XR", "Add-ons"),
    ("NO", "Notification"),
    ("PV", "Voice Service"),
];

/// 경고 로그에 붙일 레코드 식별 정보
struct LogContext {
    sid: String,
    account_sid: String,
}

impl LogContext {
    fn new(record: &RawChangeRecord) -> Self {
        LogContext {
            sid: record.sid().unwrap_or_default(),
            account_sid: record.account_sid().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecordBuilder;

impl RecordBuilder {
    pub fn new() -> Self {
        RecordBuilder
    }

    /// 레코드와 해석된 계정으로 도메인 이벤트 생성
    pub fn build(
        &self,
        record: &RawChangeRecord,
        entity: &Entity,
    ) -> Result<DomainEvent, BuildError> {
        let ctx = LogContext::new(record);

        let sid = required_sid(record)?;
        let date_created = required_timestamp(record, "datecreated")?;

        let log_level = parse_log_level(record, &ctx);
        let correlation_sid = optional_sid(record, "callsid", &ctx);
        let service_sid = optional_sid(record, "servicesid", &ctx);

        let master_account_sid = entity.parent_sid.clone();
        match &master_account_sid {
            Some(parent) => info!(
                "Found parent account [{}] from child [{}]",
                parent, entity.sid
            ),
            None => debug!("{} is the parent account", entity.sid),
        }

        let payload = Payload::Webhook(webhook_payload(record, date_created, &ctx));
        let product_name = correlation_sid.as_ref().and_then(product_name);

        Ok(DomainEvent {
            sid,
            account_sid: entity.sid.clone(),
            master_account_sid,
            request_sid: None,
            service_sid,
            correlation_sid,
            date_created,
            log_level,
            payload,
            product_name,
        })
    }
}

fn required_sid(record: &RawChangeRecord) -> Result<Sid, BuildError> {
    let raw = record.sid().ok_or(BuildError::MissingField("sid"))?;
    Sid::parse(&raw).map_err(|_| BuildError::InvalidField {
        field: "sid",
        value: raw,
    })
}

fn required_timestamp(
    record: &RawChangeRecord,
    field: &'static str,
) -> Result<DateTime<Utc>, BuildError> {
    let raw = record
        .get_string(field)
        .ok_or(BuildError::MissingField(field))?;
    parse_timestamp(&raw).ok_or(BuildError::InvalidField { field, value: raw })
}

/// 값이 없으면 DEBUG, 해석할 수 없으면 경고 후 DEBUG
fn parse_log_level(record: &RawChangeRecord, ctx: &LogContext) -> LogLevel {
    let raw = match record.get_string("log") {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return LogLevel::Debug,
    };
    LogLevel::parse(&raw).unwrap_or_else(|| {
        warn!(
            "[{}] [{}] cannot parse log level from {}; using DEBUG",
            ctx.sid, ctx.account_sid, raw
        );
        LogLevel::Debug
    })
}

fn optional_sid(record: &RawChangeRecord, field: &str, ctx: &LogContext) -> Option<Sid> {
    let raw = record.get_string(field)?;
    if raw.trim().is_empty() {
        return None;
    }
    match Sid::parse(&raw) {
        Ok(sid) => Some(sid),
        Err(e) => {
            warn!(
                "[{}] [{}] unknown {} {} ({}); setting it as null",
                ctx.sid, ctx.account_sid, field, raw, e
            );
            None
        }
    }
}

/// 정수 컬럼을 i32로 축소. 범위를 벗어나거나 숫자가 아니면 경고 후 None
fn narrow_i32(record: &RawChangeRecord, field: &str, ctx: &LogContext) -> Option<i32> {
    let value = record.get(field)?;
    let narrowed = match value {
        CellValue::Null => return None,
        CellValue::Int64(i) => i32::try_from(*i).ok(),
        CellValue::UInt64(u) => i32::try_from(*u).ok(),
        CellValue::Double(d) => {
            if d.fract() == 0.0 && *d >= i32::MIN as f64 && *d <= i32::MAX as f64 {
                Some(*d as i32)
            } else {
                None
            }
        }
        CellValue::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|i| i32::try_from(i).ok()),
    };

    if narrowed.is_none() {
        warn!(
            "[{}] [{}] failed to parse {} {:?}",
            ctx.sid, ctx.account_sid, field, value
        );
    }
    narrowed
}

/// "a=1&b=2" 형식(form-urlencoded) 디코딩
pub fn decode_pairs(raw: &str) -> BTreeMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

fn optional_pairs(record: &RawChangeRecord, field: &str) -> Option<BTreeMap<String, String>> {
    record.get_string(field).map(|raw| decode_pairs(&raw))
}

/// messagedate 우선, 없거나 해석 불가하면 datecreated
fn message_date(
    record: &RawChangeRecord,
    date_created: DateTime<Utc>,
    ctx: &LogContext,
) -> DateTime<Utc> {
    match record.get_string("messagedate") {
        Some(raw) if !raw.trim().is_empty() => parse_timestamp(&raw).unwrap_or_else(|| {
            warn!(
                "[{}] [{}] failed to parse messagedate {}; using datecreated",
                ctx.sid, ctx.account_sid, raw
            );
            date_created
        }),
        _ => date_created,
    }
}

fn optional_timestamp(
    record: &RawChangeRecord,
    field: &str,
    ctx: &LogContext,
) -> Option<DateTime<Utc>> {
    let raw = record.get_string(field)?;
    if raw.trim().is_empty() {
        return None;
    }
    let parsed = parse_timestamp(&raw);
    if parsed.is_none() {
        warn!(
            "[{}] [{}] failed to parse {} {}",
            ctx.sid, ctx.account_sid, field, raw
        );
    }
    parsed
}

fn webhook_payload(
    record: &RawChangeRecord,
    date_created: DateTime<Utc>,
    ctx: &LogContext,
) -> WebhookPayload {
    let request = WebhookRequest {
        method: record.get_string("requestmethod"),
        url: record.get_string("requesturl"),
        headers: optional_pairs(record, "requestheader"),
        parameters: optional_pairs(record, "requestvariables"),
    };

    let response = WebhookResponse {
        status_code: None,
        headers: optional_pairs(record, "responseheaders"),
        body: record.get_string("responsebody"),
    };

    WebhookPayload {
        request,
        response,
        api_version: record.get_string("apiversion"),
        flags: narrow_i32(record, "flags", ctx),
        error_code: narrow_i32(record, "errorcode", ctx),
        log: narrow_i32(record, "log", ctx),
        notification_summary_sid: optional_sid(record, "notificationsummarysid", ctx),
        message_text: optional_pairs(record, "messagetext").unwrap_or_default(),
        message_date: message_date(record, date_created, ctx),
        date_updated: optional_timestamp(record, "dateupdated", ctx),
    }
}

/// correlation SID 앞 두 글자로 제품 이름 결정
pub fn product_name(sid: &Sid) -> Option<&'static str> {
    let prefix = sid.as_str().get(..2)?.to_ascii_uppercase();
    PRODUCT_NAMES
        .iter()
        .find(|(code, _)| *code == prefix)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::BinlogPosition;
    use crate::sid::AccountSid;
    use chrono::TimeZone;

    const ACCOUNT: &str = "AC12345678901234567890123456789012";
    const PARENT: &str = "AC12345678901234567890123456781111";
    const SID: &str = "NO12345678901234567890123456789012";

    fn base_record() -> RawChangeRecord {
        RawChangeRecord::new(Some("insert"), BinlogPosition::new("mysql-bin.000001", 4))
            .with_column("accountsid", ACCOUNT)
            .with_column("sid", SID)
            .with_column("datecreated", "2019-02-14 11:25:15")
    }

    fn entity() -> Entity {
        Entity::new(AccountSid::parse(ACCOUNT).unwrap())
    }

    fn webhook(event: &DomainEvent) -> &WebhookPayload {
        match &event.payload {
            Payload::Webhook(payload) => payload,
        }
    }

    #[test]
    fn test_build_minimal_record() {
        let event = RecordBuilder::new().build(&base_record(), &entity()).unwrap();
        let created = Utc.with_ymd_and_hms(2019, 2, 14, 11, 25, 15).unwrap();

        assert_eq!(event.sid.as_str(), SID);
        assert_eq!(event.account_sid.as_str(), ACCOUNT);
        assert_eq!(event.log_level, LogLevel::Debug);
        assert_eq!(event.correlation_sid, None);
        assert_eq!(event.service_sid, None);
        assert_eq!(event.master_account_sid, None);
        assert_eq!(event.product_name, None);
        assert_eq!(event.date_created, created);

        let payload = webhook(&event);
        assert_eq!(payload.message_date, created);
        assert_eq!(payload.request, WebhookRequest::default());
        assert!(payload.message_text.is_empty());
        assert_eq!(payload.flags, None);
    }

    #[test]
    fn test_build_with_references() {
        let record = base_record()
            .with_column("callsid", "NO12345678901234567890123456789555")
            .with_column("servicesid", "NO12345678901234567890123456789777")
            .with_column("log", "WARNING");
        let mut entity = entity();
        entity.parent_sid = Some(AccountSid::parse(PARENT).unwrap());

        let event = RecordBuilder::new().build(&record, &entity).unwrap();
        assert_eq!(event.log_level, LogLevel::Warning);
        assert_eq!(
            event.correlation_sid.as_ref().map(Sid::as_str),
            Some("NO12345678901234567890123456789555")
        );
        assert_eq!(
            event.service_sid.as_ref().map(Sid::as_str),
            Some("NO12345678901234567890123456789777")
        );
        assert_eq!(
            event.master_account_sid.as_ref().map(AccountSid::as_str),
            Some(PARENT)
        );
        assert_eq!(event.product_name, Some("Notification"));
    }

    #[test]
    fn test_unknown_correlation_prefix_is_soft() {
        let record = base_record().with_column("callsid", "ZZ12345678901234567890123456789555");
        let event = RecordBuilder::new().build(&record, &entity()).unwrap();
        assert_eq!(event.correlation_sid, None);
        assert_eq!(event.product_name, None);
    }

    #[test]
    fn test_unparseable_log_level_defaults_to_debug() {
        let record = base_record().with_column("log", "LOUD");
        let event = RecordBuilder::new().build(&record, &entity()).unwrap();
        assert_eq!(event.log_level, LogLevel::Debug);
        assert_eq!(webhook(&event).log, None);
    }

    #[test]
    fn test_numeric_log_column() {
        let record = base_record().with_column("log", 0i64);
        let event = RecordBuilder::new().build(&record, &entity()).unwrap();
        assert_eq!(event.log_level, LogLevel::Error);
        assert_eq!(webhook(&event).log, Some(0));
    }

    #[test]
    fn test_numeric_narrowing() {
        let record = base_record()
            .with_column("flags", CellValue::UInt64(9_999_999_999))
            .with_column("errorcode", "11200")
            .with_column("log", CellValue::Double(1.5));
        let event = RecordBuilder::new().build(&record, &entity()).unwrap();
        let payload = webhook(&event);
        assert_eq!(payload.flags, None);
        assert_eq!(payload.error_code, Some(11200));
        assert_eq!(payload.log, None);
    }

    #[test]
    fn test_webhook_fields() {
        let record = base_record()
            .with_column("requestmethod", "POST")
            .with_column("requesturl", "https://example.com/hook")
            .with_column("requestheader", "X-Twilio-Signature=abc%3D&Content-Type=text%2Fhtml")
            .with_column("requestvariables", "Body=hello+world&From=%2B15005550006")
            .with_column("responseheaders", "")
            .with_column("responsebody", "<Response/>")
            .with_column("apiversion", "2010-04-01")
            .with_column("notificationsummarysid", "NS12345678901234567890123456789012")
            .with_column("messagetext", "Msg=Timeout&httpResponse=502")
            .with_column("messagedate", "2019-02-14 11:25:20")
            .with_column("dateupdated", "not a date");

        let event = RecordBuilder::new().build(&record, &entity()).unwrap();
        let payload = webhook(&event);

        assert_eq!(payload.request.method.as_deref(), Some("POST"));
        let headers = payload.request.headers.as_ref().unwrap();
        assert_eq!(headers["X-Twilio-Signature"], "abc=");
        assert_eq!(headers["Content-Type"], "text/html");
        let params = payload.request.parameters.as_ref().unwrap();
        assert_eq!(params["Body"], "hello world");
        assert_eq!(params["From"], "+15005550006");

        assert_eq!(payload.response.headers, Some(BTreeMap::new()));
        assert_eq!(payload.response.body.as_deref(), Some("<Response/>"));
        assert_eq!(payload.response.status_code, None);
        assert_eq!(payload.api_version.as_deref(), Some("2010-04-01"));
        assert!(payload.notification_summary_sid.is_some());
        assert_eq!(payload.message_text["httpResponse"], "502");
        assert_eq!(
            payload.message_date,
            Utc.with_ymd_and_hms(2019, 2, 14, 11, 25, 20).unwrap()
        );
        assert_eq!(payload.date_updated, None);
    }

    #[test]
    fn test_missing_mandatory_fields() {
        let record = RawChangeRecord::new(Some("insert"), BinlogPosition::new("mysql-bin.000001", 4))
            .with_column("sid", SID);
        assert_eq!(
            RecordBuilder::new().build(&record, &entity()),
            Err(BuildError::MissingField("datecreated"))
        );

        let record = base_record().with_column("datecreated", "someday");
        assert!(matches!(
            RecordBuilder::new().build(&record, &entity()),
            Err(BuildError::InvalidField { field: "datecreated", .. })
        ));

        let record = base_record().with_column("sid", CellValue::Null);
        assert_eq!(
            RecordBuilder::new().build(&record, &entity()),
            Err(BuildError::MissingField("sid"))
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let record = base_record()
            .with_column("callsid", "CA12345678901234567890123456789555")
            .with_column("requestvariables", "b=2&a=1");
        let builder = RecordBuilder::new();

        let first = builder.build(&record, &entity()).unwrap().to_json().unwrap();
        let second = builder.build(&record, &entity()).unwrap().to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_serialized_shape() {
        let event = RecordBuilder::new().build(&base_record(), &entity()).unwrap();
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["sid"], SID);
        assert_eq!(json["account_sid"], ACCOUNT);
        assert_eq!(json["master_account_sid"], serde_json::Value::Null);
        assert_eq!(json["log_level"], "DEBUG");
        assert_eq!(json["payload_type"], "webhook");
        assert_eq!(json["date_created"], "2019-02-14T11:25:15Z");
        assert_eq!(json["payload"]["message_date"], "2019-02-14T11:25:15Z");
    }

    #[test]
    fn test_product_names() {
        let name = |s: &str| product_name(&Sid::parse(s).unwrap());
        assert_eq!(name("SM12345678901234567890123456789012"), Some("Programmable SMS"));
        assert_eq!(name("CA12345678901234567890123456789012"), Some("Programmable Voice"));
        assert_eq!(name("RQ12345678901234567890123456789012"), Some("API"));
        assert_eq!(name("XR12345678901234567890123456789012"), Some("Add-ons"));
        assert_eq!(name("PV12345678901234567890123456789012"), Some("Voice Service"));
        assert_eq!(name("NS12345678901234567890123456789012"), None);
    }

    #[test]
    fn test_decode_pairs() {
        let pairs = decode_pairs("a=1&&flag&b=x%20y");
        assert_eq!(pairs["a"], "1");
        assert_eq!(pairs["flag"], "");
        assert_eq!(pairs["b"], "x y");
        assert!(decode_pairs("").is_empty());
    }
}
