//! SID (구조화된 식별자) 파싱
//!
//! SID 형식: 2글자 대문자 prefix + 32자리 16진수
//! 예: "AC12345678901234567890123456789012"

use crate::error::SidError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// 파서가 인식하는 SID prefix 목록
const KNOWN_PREFIXES: &[&str] = &[
    "AC", // 계정
    "CA", // 통화
    "CF", // 컨퍼런스
    "MG", // 메시징 서비스
    "MM", // MMS
    "NO", // 알림
    "NS", // 알림 요약
    "PV", // 음성 서비스
    "RE", // 녹음
    "RQ", // API 요청
    "RU", // API 사용량
    "SM", // SMS
    "XR", // Add-on 결과
];

fn sid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Z]{2})[0-9a-fA-F]{32}$").expect("valid SID regex"))
}

/// 파싱된 SID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid(String);

impl Sid {
    /// SID 문자열 파싱. prefix가 목록에 없으면 `UnknownPrefix`
    pub fn parse(value: &str) -> Result<Self, SidError> {
        let value = value.trim();
        let caps = sid_pattern()
            .captures(value)
            .ok_or_else(|| SidError::InvalidFormat(value.to_string()))?;

        let prefix = &caps[1];
        if !KNOWN_PREFIXES.contains(&prefix) {
            return Err(SidError::UnknownPrefix(prefix.to_string()));
        }

        Ok(Sid(value.to_string()))
    }

    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Sid {
    type Err = SidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sid::parse(s)
    }
}

impl Serialize for Sid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Sid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Sid::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// 계정 SID ("AC" prefix 고정)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AccountSid(Sid);

impl AccountSid {
    pub const PREFIX: &'static str = "AC";

    pub fn parse(value: &str) -> Result<Self, SidError> {
        let sid = Sid::parse(value)?;
        if sid.prefix() != Self::PREFIX {
            return Err(SidError::InvalidFormat(format!(
                "account SID must start with {}: {}",
                Self::PREFIX,
                value
            )));
        }
        Ok(AccountSid(sid))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for AccountSid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<'de> Deserialize<'de> for AccountSid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AccountSid::parse(&raw).map_err(serde::de::Error::custom)
    }
}
