//! 변경 레코드 분류: 발행 대상(INSERT)인지 판단

use crate::events::{OperationType, RawChangeRecord};
use crate::resolver::{Entity, SKIP_DEBUG_EVENTS_FLAG_ID};

#[derive(Debug, Clone, Copy, Default)]
pub struct EventClassifier {
    /// 계정 플래그 508이 켜진 계정의 이벤트를 건너뛸지 여부
    skip_flagged_accounts: bool,
}

impl EventClassifier {
    pub fn new(skip_flagged_accounts: bool) -> Self {
        EventClassifier {
            skip_flagged_accounts,
        }
    }

    /// INSERT 레코드만 발행 대상
    pub fn is_relevant(&self, record: &RawChangeRecord) -> bool {
        record.operation() == OperationType::Insert
    }

    pub fn should_skip_entity(&self, entity: &Entity) -> bool {
        self.skip_flagged_accounts && entity.has_flag(SKIP_DEBUG_EVENTS_FLAG_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::BinlogPosition;
    use crate::sid::AccountSid;

    fn record(row_type: Option<&str>) -> RawChangeRecord {
        RawChangeRecord::new(row_type, BinlogPosition::new("mysql-bin.000001", 1000))
    }

    #[test]
    fn test_is_relevant() {
        let classifier = EventClassifier::default();
        assert!(classifier.is_relevant(&record(Some("insert"))));
        assert!(classifier.is_relevant(&record(Some("INSERT"))));
        assert!(!classifier.is_relevant(&record(Some("UPDATE"))));
        assert!(!classifier.is_relevant(&record(Some("delete"))));
        assert!(!classifier.is_relevant(&record(None)));
    }

    #[test]
    fn test_should_skip_entity() {
        let mut entity = Entity::new(AccountSid::parse("AC12345678901234567890123456789012").unwrap());
        entity.flags.insert(SKIP_DEBUG_EVENTS_FLAG_ID);

        assert!(!EventClassifier::new(false).should_skip_entity(&entity));
        assert!(EventClassifier::new(true).should_skip_entity(&entity));

        entity.flags.clear();
        assert!(!EventClassifier::new(true).should_skip_entity(&entity));
    }
}
