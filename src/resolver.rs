//! 계정(Entity) 조회 캐시
//!
//! - 키당 동시에 하나의 원격 조회만 수행 (single-flight)
//! - 성공 결과는 만료 없이 캐시
//! - 실패는 캐시하지 않음: 대기 중이던 호출자 모두에게 전달하고, 다음 호출에서 재시도

use crate::error::{LookupError, ResolutionError};
use crate::sid::AccountSid;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// 디버그 이벤트 발행을 끄는 계정 플래그
pub const SKIP_DEBUG_EVENTS_FLAG_ID: u64 = 508;

/// 해석된 계정 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// 계정 SID
    pub sid: AccountSid,
    /// 상위 계정 (최대 한 단계)
    #[serde(default)]
    pub parent_sid: Option<AccountSid>,
    /// 활성화된 계정 플래그 ID 목록
    #[serde(default)]
    pub flags: BTreeSet<u64>,
}

impl Entity {
    pub fn new(sid: AccountSid) -> Self {
        Entity {
            sid,
            parent_sid: None,
            flags: BTreeSet::new(),
        }
    }

    pub fn has_flag(&self, flag: u64) -> bool {
        self.flags.contains(&flag)
    }
}

/// 원격 계정 조회 클라이언트
#[async_trait]
pub trait EntityLookup: Send + Sync {
    async fn lookup(&self, sid: &AccountSid) -> Result<Entity, LookupError>;
}

/// 메모리 기반 조회 (JSON 파일 등에서 미리 읽어둔 계정 목록)
#[derive(Debug, Default)]
pub struct StaticLookup {
    entities: HashMap<AccountSid, Entity>,
}

impl StaticLookup {
    pub fn new(entities: impl IntoIterator<Item = Entity>) -> Self {
        StaticLookup {
            entities: entities.into_iter().map(|e| (e.sid.clone(), e)).collect(),
        }
    }

    /// JSON 배열 파싱: [{"sid": "AC...", "parent_sid": null, "flags": [508]}]
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        let entities: Vec<Entity> = serde_json::from_str(json)?;
        Ok(StaticLookup::new(entities))
    }

    /// JSON 파일에서 계정 목록 읽기
    pub async fn load(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[async_trait]
impl EntityLookup for StaticLookup {
    async fn lookup(&self, sid: &AccountSid) -> Result<Entity, LookupError> {
        self.entities
            .get(sid)
            .cloned()
            .ok_or_else(|| LookupError::new(format!("account {} not found", sid)))
    }
}

type LoadResult = Option<Result<Arc<Entity>, ResolutionError>>;

enum Slot {
    Ready(Arc<Entity>),
    Loading(watch::Receiver<LoadResult>),
}

enum Role {
    Leader(watch::Sender<LoadResult>),
    Follower(watch::Receiver<LoadResult>),
}

/// 조회를 맡은 호출자가 중간에 취소되면 Loading 슬롯을 정리
struct LoadGuard<'a> {
    slots: &'a Mutex<HashMap<String, Slot>>,
    key: &'a str,
    armed: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut slots = self.slots.lock();
            if matches!(slots.get(self.key), Some(Slot::Loading(_))) {
                slots.remove(self.key);
            }
        }
    }
}

/// single-flight 계정 캐시
pub struct EntityResolver<L: EntityLookup + ?Sized> {
    lookup: Arc<L>,
    slots: Mutex<HashMap<String, Slot>>,
    attempts: u32,
}

impl<L: EntityLookup + ?Sized> EntityResolver<L> {
    pub fn new(lookup: Arc<L>) -> Self {
        Self::with_attempts(lookup, 1)
    }

    /// 실패 시 같은 조회 안에서 최대 `attempts`번 시도
    pub fn with_attempts(lookup: Arc<L>, attempts: u32) -> Self {
        EntityResolver {
            lookup,
            slots: Mutex::new(HashMap::new()),
            attempts: attempts.max(1),
        }
    }

    /// 계정 식별자를 Entity로 해석
    pub async fn resolve(&self, id: &str) -> Result<Arc<Entity>, ResolutionError> {
        let sid = AccountSid::parse(id)?;
        // 공백 등이 정리된 형태로 키를 잡아야 같은 계정이 한 번만 조회됨
        let key = sid.as_str();

        let role = {
            let mut slots = self.slots.lock();
            let role = match slots.get(key) {
                Some(Slot::Ready(entity)) => {
                    debug!("Account cache hit: {}", key);
                    return Ok(entity.clone());
                }
                Some(Slot::Loading(rx)) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    slots.insert(key.to_string(), Slot::Loading(rx));
                    Role::Leader(tx)
                }
            };
            role
        };

        match role {
            Role::Leader(tx) => {
                let mut guard = LoadGuard {
                    slots: &self.slots,
                    key,
                    armed: true,
                };
                let result = self.load(&sid).await;

                {
                    let mut slots = self.slots.lock();
                    match &result {
                        Ok(entity) => {
                            slots.insert(key.to_string(), Slot::Ready(entity.clone()));
                        }
                        Err(_) => {
                            slots.remove(key);
                        }
                    }
                }
                guard.armed = false;

                tx.send_replace(Some(result.clone()));
                result
            }
            Role::Follower(mut rx) => {
                debug!("Waiting for in-flight account lookup: {}", key);
                // 조회를 맡은 쪽이 결과 없이 사라지면 Err
                let shared = match rx.wait_for(|value| value.is_some()).await {
                    Ok(value) => value.clone(),
                    Err(_) => None,
                };
                shared.unwrap_or_else(|| Err(ResolutionError::Abandoned(key.to_string())))
            }
        }
    }

    async fn load(&self, sid: &AccountSid) -> Result<Arc<Entity>, ResolutionError> {
        let mut attempt = 1;
        loop {
            match self.lookup.lookup(sid).await {
                Ok(entity) => return Ok(Arc::new(entity)),
                Err(e) if attempt < self.attempts => {
                    warn!(
                        "Account lookup for {} failed (attempt {}/{}): {}",
                        sid, attempt, self.attempts, e
                    );
                    attempt += 1;
                }
                Err(e) => {
                    error!("Error while getting account data for {}: {}", sid, e);
                    return Err(ResolutionError::Lookup(e));
                }
            }
        }
    }

    /// 캐시된 계정 수
    pub fn cached(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }
}
