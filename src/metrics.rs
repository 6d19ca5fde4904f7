//! 발행 성공/실패 카운터

use prometheus::{IntCounter, Opts, Registry};
use std::sync::atomic::{AtomicU64, Ordering};

/// 발행 결과 카운터. 완료 콜백이 임의의 워커에서 호출되므로 Send + Sync
pub trait Metrics: Send + Sync {
    fn mark_success(&self);
    fn mark_failure(&self);
    fn succeeded(&self) -> u64;
    fn failed(&self) -> u64;
}

/// atomic 카운터 구현
#[derive(Debug, Default)]
pub struct RelayMetrics {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metrics for RelayMetrics {
    fn mark_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// prometheus 레지스트리에 등록되는 구현
#[derive(Clone)]
pub struct PrometheusMetrics {
    succeeded: IntCounter,
    failed: IntCounter,
}

impl PrometheusMetrics {
    pub fn new(service: &str, registry: &Registry) -> prometheus::Result<Self> {
        let succeeded = IntCounter::with_opts(
            Opts::new(
                "relay_messages_succeeded_total",
                "Number of events successfully published",
            )
            .const_label("service", service.to_string()),
        )?;
        let failed = IntCounter::with_opts(
            Opts::new(
                "relay_messages_failed_total",
                "Number of events that failed to publish",
            )
            .const_label("service", service.to_string()),
        )?;

        registry.register(Box::new(succeeded.clone()))?;
        registry.register(Box::new(failed.clone()))?;

        Ok(PrometheusMetrics { succeeded, failed })
    }
}

impl Metrics for PrometheusMetrics {
    fn mark_success(&self) {
        self.succeeded.inc();
    }

    fn mark_failure(&self) {
        self.failed.inc();
    }

    fn succeeded(&self) -> u64 {
        self.succeeded.get()
    }

    fn failed(&self) -> u64 {
        self.failed.get()
    }
}
