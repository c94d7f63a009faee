//! Operator notices: the side channel lifecycle and reconciler operations
//! report through. Nothing in the scheduler branches on delivery.

use std::sync::Mutex;

use feedcron_core::TenantKey;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub tenant: Option<TenantKey>,
    pub text: String,
}

impl Notice {
    pub fn info(tenant: &TenantKey, text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, tenant, text)
    }

    pub fn success(tenant: &TenantKey, text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, tenant, text)
    }

    pub fn error(tenant: &TenantKey, text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, tenant, text)
    }

    fn new(level: NoticeLevel, tenant: &TenantKey, text: impl Into<String>) -> Self {
        Self {
            level,
            tenant: Some(tenant.clone()),
            text: text.into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        let tenant = notice
            .tenant
            .as_ref()
            .map(TenantKey::as_str)
            .unwrap_or("-");
        match notice.level {
            NoticeLevel::Info | NoticeLevel::Success => {
                info!(tenant, level = ?notice.level, "{}", notice.text)
            }
            NoticeLevel::Error => warn!(tenant, "{}", notice.text),
        }
    }
}

/// Buffers notices in memory until a reader drains them.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything collected so far.
    pub fn drain(&self) -> Vec<Notice> {
        let mut notices = self.notices.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *notices)
    }

    pub fn snapshot(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notice: Notice) {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notice);
    }
}

/// Forwards every notice to each inner notifier in order.
pub struct FanoutNotifier {
    targets: Vec<std::sync::Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(targets: Vec<std::sync::Arc<dyn Notifier>>) -> Self {
        Self { targets }
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, notice: Notice) {
        for target in &self.targets {
            target.notify(notice.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn memory_notifier_drains_in_order() {
        let notifier = MemoryNotifier::new();
        let tenant = TenantKey::from("default");
        notifier.notify(Notice::info(&tenant, "one"));
        notifier.notify(Notice::error(&tenant, "two"));

        assert_eq!(notifier.snapshot().len(), 2);
        let drained = notifier.drain();
        assert_eq!(drained[0].text, "one");
        assert_eq!(drained[1].level, NoticeLevel::Error);
        assert!(notifier.drain().is_empty());
    }

    #[test]
    fn fanout_reaches_every_target() {
        let a = Arc::new(MemoryNotifier::new());
        let b = Arc::new(MemoryNotifier::new());
        let targets: Vec<Arc<dyn Notifier>> = vec![a.clone(), b.clone(), Arc::new(TracingNotifier)];
        let fanout = FanoutNotifier::new(targets);
        fanout.notify(Notice::success(&TenantKey::from("es"), "rescheduled"));
        assert_eq!(a.drain().len(), 1);
        assert_eq!(b.drain().len(), 1);
    }
}
