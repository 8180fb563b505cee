//! Flow log for phase transitions.
//!
//! Keeps the most recent events in memory so status queries can show how a
//! session moved through the pipeline. Owned by the service object.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Environment variable to disable the flow log
pub const DISABLE_FLOW_LOG_ENV: &str = "CONSTRUCTOR_DISABLE_FLOW_LOG";

pub const DEFAULT_FLOW_LOG_CAP: usize = 500;

/// Check if the flow log is enabled
pub fn is_flow_log_enabled() -> bool {
    match std::env::var(DISABLE_FLOW_LOG_ENV) {
        Ok(val) => {
            let val_lower = val.to_lowercase();
            !matches!(val_lower.as_str(), "1" | "true" | "yes" | "on")
        }
        Err(_) => true,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEvent {
    pub session_id: String,
    pub phase: u8,
    pub phase_name: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct FlowLog {
    events: Arc<RwLock<VecDeque<FlowEvent>>>,
    cap: usize,
    enabled: bool,
}

impl FlowLog {
    pub fn new(cap: usize) -> Self {
        let enabled = is_flow_log_enabled();
        if !enabled {
            debug!("Flow log disabled via {}", DISABLE_FLOW_LOG_ENV);
        }
        Self {
            events: Arc::new(RwLock::new(VecDeque::new())),
            cap: cap.max(1),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a phase transition, evicting the oldest event when full.
    pub async fn record(&self, session_id: &str, phase: u8, phase_name: &str, detail: &str) {
        if !self.enabled {
            return;
        }
        debug!(
            "[{}] phase {} ({}): {}",
            session_id, phase, phase_name, detail
        );

        let mut events = self.events.write().await;
        if events.len() >= self.cap {
            events.pop_front();
        }
        events.push_back(FlowEvent {
            session_id: session_id.to_string(),
            phase,
            phase_name: phase_name.to_string(),
            detail: detail.to_string(),
            at: Utc::now(),
        });
    }

    /// Events for one session, oldest first.
    pub async fn for_session(&self, session_id: &str) -> Vec<FlowEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

impl Default for FlowLog {
    fn default() -> Self {
        Self::new(DEFAULT_FLOW_LOG_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    struct EnvVarRestore {
        prev: Option<String>,
    }

    impl EnvVarRestore {
        fn new() -> Self {
            Self {
                prev: std::env::var(DISABLE_FLOW_LOG_ENV).ok(),
            }
        }
    }

    impl Drop for EnvVarRestore {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => std::env::set_var(DISABLE_FLOW_LOG_ENV, value),
                None => std::env::remove_var(DISABLE_FLOW_LOG_ENV),
            }
        }
    }

    #[test]
    fn test_flow_log_switch() {
        let _env_lock_guard = env_lock().lock().unwrap();
        let _env_restore = EnvVarRestore::new();

        std::env::remove_var(DISABLE_FLOW_LOG_ENV);
        assert!(is_flow_log_enabled());

        for value in ["1", "true", "TRUE", "yes", "on"] {
            std::env::set_var(DISABLE_FLOW_LOG_ENV, value);
            assert!(!is_flow_log_enabled());
        }
        for value in ["0", "false", "no"] {
            std::env::set_var(DISABLE_FLOW_LOG_ENV, value);
            assert!(is_flow_log_enabled());
        }
    }

    #[tokio::test]
    async fn test_disabled_log_records_nothing() {
        let log = {
            let _env_lock_guard = env_lock().lock().unwrap();
            let _env_restore = EnvVarRestore::new();
            std::env::set_var(DISABLE_FLOW_LOG_ENV, "1");
            FlowLog::new(10)
        };
        assert!(!log.is_enabled());
        log.record("s1", 1, "analysis", "start").await;
        assert_eq!(log.len().await, 0);
    }

    #[tokio::test]
    async fn test_log_is_bounded() {
        let log = {
            let _env_lock_guard = env_lock().lock().unwrap();
            let _env_restore = EnvVarRestore::new();
            std::env::remove_var(DISABLE_FLOW_LOG_ENV);
            FlowLog::new(3)
        };
        for i in 0..5u8 {
            log.record("s1", i, "analysis", &format!("event {}", i)).await;
        }
        log.record("s2", 1, "analysis", "other").await;

        assert_eq!(log.len().await, 3);
        let events = log.for_session("s1").await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].detail, "event 3");
    }
}
