//! Process metrics.
//!
//! All counters live in one [`KaldbMetrics`] struct registered against an
//! injected [`prometheus::Registry`], so every service shares one set of
//! counters in production while each test builds its own registry and
//! starts from zero.
//!
//! The counter names are part of the operational contract; dashboards and
//! the integration tests key off them.

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};

use crate::errors::{Error, Result};

pub const MESSAGES_RECEIVED: &str = "messages_received";
pub const MESSAGES_FAILED: &str = "messages_failed";
pub const ROLLOVERS_INITIATED: &str = "rollovers_initiated";
pub const ROLLOVERS_COMPLETED: &str = "rollovers_completed";
pub const ROLLOVERS_FAILED: &str = "rollovers_failed";
pub const RECOVERY_NODE_ASSIGNMENT_RECEIVED: &str = "recovery_node_assignment_received";
pub const RECOVERY_NODE_ASSIGNMENT_SUCCESS: &str = "recovery_node_assignment_success";
pub const RECOVERY_NODE_ASSIGNMENT_FAILED: &str = "recovery_node_assignment_failed";
pub const RECOVERY_TASK_DURATION: &str = "recovery_task_duration_seconds";

/// Time `$body` into `$histogram`.
#[macro_export]
macro_rules! with_timer {
    ($histogram:expr, $body:expr) => {{
        let now = std::time::Instant::now();
        let res = $body;
        $histogram.observe(now.elapsed().as_secs_f64());
        res
    }};
}

pub struct KaldbMetrics {
    pub messages_received: IntCounter,
    pub messages_failed: IntCounter,
    pub rollovers_initiated: IntCounter,
    pub rollovers_completed: IntCounter,
    pub rollovers_failed: IntCounter,
    pub recovery_node_assignment_received: IntCounter,
    pub recovery_node_assignment_success: IntCounter,
    pub recovery_node_assignment_failed: IntCounter,
    pub recovery_task_duration: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter =
        IntCounter::new(name, help).map_err(|err| Error::Config(format!("metric {name}: {err}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|err| Error::Config(format!("metric {name}: {err}")))?;
    Ok(counter)
}

impl KaldbMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let recovery_task_duration = Histogram::with_opts(HistogramOpts::new(
            RECOVERY_TASK_DURATION,
            "Wall-clock time spent executing one recovery task",
        ))
        .map_err(|err| Error::Config(format!("metric {RECOVERY_TASK_DURATION}: {err}")))?;
        registry
            .register(Box::new(recovery_task_duration.clone()))
            .map_err(|err| Error::Config(format!("metric {RECOVERY_TASK_DURATION}: {err}")))?;

        Ok(Self {
            messages_received: counter(
                registry,
                MESSAGES_RECEIVED,
                "Messages successfully parsed and appended to the local index",
            )?,
            messages_failed: counter(
                registry,
                MESSAGES_FAILED,
                "Messages dropped because they could not be parsed",
            )?,
            rollovers_initiated: counter(
                registry,
                ROLLOVERS_INITIATED,
                "Chunk uploads started",
            )?,
            rollovers_completed: counter(
                registry,
                ROLLOVERS_COMPLETED,
                "Chunk uploads completed and verified",
            )?,
            rollovers_failed: counter(
                registry,
                ROLLOVERS_FAILED,
                "Chunk builds or uploads that failed",
            )?,
            recovery_node_assignment_received: counter(
                registry,
                RECOVERY_NODE_ASSIGNMENT_RECEIVED,
                "Task assignments observed on this node's metadata entry",
            )?,
            recovery_node_assignment_success: counter(
                registry,
                RECOVERY_NODE_ASSIGNMENT_SUCCESS,
                "Assigned recovery tasks that completed",
            )?,
            recovery_node_assignment_failed: counter(
                registry,
                RECOVERY_NODE_ASSIGNMENT_FAILED,
                "Assigned recovery tasks that failed and were left for reassignment",
            )?,
            recovery_task_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_names_are_registered() {
        let registry = Registry::new();
        let _metrics = KaldbMetrics::new(&registry).unwrap();

        let names: Vec<String> = registry
            .gather()
            .into_iter()
            .map(|family| family.get_name().to_string())
            .collect();
        for name in [
            MESSAGES_RECEIVED,
            MESSAGES_FAILED,
            ROLLOVERS_INITIATED,
            ROLLOVERS_COMPLETED,
            ROLLOVERS_FAILED,
            RECOVERY_NODE_ASSIGNMENT_RECEIVED,
            RECOVERY_NODE_ASSIGNMENT_SUCCESS,
            RECOVERY_NODE_ASSIGNMENT_FAILED,
            RECOVERY_TASK_DURATION,
        ] {
            assert!(names.iter().any(|n| n == name), "missing metric {name}");
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = Registry::new();
        let _metrics = KaldbMetrics::new(&registry).unwrap();
        assert!(KaldbMetrics::new(&registry).is_err());
    }

    #[test]
    fn with_timer_records_and_passes_through() {
        let registry = Registry::new();
        let metrics = KaldbMetrics::new(&registry).unwrap();
        let out = with_timer!(metrics.recovery_task_duration, 2 + 2);
        assert_eq!(out, 4);
        assert_eq!(metrics.recovery_task_duration.get_sample_count(), 1);
    }
}
