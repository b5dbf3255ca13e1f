use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Response times kept for the rolling average.
pub const RESPONSE_WINDOW: usize = 100;

#[derive(Debug, Default)]
struct MonitorState {
    total_requests: u64,
    errors: u64,
    active_requests: u64,
    response_times_ms: VecDeque<f64>,
    uptime_total: u64,
    uptime_successful: u64,
    logins: u64,
    new_users: u64,
    resource_accesses: u64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SystemMetrics {
    pub running_for_secs: u64,
    pub total_requests: u64,
    pub active_requests: u64,
    pub avg_response_time_ms: f64,
    pub error_rate: f64,
    pub uptime: f64,
    pub logins: u64,
    pub new_users: u64,
    pub resource_accesses: u64,
}

/// Request and activity counters for one process. Built once at startup and
/// shared with handlers as app data.
#[derive(Debug)]
pub struct SystemMonitor {
    started: Instant,
    state: Mutex<MonitorState>,
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMonitor {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            state: Mutex::new(MonitorState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        // Counters stay usable even if a handler panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn request_started(&self) {
        self.state().active_requests += 1;
    }

    /// Records a finished request. Status >= 400 counts as an error,
    /// status >= 500 counts against uptime.
    pub fn request_finished(&self, elapsed: Duration, status: u16) {
        let mut state = self.state();
        state.active_requests = state.active_requests.saturating_sub(1);
        state.total_requests += 1;
        if status >= 400 {
            state.errors += 1;
        }

        if state.response_times_ms.len() == RESPONSE_WINDOW {
            state.response_times_ms.pop_front();
        }
        state
            .response_times_ms
            .push_back(elapsed.as_secs_f64() * 1000.0);

        state.uptime_total += 1;
        if status < 500 {
            state.uptime_successful += 1;
        }
    }

    pub fn record_login(&self) {
        self.state().logins += 1;
    }

    pub fn record_new_user(&self) {
        self.state().new_users += 1;
    }

    pub fn record_resource_access(&self) {
        self.state().resource_accesses += 1;
    }

    pub fn snapshot(&self) -> SystemMetrics {
        let state = self.state();
        let avg_response_time_ms = if state.response_times_ms.is_empty() {
            0.0
        } else {
            state.response_times_ms.iter().sum::<f64>() / state.response_times_ms.len() as f64
        };
        let error_rate = if state.total_requests == 0 {
            0.0
        } else {
            state.errors as f64 / state.total_requests as f64 * 100.0
        };
        let uptime = if state.uptime_total == 0 {
            100.0
        } else {
            state.uptime_successful as f64 / state.uptime_total as f64 * 100.0
        };

        SystemMetrics {
            running_for_secs: self.started.elapsed().as_secs(),
            total_requests: state.total_requests,
            active_requests: state.active_requests,
            avg_response_time_ms,
            error_rate,
            uptime,
            logins: state.logins,
            new_users: state.new_users,
            resource_accesses: state.resource_accesses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_monitor_reports_full_uptime() {
        let metrics = SystemMonitor::new().snapshot();
        assert_eq!(metrics.uptime, 100.0);
        assert_eq!(metrics.error_rate, 0.0);
        assert_eq!(metrics.avg_response_time_ms, 0.0);
    }

    #[test]
    fn client_errors_count_as_errors_but_not_downtime() {
        let monitor = SystemMonitor::new();
        monitor.request_finished(Duration::from_millis(10), 200);
        monitor.request_finished(Duration::from_millis(10), 404);
        monitor.request_finished(Duration::from_millis(10), 500);
        monitor.request_finished(Duration::from_millis(10), 303);

        let metrics = monitor.snapshot();
        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.error_rate, 50.0);
        assert_eq!(metrics.uptime, 75.0);
    }

    #[test]
    fn response_window_keeps_the_latest_hundred() {
        let monitor = SystemMonitor::new();
        for _ in 0..RESPONSE_WINDOW {
            monitor.request_finished(Duration::from_millis(1000), 200);
        }
        for _ in 0..RESPONSE_WINDOW {
            monitor.request_finished(Duration::from_millis(10), 200);
        }
        let metrics = monitor.snapshot();
        assert_eq!(metrics.total_requests, 200);
        assert!((metrics.avg_response_time_ms - 10.0).abs() < 1e-6);
    }

    #[test]
    fn activity_counters() {
        let monitor = SystemMonitor::new();
        monitor.request_started();
        monitor.record_login();
        monitor.record_login();
        monitor.record_new_user();
        monitor.record_resource_access();

        let metrics = monitor.snapshot();
        assert_eq!(metrics.active_requests, 1);
        assert_eq!(metrics.logins, 2);
        assert_eq!(metrics.new_users, 1);
        assert_eq!(metrics.resource_accesses, 1);
    }
}
