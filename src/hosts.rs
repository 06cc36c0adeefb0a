//! Chat host selection and failover.
//!
//! `HostRotation` keeps a list of candidate hosts. A host that last produced a
//! working connection is preferred until a failure asks for the next one;
//! rotation is round-robin over the list. With no candidates the default host
//! is used and rotation is a no-op.

use parking_lot::Mutex;
use tracing::{debug, info};

/// Source of the host the next connection should target.
pub trait HostSelector: Send + Sync {
    /// Number of candidate hosts, never less than one.
    fn host_count(&self) -> usize;

    /// Host the next connect attempt should use.
    fn current_host(&self) -> String;

    /// Move to the next candidate and forget the last known-good host.
    fn switch_to_next(&self);

    /// Remember the current host as known-good.
    fn record_success(&self);
}

#[derive(Debug, Default)]
struct RotationState {
    /// Index into `hosts`; `None` until a host has been chosen explicitly
    index: Option<usize>,
    /// Host that most recently reached `Connected`
    previous_success: Option<String>,
}

/// Round-robin host rotation with known-good preference.
#[derive(Debug)]
pub struct HostRotation {
    hosts: Vec<String>,
    default_host: String,
    state: Mutex<RotationState>,
}

impl HostRotation {
    pub fn new(hosts: Vec<String>, default_host: impl Into<String>) -> Self {
        let hosts = hosts
            .into_iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();
        Self {
            hosts,
            default_host: default_host.into(),
            state: Mutex::new(RotationState::default()),
        }
    }

    /// Seed the rotation with a host known to have worked before.
    pub fn with_previous_success(self, host: impl Into<String>) -> Self {
        let host = host.into();
        if !host.is_empty() {
            self.state.lock().previous_success = Some(host);
        }
        self
    }

    /// Build the WebSocket URL for the current host.
    pub fn websocket_url(&self, scheme: &str, path: &str) -> String {
        format!("{}://{}{}", scheme, self.current_host(), path)
    }

    pub fn previous_success(&self) -> Option<String> {
        self.state.lock().previous_success.clone()
    }

    fn position(&self, host: &str) -> Option<usize> {
        self.hosts.iter().position(|h| h == host)
    }
}

impl HostSelector for HostRotation {
    fn host_count(&self) -> usize {
        self.hosts.len().max(1)
    }

    fn current_host(&self) -> String {
        let mut state = self.state.lock();
        if let Some(previous) = state.previous_success.clone() {
            if let Some(idx) = self.position(&previous) {
                state.index = Some(idx);
            }
            return previous;
        }
        if self.hosts.is_empty() {
            return self.default_host.clone();
        }
        self.hosts[state.index.unwrap_or(0)].clone()
    }

    fn switch_to_next(&self) {
        let mut state = self.state.lock();
        if state.index.is_none() {
            if let Some(previous) = state.previous_success.as_deref() {
                state.index = self.position(previous);
            }
        }
        if self.hosts.is_empty() {
            info!("No candidate hosts for chat websocket, switch host skipped");
        } else {
            let next = (state.index.unwrap_or(0) + 1) % self.hosts.len();
            debug!(host = %self.hosts[next], "Switched chat websocket host");
            state.index = Some(next);
        }
        state.previous_success = None;
    }

    fn record_success(&self) {
        let host = self.current_host();
        debug!(host = %host, "Recording known-good chat websocket host");
        self.state.lock().previous_success = Some(host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation() -> HostRotation {
        HostRotation::new(
            vec!["a.example".into(), "b.example".into(), "c.example".into()],
            "default.example",
        )
    }

    #[test]
    fn test_starts_on_first_host_and_rotates_round_robin() {
        let hosts = rotation();
        assert_eq!(hosts.host_count(), 3);
        assert_eq!(hosts.current_host(), "a.example");
        hosts.switch_to_next();
        assert_eq!(hosts.current_host(), "b.example");
        hosts.switch_to_next();
        hosts.switch_to_next();
        assert_eq!(hosts.current_host(), "a.example");
    }

    #[test]
    fn test_prefers_previous_success_until_switched() {
        let hosts = rotation().with_previous_success("c.example");
        assert_eq!(hosts.current_host(), "c.example");

        hosts.switch_to_next();
        assert_eq!(hosts.previous_success(), None);
        assert_eq!(hosts.current_host(), "a.example");
    }

    #[test]
    fn test_record_success_pins_current_host() {
        let hosts = rotation();
        hosts.switch_to_next();
        hosts.record_success();
        assert_eq!(hosts.previous_success().as_deref(), Some("b.example"));
        assert_eq!(hosts.current_host(), "b.example");
    }

    #[test]
    fn test_empty_list_falls_back_to_default() {
        let hosts = HostRotation::new(vec![" ".into()], "default.example");
        assert_eq!(hosts.host_count(), 1);
        assert_eq!(hosts.current_host(), "default.example");
        hosts.switch_to_next();
        assert_eq!(hosts.current_host(), "default.example");
        assert_eq!(
            hosts.websocket_url("wss", "/v1/websocket/"),
            "wss://default.example/v1/websocket/"
        );
    }
}
