//! App foreground transitions.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::listeners::{Listeners, Subscription};

/// Source of "app came to the foreground" notifications.
pub trait ForegroundState: Send + Sync {
    fn subscribe(&self, listener: Box<dyn Fn() + Send + Sync>) -> Subscription;
}

/// Foreground tracker driven by the embedding application.
#[derive(Default)]
pub struct AppForeground {
    foreground: AtomicBool,
    listeners: Listeners,
}

impl AppForeground {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition to the foreground. Listeners fire only on the
    /// background -> foreground edge.
    pub fn enter_foreground(&self) {
        if !self.foreground.swap(true, Ordering::SeqCst) {
            self.listeners.notify();
        }
    }

    pub fn enter_background(&self) {
        self.foreground.store(false, Ordering::SeqCst);
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }
}

impl ForegroundState for AppForeground {
    fn subscribe(&self, listener: Box<dyn Fn() + Send + Sync>) -> Subscription {
        self.listeners.subscribe(listener)
    }
}
