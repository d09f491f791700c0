//! Host lifecycle that drives camera bindings

use crate::error::VisionError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle states of the hosting view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initialized,
    Started,
    Stopped,
    Destroyed,
}

impl LifecycleState {
    /// Camera should be streaming in this state
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Started)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Initialized => "initialized",
            LifecycleState::Started => "started",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Observable lifecycle owned by the host.
///
/// Clones share state. `Destroyed` is terminal; dropping every clone is
/// treated the same as destroying it.
#[derive(Clone)]
pub struct LifecycleOwner {
    name: Arc<str>,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl LifecycleOwner {
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        let (state, _) = watch::channel(LifecycleState::Initialized);
        Self {
            name: Arc::from(name),
            state: Arc::new(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == LifecycleState::Destroyed
    }

    pub fn start(&self) -> Result<(), VisionError> {
        self.transition(LifecycleState::Started)
    }

    pub fn stop(&self) -> Result<(), VisionError> {
        self.transition(LifecycleState::Stopped)
    }

    /// Move to `Destroyed`. Calling it again has no effect.
    pub fn destroy(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == LifecycleState::Destroyed {
                false
            } else {
                *state = LifecycleState::Destroyed;
                true
            }
        });
        if changed {
            debug!("Lifecycle '{}' destroyed", self.name);
        }
    }

    /// Receiver that sees every subsequent state change
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    fn transition(&self, next: LifecycleState) -> Result<(), VisionError> {
        let mut rejected = false;
        self.state.send_if_modified(|state| {
            if *state == LifecycleState::Destroyed {
                rejected = true;
                return false;
            }
            if *state == next {
                return false;
            }
            *state = next;
            true
        });

        if rejected {
            return Err(VisionError::Lifecycle(format!(
                "Lifecycle '{}' is destroyed and cannot become {}",
                self.name, next
            )));
        }

        debug!("Lifecycle '{}' is {}", self.name, next);
        Ok(())
    }
}

impl fmt::Debug for LifecycleOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleOwner")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
