//! Connection lifecycle state machine.
//!
//! ```text
//!   Uninitialized --initialize--> Initializing --ok--> Initialized
//!        |   ^                         |                    |
//!        |   +-------- handler failed -+                 shutdown
//!        |                                                  v
//!        +------------------- exit ------------------>  ShuttingDown
//!                                                           |
//!   (exit from any non-terminal state) ---------------> Exited
//! ```
//!
//! The dispatcher asks the controller to admit each inbound message; the
//! controller performs any transition the message triggers and tells the
//! dispatcher what to do with it.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::info;

use super::catalog::methods;

/// Lifecycle phase of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Initialized,
    ShuttingDown,
    Exited,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Initialized => "initialized",
            ConnectionState::ShuttingDown => "shutting down",
            ConnectionState::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// What to do with an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAdmission {
    /// Run the initialize handler; the state is now `Initializing`.
    Initialize,
    /// Run the shutdown handler; the state is now `ShuttingDown`.
    Shutdown,
    /// Ordinary dispatch through the handler registry.
    Dispatch,
    /// Answer with a lifecycle violation error.
    Reject(String),
    /// Connection has exited; send nothing.
    Drop,
}

/// What to do with an inbound notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAdmission {
    /// Ordinary dispatch through the handler registry.
    Dispatch,
    /// Terminate the connection; the state is now `Exited`.
    Exit,
    /// Not legal in this phase; ignore it.
    Ignore,
    /// Connection has exited.
    Drop,
}

#[derive(Debug)]
struct Phase {
    state: ConnectionState,
    shutdown_received: bool,
}

/// Lifecycle controller. The only place connection state is mutated.
#[derive(Debug)]
pub struct Lifecycle {
    phase: Mutex<Phase>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase {
                state: ConnectionState::Uninitialized,
                shutdown_received: false,
            }),
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.phase().state
    }

    pub fn is_exited(&self) -> bool {
        self.state() == ConnectionState::Exited
    }

    /// True once `shutdown` has been accepted. Exiting after that is clean.
    pub fn shutdown_received(&self) -> bool {
        self.phase().shutdown_received
    }

    /// Admit an inbound request, applying any transition it triggers.
    pub fn admit_request(&self, method: &str) -> RequestAdmission {
        let mut phase = self.phase();

        match (phase.state, method) {
            (ConnectionState::Exited, _) => RequestAdmission::Drop,
            (ConnectionState::Uninitialized, methods::INITIALIZE) => {
                transition(&mut phase, ConnectionState::Initializing);
                RequestAdmission::Initialize
            }
            (ConnectionState::Uninitialized, _) => {
                RequestAdmission::Reject("Server not initialized".to_string())
            }
            (ConnectionState::Initializing, methods::INITIALIZE) => {
                RequestAdmission::Reject("Initialize already in progress".to_string())
            }
            (ConnectionState::Initializing, _) => {
                RequestAdmission::Reject("Server not initialized".to_string())
            }
            (ConnectionState::Initialized, methods::INITIALIZE) => {
                RequestAdmission::Reject("Server already initialized".to_string())
            }
            (ConnectionState::Initialized, methods::SHUTDOWN) => {
                phase.shutdown_received = true;
                transition(&mut phase, ConnectionState::ShuttingDown);
                RequestAdmission::Shutdown
            }
            (ConnectionState::Initialized, _) => RequestAdmission::Dispatch,
            (ConnectionState::ShuttingDown, _) => {
                RequestAdmission::Reject("Server is shutting down".to_string())
            }
        }
    }

    /// Admit an inbound notification, applying any transition it triggers.
    pub fn admit_notification(&self, method: &str) -> NotificationAdmission {
        let mut phase = self.phase();

        match (phase.state, method) {
            (ConnectionState::Exited, _) => NotificationAdmission::Drop,
            (_, methods::EXIT) => {
                transition(&mut phase, ConnectionState::Exited);
                NotificationAdmission::Exit
            }
            (ConnectionState::Initialized, _) => NotificationAdmission::Dispatch,
            _ => NotificationAdmission::Ignore,
        }
    }

    /// Record the outcome of the initialize handler.
    pub fn initialize_finished(&self, succeeded: bool) {
        let mut phase = self.phase();
        if phase.state != ConnectionState::Initializing {
            return;
        }
        let next = if succeeded {
            ConnectionState::Initialized
        } else {
            ConnectionState::Uninitialized
        };
        transition(&mut phase, next);
    }

    /// Force the terminal state (stream closed or framing fault).
    pub fn terminate(&self) {
        let mut phase = self.phase();
        if phase.state != ConnectionState::Exited {
            transition(&mut phase, ConnectionState::Exited);
        }
    }
}

fn transition(phase: &mut Phase, next: ConnectionState) {
    info!("Connection state {} -> {}", phase.state, next);
    phase.state = next;
}
