//! Finite state machine for container status

use crate::models::deployment::ContainerStatus;

/// Container lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerEvent {
    /// A first task was created
    Created,

    /// A replacement task was created; `replacing` if a current task exists
    UpgradeStarted { replacing: bool },

    /// The current task reported healthy
    Healthy,

    /// The new task took over
    UpgradeCompleted,

    /// The new task was dropped, the old one keeps serving
    UpgradeAborted,

    /// Task stopped after inactivity or on request
    Hibernated,

    /// Upgrade failed with no healthy task left
    Failed,

    /// Deployment torn down
    Deleted,
}

/// Container status FSM
#[derive(Debug, Clone)]
pub struct ContainerFsm {
    state: ContainerStatus,
}

impl ContainerFsm {
    /// Create a new FSM in hibernating state
    pub fn new() -> Self {
        Self::from_status(ContainerStatus::Hibernating)
    }

    pub fn from_status(state: ContainerStatus) -> Self {
        Self { state }
    }

    /// Get current state
    pub fn state(&self) -> ContainerStatus {
        self.state
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: ContainerEvent) -> Result<(), String> {
        self.state = next_status(self.state, event)?;
        Ok(())
    }
}

impl Default for ContainerFsm {
    fn default() -> Self {
        Self::new()
    }
}

/// Status after `event`, or an error when the event does not apply
pub fn next_status(state: ContainerStatus, event: ContainerEvent) -> Result<ContainerStatus, String> {
    use ContainerStatus::*;

    let next = match (state, event) {
        (_, ContainerEvent::Created) => Starting,

        (_, ContainerEvent::UpgradeStarted { replacing: true }) => Restarting,
        (_, ContainerEvent::UpgradeStarted { replacing: false }) => Starting,

        // A stopped container cannot report health; the signal is stale
        (Hibernating | Failed, ContainerEvent::Healthy | ContainerEvent::UpgradeCompleted) => {
            return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
        }
        (_, ContainerEvent::Healthy | ContainerEvent::UpgradeCompleted) => Running,

        (Hibernating, ContainerEvent::UpgradeAborted) => {
            return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
        }
        (_, ContainerEvent::UpgradeAborted) => Running,

        (_, ContainerEvent::Hibernated | ContainerEvent::Deleted) => Hibernating,
        (_, ContainerEvent::Failed) => Failed,
    };

    Ok(next)
}
