//! Queued commands and their tickets.

use serde::Serialize;
use swarm_domain::{FormationSpec, RunId, Vec3, VehicleId};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::CommandError;
use crate::formation::FormationSlot;
use crate::planner::PathMetrics;

/// Mutating commands, applied at the next tick boundary in FIFO order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Materialize pre-allocated vehicles at their spawn points
    CreateSwarm {
        run_id: RunId,
        vehicles: Vec<(VehicleId, Vec3)>,
    },
    Takeoff {
        id: VehicleId,
        height: f64,
        duration: f64,
    },
    Goto {
        id: VehicleId,
        target: Vec3,
        speed: f64,
    },
    Land {
        id: VehicleId,
    },
    SetFormation(FormationSpec),
}

impl Command {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateSwarm { .. } => "createSwarm",
            Self::Takeoff { .. } => "takeoff",
            Self::Goto { .. } => "goto",
            Self::Land { .. } => "land",
            Self::SetFormation(_) => "setFormation",
        }
    }

    /// Target vehicle of single-vehicle commands.
    #[must_use]
    pub const fn vehicle_id(&self) -> Option<&VehicleId> {
        match self {
            Self::Takeoff { id, .. } | Self::Goto { id, .. } | Self::Land { id } => Some(id),
            Self::CreateSwarm { .. } | Self::SetFormation(_) => None,
        }
    }
}

/// What an applied command did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CommandOutcome {
    SwarmCreated {
        run_id: RunId,
        vehicles: Vec<VehicleId>,
    },
    TakeoffStarted {
        id: VehicleId,
    },
    PathAssigned {
        id: VehicleId,
        waypoints: Vec<Vec3>,
        metrics: PathMetrics,
    },
    LandingStarted {
        id: VehicleId,
    },
    FormationAssigned {
        slots: Vec<FormationSlot>,
    },
}

pub type CommandReply = Result<CommandOutcome, CommandError>;

pub(crate) struct QueuedCommand {
    pub command: Command,
    pub reply: oneshot::Sender<CommandReply>,
}

/// Handle on a queued command's dequeue-time outcome.
#[derive(Debug)]
pub struct CommandTicket {
    command: &'static str,
    rx: oneshot::Receiver<CommandReply>,
}

impl CommandTicket {
    pub(crate) fn channel(command: &'static str) -> (oneshot::Sender<CommandReply>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { command, rx })
    }

    #[must_use]
    pub const fn command(&self) -> &'static str {
        self.command
    }

    /// Outcome if the command has been applied, `None` while still queued.
    ///
    /// The outcome is handed out once; later calls report `Cancelled`.
    pub fn try_outcome(&mut self) -> Option<CommandReply> {
        match self.rx.try_recv() {
            Ok(reply) => Some(reply),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(CommandError::Cancelled)),
        }
    }

    /// Wait for the next tick boundary to apply the command.
    pub async fn outcome(self) -> CommandReply {
        self.rx.await.unwrap_or(Err(CommandError::Cancelled))
    }
}

/// Record of one applied command, reported by the tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub command: &'static str,
    pub vehicle_id: Option<VehicleId>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_lifecycle() {
        let (tx, mut ticket) = CommandTicket::channel("land");
        assert_eq!(ticket.command(), "land");
        assert!(ticket.try_outcome().is_none());

        tx.send(Ok(CommandOutcome::LandingStarted {
            id: VehicleId::from("d1"),
        }))
        .unwrap();
        assert!(matches!(
            ticket.try_outcome(),
            Some(Ok(CommandOutcome::LandingStarted { .. }))
        ));
    }

    #[test]
    fn test_dropped_sender_cancels() {
        let (tx, mut ticket) = CommandTicket::channel("goto");
        drop(tx);
        assert_eq!(ticket.try_outcome(), Some(Err(CommandError::Cancelled)));
    }

    #[tokio::test]
    async fn test_await_outcome() {
        let (tx, ticket) = CommandTicket::channel("takeoff");
        tokio::spawn(async move {
            let _ = tx.send(Err(CommandError::InsufficientVehicles));
        });
        assert_eq!(ticket.outcome().await, Err(CommandError::InsufficientVehicles));
    }

    #[test]
    fn test_command_names() {
        let land = Command::Land {
            id: VehicleId::from("d2"),
        };
        assert_eq!(land.name(), "land");
        assert_eq!(land.vehicle_id().map(VehicleId::as_str), Some("d2"));
        assert_eq!(
            Command::SetFormation(FormationSpec::new(
                swarm_domain::FormationShape::Line,
                swarm_domain::FormationParams::default()
            ))
            .vehicle_id(),
            None
        );
    }
}
