//! Simulator callbacks as a single serializable event type.

use serde::Serialize;

use crate::core::common::{MachineId, TaskId, VmId};

/// One inbound simulator callback. The dispatcher consumes events in the
/// order they are delivered; there is no queueing inside the controller.
#[derive(Debug, Clone, Serialize)]
pub enum ClusterEvent {
    /// A new task arrived and must be placed or deferred.
    NewTask { task_id: TaskId },
    /// A task finished; derived state must be refreshed.
    TaskCompleted { task_id: TaskId },
    /// Periodic governor tick.
    PeriodicCheck,
    /// A host is over-committed on memory.
    MemoryWarning { machine_id: MachineId },
    /// The simulator predicts an SLA miss for the task.
    SlaWarning { task_id: TaskId },
    /// An asynchronous sleep-state transition finished.
    StateChangeComplete { machine_id: MachineId },
    /// An asynchronous VM migration finished.
    MigrationComplete { vm_id: VmId },
    /// End of the simulation run.
    SimulationComplete,
}
