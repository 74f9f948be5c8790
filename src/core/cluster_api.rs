//! Interface between the controller and the simulated cluster.

use serde::Serialize;
use thiserror::Error;

use crate::core::common::{CpuArch, MachineId, PState, Priority, SState, SlaTier, TaskId, Time, VmId, VmType};

/// Errors signalled by cluster queries and actuators.
///
/// Failures are expected during normal operation (a machine may refuse an
/// attach, a task may already be gone) and never escape a controller entry
/// point: every call site either falls back to the next candidate or
/// abandons the current action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("machine {0} not found")]
    MachineNotFound(MachineId),

    #[error("vm {0} not found")]
    VmNotFound(VmId),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("machine {machine} refused to attach vm {vm}")]
    AttachRefused { vm: VmId, machine: MachineId },

    #[error("vm {vm} rejected task {task}")]
    TaskRejected { vm: VmId, task: TaskId },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Snapshot of a physical machine as reported by the cluster.
#[derive(Debug, Clone, Serialize)]
pub struct MachineInfo {
    pub id: MachineId,
    pub cpu: CpuArch,
    pub num_cpus: u32,
    /// Total memory capacity in MB.
    pub memory_size: u64,
    /// Memory currently committed to VMs and tasks in MB.
    pub memory_used: u64,
    pub active_tasks: u32,
    pub active_vms: u32,
    pub gpus: bool,
    pub s_state: SState,
    pub p_state: PState,
    /// Idle power draw per sleep state, indexed by [`SState::index`].
    pub s_state_powers: Vec<u64>,
}

impl MachineInfo {
    /// Idle power draw in the active state, used for the efficiency ranking.
    /// Machines with no reported power table rank last.
    pub fn s0_idle_power(&self) -> u64 {
        self.s_state_powers.first().copied().unwrap_or(u64::MAX)
    }
}

/// Snapshot of a virtual machine as reported by the cluster.
#[derive(Debug, Clone, Serialize)]
pub struct VmInfo {
    pub id: VmId,
    pub vm_type: VmType,
    pub cpu: CpuArch,
    /// Hosting machine, `None` while the VM awaits attachment.
    pub machine_id: Option<MachineId>,
    pub active_tasks: Vec<TaskId>,
}

/// Snapshot of a task as reported by the cluster.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub required_cpu: CpuArch,
    pub required_vm_type: VmType,
    pub required_sla: SlaTier,
    /// Memory footprint in MB, reserved on the host for the task's lifetime.
    pub required_memory: u64,
    pub target_completion: Time,
    pub priority: Priority,
}

/// The narrow surface through which the controller observes and actuates the
/// cluster. The simulator implements it for real runs; tests implement it
/// with a scripted mock.
///
/// `machine_set_state` and `vm_migrate` complete asynchronously: the new
/// state is not observable until the corresponding completion callback
/// fires. All other actuators take effect eagerly.
pub trait ClusterApi {
    // Queries.

    /// Number of machines in the cluster census. Machine ids are dense
    /// integers in `0..machine_count()`.
    fn machine_count(&self) -> u32;

    fn machine_info(&self, machine: MachineId) -> Result<MachineInfo>;

    fn vm_info(&self, vm: VmId) -> Result<VmInfo>;

    fn task_info(&self, task: TaskId) -> Result<TaskInfo>;

    fn task_memory(&self, task: TaskId) -> Result<u64>;

    fn task_priority(&self, task: TaskId) -> Result<Priority>;

    fn required_cpu(&self, task: TaskId) -> Result<CpuArch>;

    fn required_vm_type(&self, task: TaskId) -> Result<VmType>;

    fn required_sla(&self, task: TaskId) -> Result<SlaTier>;

    /// Percent of tasks in the given tier that violated their SLA so far.
    fn sla_report(&self, sla: SlaTier) -> f64;

    /// Total cluster energy consumption in KW-Hour.
    fn cluster_energy(&self) -> f64;

    // Actuators.

    fn vm_create(&mut self, vm_type: VmType, cpu: CpuArch) -> Result<VmId>;

    fn vm_attach(&mut self, vm: VmId, machine: MachineId) -> Result<()>;

    fn vm_add_task(&mut self, vm: VmId, task: TaskId, priority: Priority) -> Result<()>;

    fn vm_remove_task(&mut self, vm: VmId, task: TaskId) -> Result<()>;

    fn vm_migrate(&mut self, vm: VmId, machine: MachineId) -> Result<()>;

    fn vm_shutdown(&mut self, vm: VmId) -> Result<()>;

    fn machine_set_state(&mut self, machine: MachineId, state: SState) -> Result<()>;

    fn machine_set_core_performance(&mut self, machine: MachineId, core: u32, p_state: PState) -> Result<()>;

    fn set_task_priority(&mut self, task: TaskId, priority: Priority) -> Result<()>;
}
