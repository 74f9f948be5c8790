#![allow(dead_code)]

//! Scripted in-memory cluster used to drive controllers in tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use greensched::core::cluster_api::{ClusterApi, ClusterError, MachineInfo, Result, TaskInfo, VmInfo};
use greensched::core::common::{CpuArch, MachineId, PState, Priority, SState, SlaTier, TaskId, VmId, VmType};
use greensched::core::config::ControllerConfig;
use greensched::core::controller::Controller;
use greensched::core::logger::StdoutLogger;

/// Matches the `vm_memory_overhead` default of [`ControllerConfig`].
pub const VM_OVERHEAD: u64 = 8;

/// One recorded actuator invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    VmCreate { vm_type: VmType, cpu: CpuArch },
    VmAttach { vm: VmId, machine: MachineId },
    VmAddTask { vm: VmId, task: TaskId, priority: Priority },
    VmRemoveTask { vm: VmId, task: TaskId },
    VmMigrate { vm: VmId, machine: MachineId },
    VmShutdown { vm: VmId },
    SetState { machine: MachineId, state: SState },
    SetCorePerformance { machine: MachineId, core: u32, p_state: PState },
    SetTaskPriority { task: TaskId, priority: Priority },
}

/// Cluster double: answers queries from scripted state, records actuator
/// calls, and models the asynchronous actuators (`machine_set_state`,
/// `vm_migrate`) by applying them only when the test calls the matching
/// `complete_*` helper.
pub struct MockCluster {
    machines: BTreeMap<MachineId, MachineInfo>,
    vms: BTreeMap<VmId, VmInfo>,
    tasks: BTreeMap<TaskId, TaskInfo>,
    requested_states: BTreeMap<MachineId, SState>,
    requested_migrations: BTreeMap<VmId, MachineId>,
    next_vm_id: VmId,
    pub calls: Vec<Call>,
    pub energy: f64,
    pub sla_violations: [f64; 4],
    pub refuse_attach: bool,
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            machines: BTreeMap::new(),
            vms: BTreeMap::new(),
            tasks: BTreeMap::new(),
            requested_states: BTreeMap::new(),
            requested_migrations: BTreeMap::new(),
            next_vm_id: 0,
            calls: Vec::new(),
            energy: 0.0,
            sla_violations: [0.0; 4],
            refuse_attach: false,
        }
    }

    pub fn add_machine(&mut self, cpu: CpuArch, num_cpus: u32, memory_size: u64, s_state: SState, s0_power: u64) -> MachineId {
        let id = self.machines.len() as MachineId;
        self.machines.insert(
            id,
            MachineInfo {
                id,
                cpu,
                num_cpus,
                memory_size,
                memory_used: 0,
                active_tasks: 0,
                active_vms: 0,
                gpus: false,
                s_state,
                p_state: PState::P3,
                s_state_powers: vec![s0_power, 20, 16, 12, 8, 4, 0],
            },
        );
        id
    }

    pub fn add_task(&mut self, cpu: CpuArch, vm_type: VmType, sla: SlaTier, memory: u64, target_completion: u64) -> TaskId {
        let id = self.tasks.len() as TaskId;
        self.tasks.insert(
            id,
            TaskInfo {
                id,
                required_cpu: cpu,
                required_vm_type: vm_type,
                required_sla: sla,
                required_memory: memory,
                target_completion,
                priority: Priority::Low,
            },
        );
        id
    }

    /// Puts an existing task onto an attached VM, bypassing the controller.
    pub fn run_task(&mut self, vm: VmId, task: TaskId) {
        let memory = self.tasks[&task].required_memory;
        let vm_info = self.vms.get_mut(&vm).expect("unknown vm");
        vm_info.active_tasks.push(task);
        let machine = vm_info.machine_id.expect("vm not attached");
        let machine_info = self.machines.get_mut(&machine).unwrap();
        machine_info.active_tasks += 1;
        machine_info.memory_used += memory;
    }

    /// Overrides the reported task count of a machine to fake load.
    pub fn set_machine_tasks(&mut self, machine: MachineId, active_tasks: u32) {
        self.machines.get_mut(&machine).unwrap().active_tasks = active_tasks;
    }

    pub fn set_p_state(&mut self, machine: MachineId, p_state: PState) {
        self.machines.get_mut(&machine).unwrap().p_state = p_state;
    }

    pub fn set_s_state(&mut self, machine: MachineId, s_state: SState) {
        self.machines.get_mut(&machine).unwrap().s_state = s_state;
    }

    pub fn machine(&self, machine: MachineId) -> &MachineInfo {
        &self.machines[&machine]
    }

    pub fn vm(&self, vm: VmId) -> &VmInfo {
        &self.vms[&vm]
    }

    pub fn requested_state(&self, machine: MachineId) -> Option<SState> {
        self.requested_states.get(&machine).copied()
    }

    /// Applies the pending sleep-state request of the machine.
    pub fn complete_state_change(&mut self, machine: MachineId) {
        let state = self.requested_states.remove(&machine).expect("no state change requested");
        self.machines.get_mut(&machine).unwrap().s_state = state;
    }

    /// Applies the pending migration of the VM: moves its memory footprint
    /// and task count from the source machine to the target.
    pub fn complete_migration(&mut self, vm: VmId) {
        let target = self.requested_migrations.remove(&vm).expect("no migration requested");
        let (tasks, task_memory, source) = {
            let info = &self.vms[&vm];
            let memory: u64 = info.active_tasks.iter().map(|t| self.tasks[t].required_memory).sum();
            (info.active_tasks.len() as u32, memory, info.machine_id)
        };
        let footprint = VM_OVERHEAD + task_memory;
        if let Some(source) = source {
            let machine = self.machines.get_mut(&source).unwrap();
            machine.memory_used = machine.memory_used.saturating_sub(footprint);
            machine.active_tasks = machine.active_tasks.saturating_sub(tasks);
            machine.active_vms = machine.active_vms.saturating_sub(1);
        }
        let machine = self.machines.get_mut(&target).unwrap();
        machine.memory_used += footprint;
        machine.active_tasks += tasks;
        machine.active_vms += 1;
        self.vms.get_mut(&vm).unwrap().machine_id = Some(target);
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count_calls<F: Fn(&Call) -> bool>(&self, pred: F) -> usize {
        self.calls.iter().filter(|&call| pred(call)).count()
    }
}

impl ClusterApi for MockCluster {
    fn machine_count(&self) -> u32 {
        self.machines.len() as u32
    }

    fn machine_info(&self, machine: MachineId) -> Result<MachineInfo> {
        self.machines
            .get(&machine)
            .cloned()
            .ok_or(ClusterError::MachineNotFound(machine))
    }

    fn vm_info(&self, vm: VmId) -> Result<VmInfo> {
        self.vms.get(&vm).cloned().ok_or(ClusterError::VmNotFound(vm))
    }

    fn task_info(&self, task: TaskId) -> Result<TaskInfo> {
        self.tasks.get(&task).cloned().ok_or(ClusterError::TaskNotFound(task))
    }

    fn task_memory(&self, task: TaskId) -> Result<u64> {
        self.task_info(task).map(|info| info.required_memory)
    }

    fn task_priority(&self, task: TaskId) -> Result<Priority> {
        self.task_info(task).map(|info| info.priority)
    }

    fn required_cpu(&self, task: TaskId) -> Result<CpuArch> {
        self.task_info(task).map(|info| info.required_cpu)
    }

    fn required_vm_type(&self, task: TaskId) -> Result<VmType> {
        self.task_info(task).map(|info| info.required_vm_type)
    }

    fn required_sla(&self, task: TaskId) -> Result<SlaTier> {
        self.task_info(task).map(|info| info.required_sla)
    }

    fn sla_report(&self, sla: SlaTier) -> f64 {
        let index = match sla {
            SlaTier::Sla0 => 0,
            SlaTier::Sla1 => 1,
            SlaTier::Sla2 => 2,
            SlaTier::Sla3 => 3,
        };
        self.sla_violations[index]
    }

    fn cluster_energy(&self) -> f64 {
        self.energy
    }

    fn vm_create(&mut self, vm_type: VmType, cpu: CpuArch) -> Result<VmId> {
        self.calls.push(Call::VmCreate { vm_type, cpu });
        let id = self.next_vm_id;
        self.next_vm_id += 1;
        self.vms.insert(
            id,
            VmInfo {
                id,
                vm_type,
                cpu,
                machine_id: None,
                active_tasks: Vec::new(),
            },
        );
        Ok(id)
    }

    fn vm_attach(&mut self, vm: VmId, machine: MachineId) -> Result<()> {
        self.calls.push(Call::VmAttach { vm, machine });
        if self.refuse_attach {
            return Err(ClusterError::AttachRefused { vm, machine });
        }
        if !self.machines.contains_key(&machine) {
            return Err(ClusterError::MachineNotFound(machine));
        }
        let vm_info = self.vms.get_mut(&vm).ok_or(ClusterError::VmNotFound(vm))?;
        vm_info.machine_id = Some(machine);
        let machine_info = self.machines.get_mut(&machine).unwrap();
        machine_info.memory_used += VM_OVERHEAD;
        machine_info.active_vms += 1;
        Ok(())
    }

    fn vm_add_task(&mut self, vm: VmId, task: TaskId, priority: Priority) -> Result<()> {
        self.calls.push(Call::VmAddTask { vm, task, priority });
        let memory = self.task_info(task)?.required_memory;
        let vm_info = self.vms.get_mut(&vm).ok_or(ClusterError::VmNotFound(vm))?;
        let machine = vm_info.machine_id.ok_or(ClusterError::TaskRejected { vm, task })?;
        vm_info.active_tasks.push(task);
        let machine_info = self.machines.get_mut(&machine).unwrap();
        machine_info.active_tasks += 1;
        machine_info.memory_used += memory;
        self.tasks.get_mut(&task).unwrap().priority = priority;
        Ok(())
    }

    fn vm_remove_task(&mut self, vm: VmId, task: TaskId) -> Result<()> {
        self.calls.push(Call::VmRemoveTask { vm, task });
        let memory = self.task_info(task)?.required_memory;
        let vm_info = self.vms.get_mut(&vm).ok_or(ClusterError::VmNotFound(vm))?;
        vm_info.active_tasks.retain(|&t| t != task);
        if let Some(machine) = vm_info.machine_id {
            let machine_info = self.machines.get_mut(&machine).unwrap();
            machine_info.active_tasks = machine_info.active_tasks.saturating_sub(1);
            machine_info.memory_used = machine_info.memory_used.saturating_sub(memory);
        }
        Ok(())
    }

    fn vm_migrate(&mut self, vm: VmId, machine: MachineId) -> Result<()> {
        self.calls.push(Call::VmMigrate { vm, machine });
        if !self.vms.contains_key(&vm) {
            return Err(ClusterError::VmNotFound(vm));
        }
        if !self.machines.contains_key(&machine) {
            return Err(ClusterError::MachineNotFound(machine));
        }
        self.requested_migrations.insert(vm, machine);
        Ok(())
    }

    fn vm_shutdown(&mut self, vm: VmId) -> Result<()> {
        self.calls.push(Call::VmShutdown { vm });
        let vm_info = self.vms.get_mut(&vm).ok_or(ClusterError::VmNotFound(vm))?;
        if let Some(machine) = vm_info.machine_id.take() {
            let machine_info = self.machines.get_mut(&machine).unwrap();
            machine_info.memory_used = machine_info.memory_used.saturating_sub(VM_OVERHEAD);
            machine_info.active_vms = machine_info.active_vms.saturating_sub(1);
        }
        Ok(())
    }

    fn machine_set_state(&mut self, machine: MachineId, state: SState) -> Result<()> {
        self.calls.push(Call::SetState { machine, state });
        if !self.machines.contains_key(&machine) {
            return Err(ClusterError::MachineNotFound(machine));
        }
        self.requested_states.insert(machine, state);
        Ok(())
    }

    fn machine_set_core_performance(&mut self, machine: MachineId, core: u32, p_state: PState) -> Result<()> {
        self.calls.push(Call::SetCorePerformance { machine, core, p_state });
        let machine_info = self.machines.get_mut(&machine).ok_or(ClusterError::MachineNotFound(machine))?;
        machine_info.p_state = p_state;
        Ok(())
    }

    fn set_task_priority(&mut self, task: TaskId, priority: Priority) -> Result<()> {
        self.calls.push(Call::SetTaskPriority { task, priority });
        let task_info = self.tasks.get_mut(&task).ok_or(ClusterError::TaskNotFound(task))?;
        task_info.priority = priority;
        Ok(())
    }
}

pub fn build_controller(mock: &Rc<RefCell<MockCluster>>) -> Controller {
    let cluster: Rc<RefCell<dyn ClusterApi>> = mock.clone();
    Controller::new(cluster, ControllerConfig::default(), Box::new(StdoutLogger::new()))
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
