//! Task placement: VM selection, escalation and the pending-task queue.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::Rc;

use crate::core::cluster_api::{ClusterApi, MachineInfo, TaskInfo};
use crate::core::cluster_state::ClusterState;
use crate::core::common::{MachineId, PState, Priority, SState, TaskId, Time, VmId, VmType};
use crate::core::config::ControllerConfig;
use crate::core::logger::Logger;

const SCOPE: &str = "placement";

/// Outcome of a placement attempt.
pub enum Placement {
    /// The task was handed to a VM on an active machine.
    Placed { vm: VmId, machine: MachineId },
    /// The task could not be placed now and waits in the pending queue.
    Deferred,
    /// The chosen host ran out of memory between scan and actuation; the
    /// task waits in the pending queue and the host needs relief.
    MemoryPressure(MachineId),
}

/// Pending tasks are retried shortest-deadline-first.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct QueuedTask {
    deadline: Time,
    task_id: TaskId,
}

pub struct PlacementEngine {
    cluster: Rc<RefCell<dyn ClusterApi>>,
    state: Rc<RefCell<ClusterState>>,
    config: Rc<ControllerConfig>,
    logger: Rc<RefCell<Box<dyn Logger>>>,
    pending: BinaryHeap<Reverse<QueuedTask>>,
}

impl PlacementEngine {
    pub fn new(
        cluster: Rc<RefCell<dyn ClusterApi>>,
        state: Rc<RefCell<ClusterState>>,
        config: Rc<ControllerConfig>,
        logger: Rc<RefCell<Box<dyn Logger>>>,
    ) -> Self {
        Self {
            cluster,
            state,
            config,
            logger,
            pending: BinaryHeap::new(),
        }
    }

    /// Places the arriving task on the best available VM, escalating to VM
    /// creation or machine wake-up when no registered VM fits.
    pub fn on_new_task(&mut self, now: Time, task_id: TaskId) -> Placement {
        let task = self.cluster.borrow().task_info(task_id);
        let task = match task {
            Ok(task) => task,
            Err(e) => {
                self.logger
                    .borrow_mut()
                    .log_warn(now, SCOPE, format!("cannot read task {}: {}", task_id, e));
                return Placement::Deferred;
            }
        };
        let priority = self.priority_for(now, &task);

        if let Some((vm, machine)) = self.select_vm(&task) {
            return self.add_to_vm(now, &task, priority, vm, machine);
        }
        if let Some((vm, machine)) = self.escalate_on_active(now, &task) {
            return self.add_to_vm(now, &task, priority, vm, machine);
        }
        if self.escalate_wake(now, &task) {
            self.enqueue(&task);
            return Placement::Deferred;
        }
        self.logger
            .borrow_mut()
            .log_debug(now, SCOPE, format!("no suitable vm for task {}", task_id));
        self.enqueue(&task);
        Placement::Deferred
    }

    /// SLA tier sets the base priority; tasks due within the urgent window
    /// run at high priority no matter the tier.
    fn priority_for(&self, now: Time, task: &TaskInfo) -> Priority {
        let urgent =
            task.target_completion > 0 && task.target_completion.saturating_sub(now) <= self.config.urgent_window;
        if urgent {
            Priority::High
        } else {
            Priority::for_sla(task.required_sla)
        }
    }

    /// Scans the VM registry for a compatible target. Prefers an idle VM;
    /// strict-SLA tasks take the first idle VM without further scanning,
    /// everything else falls back to the least loaded candidate.
    fn select_vm(&self, task: &TaskInfo) -> Option<(VmId, MachineId)> {
        let mut idle: Option<(VmId, MachineId)> = None;
        let mut least_loaded: Option<(VmId, MachineId, usize)> = None;

        let vms = self.state.borrow().vms();
        for vm in vms {
            if self.state.borrow().is_migrating(vm) {
                continue;
            }
            let vm_info = self.cluster.borrow().vm_info(vm);
            let vm_info = match vm_info {
                Ok(info) => info,
                Err(_) => continue,
            };
            if vm_info.cpu != task.required_cpu || vm_info.vm_type != task.required_vm_type {
                continue;
            }
            let machine = match vm_info.machine_id {
                Some(machine) => machine,
                None => continue,
            };
            let machine_info = self.cluster.borrow().machine_info(machine);
            let machine_info = match machine_info {
                Ok(info) => info,
                Err(_) => continue,
            };
            if machine_info.s_state != SState::S0 {
                continue;
            }
            if machine_info.memory_used + task.required_memory > machine_info.memory_size {
                continue;
            }

            let load = vm_info.active_tasks.len();
            if load == 0 {
                if task.required_sla.is_strict() {
                    return Some((vm, machine));
                }
                if idle.is_none() {
                    idle = Some((vm, machine));
                }
            }
            if least_loaded.map_or(true, |(_, _, best)| load < best) {
                least_loaded = Some((vm, machine, load));
            }
        }
        idle.or(least_loaded.map(|(vm, machine, _)| (vm, machine)))
    }

    /// Creates a fresh VM on an already active machine that matches the CPU
    /// and has headroom. Strict-SLA tasks only share hosts well below the
    /// overload point.
    fn escalate_on_active(&mut self, now: Time, task: &TaskInfo) -> Option<(VmId, MachineId)> {
        let cap = if task.required_sla.is_strict() {
            self.config.strict_utilization_cap
        } else {
            self.config.overload_threshold
        };
        let machines = self.state.borrow().sorted_by_efficiency();
        for machine in machines {
            if !self.state.borrow().is_active(machine) {
                continue;
            }
            let info = self.cluster.borrow().machine_info(machine);
            let info = match info {
                Ok(info) => info,
                Err(_) => continue,
            };
            if info.s_state != SState::S0 || info.cpu != task.required_cpu {
                continue;
            }
            if info.memory_used + task.required_memory + self.config.vm_memory_overhead > info.memory_size {
                continue;
            }
            if self.state.borrow().utilization(machine) > cap {
                continue;
            }

            let created = self.cluster.borrow_mut().vm_create(task.required_vm_type, task.required_cpu);
            let vm = match created {
                Ok(vm) => vm,
                Err(e) => {
                    self.logger
                        .borrow_mut()
                        .log_debug(now, SCOPE, format!("could not create vm for task {}: {}", task.id, e));
                    continue;
                }
            };
            let attached = self.cluster.borrow_mut().vm_attach(vm, machine);
            self.state.borrow_mut().register_vm(vm);
            match attached {
                Ok(()) => {
                    self.logger
                        .borrow_mut()
                        .log_debug(now, SCOPE, format!("created vm {} on machine {}", vm, machine));
                    return Some((vm, machine));
                }
                Err(e) => {
                    self.logger
                        .borrow_mut()
                        .log_debug(now, SCOPE, format!("could not attach vm {}: {}", vm, e));
                    continue;
                }
            }
        }
        None
    }

    /// Requests wake-up of a parked machine that could fit the task and
    /// creates its VM with a deferred attach. The task itself stays in the
    /// pending queue until the machine reports S0.
    fn escalate_wake(&mut self, now: Time, task: &TaskInfo) -> bool {
        let machines = self.state.borrow().sorted_by_efficiency();
        for machine in machines {
            {
                let state = self.state.borrow();
                if state.is_active(machine) || state.is_waking(machine) {
                    continue;
                }
            }
            let info = self.cluster.borrow().machine_info(machine);
            let info = match info {
                Ok(info) => info,
                Err(_) => continue,
            };
            if info.cpu != task.required_cpu {
                continue;
            }
            if task.required_memory + self.config.vm_memory_overhead > info.memory_size {
                continue;
            }

            let requested = self.cluster.borrow_mut().machine_set_state(machine, SState::S0);
            if let Err(e) = requested {
                self.logger
                    .borrow_mut()
                    .log_debug(now, SCOPE, format!("could not wake machine {}: {}", machine, e));
                continue;
            }
            self.state.borrow_mut().mark_waking(machine);

            let created = self.cluster.borrow_mut().vm_create(task.required_vm_type, task.required_cpu);
            match created {
                Ok(vm) => {
                    let mut state = self.state.borrow_mut();
                    state.register_vm(vm);
                    state.defer_attach(vm, machine);
                }
                Err(e) => {
                    self.logger
                        .borrow_mut()
                        .log_debug(now, SCOPE, format!("could not create vm for task {}: {}", task.id, e));
                }
            }
            self.logger
                .borrow_mut()
                .log_debug(now, SCOPE, format!("waking machine {} for task {}", machine, task.id));
            return true;
        }
        false
    }

    /// Hands the task to the chosen VM after re-verifying the host, since
    /// earlier actuations in the same event may have consumed the memory
    /// the scan saw.
    fn add_to_vm(&mut self, now: Time, task: &TaskInfo, priority: Priority, vm: VmId, machine: MachineId) -> Placement {
        let info = self.cluster.borrow().machine_info(machine);
        let info = match info {
            Ok(info) => info,
            Err(_) => {
                self.enqueue(task);
                return Placement::Deferred;
            }
        };
        if info.s_state != SState::S0 || info.memory_used + task.required_memory > info.memory_size {
            self.enqueue(task);
            return Placement::MemoryPressure(machine);
        }

        let added = self.cluster.borrow_mut().vm_add_task(vm, task.id, priority);
        if let Err(e) = added {
            self.logger
                .borrow_mut()
                .log_debug(now, SCOPE, format!("could not add task {} to vm {}: {}", task.id, vm, e));
            self.enqueue(task);
            return Placement::Deferred;
        }
        if task.required_sla.is_strict() {
            self.raise_to_p0(now, machine, &info);
        }
        self.logger.borrow_mut().log_debug(
            now,
            SCOPE,
            format!("task {} placed on vm {} (machine {})", task.id, vm, machine),
        );
        Placement::Placed { vm, machine }
    }

    fn raise_to_p0(&mut self, now: Time, machine: MachineId, info: &MachineInfo) {
        if info.p_state == PState::P0 {
            return;
        }
        for core in 0..info.num_cpus {
            let set = self.cluster.borrow_mut().machine_set_core_performance(machine, core, PState::P0);
            if let Err(e) = set {
                self.logger
                    .borrow_mut()
                    .log_debug(now, SCOPE, format!("could not raise machine {}: {}", machine, e));
                break;
            }
        }
    }

    fn enqueue(&mut self, task: &TaskInfo) {
        if self.pending.iter().any(|Reverse(queued)| queued.task_id == task.id) {
            return;
        }
        self.pending.push(Reverse(QueuedTask {
            deadline: task.target_completion,
            task_id: task.id,
        }));
    }

    /// Replays queued tasks shortest-deadline-first. Tasks that still fail
    /// re-enter the queue; tasks the cluster no longer knows fall out.
    /// Returns hosts that hit memory pressure during the replay.
    pub fn retry_pending(&mut self, now: Time) -> Vec<MachineId> {
        let mut pressured = Vec::new();
        let mut drained = std::mem::take(&mut self.pending);
        while let Some(Reverse(queued)) = drained.pop() {
            if let Placement::MemoryPressure(machine) = self.on_new_task(now, queued.task_id) {
                pressured.push(machine);
            }
        }
        pressured
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Called when a machine reports S0: attaches the VMs created for it
    /// while it was waking, or seeds it with a general-purpose VM if nothing
    /// runs there yet.
    pub fn on_machine_awake(&mut self, now: Time, machine: MachineId) {
        let deferred = self.state.borrow_mut().take_deferred(machine);
        let mut attached_any = false;
        for vm in deferred {
            let attached = self.cluster.borrow_mut().vm_attach(vm, machine);
            match attached {
                Ok(()) => {
                    attached_any = true;
                    self.logger
                        .borrow_mut()
                        .log_debug(now, SCOPE, format!("attached deferred vm {} to machine {}", vm, machine));
                }
                Err(e) => {
                    self.logger
                        .borrow_mut()
                        .log_warn(now, SCOPE, format!("deferred attach of vm {} failed: {}", vm, e));
                }
            }
        }
        if attached_any || self.machine_has_vm(machine) {
            return;
        }

        let info = self.cluster.borrow().machine_info(machine);
        let info = match info {
            Ok(info) => info,
            Err(_) => return,
        };
        if info.memory_used + self.config.vm_memory_overhead > info.memory_size {
            return;
        }
        let created = self.cluster.borrow_mut().vm_create(VmType::Linux, info.cpu);
        let vm = match created {
            Ok(vm) => vm,
            Err(e) => {
                self.logger
                    .borrow_mut()
                    .log_debug(now, SCOPE, format!("could not seed machine {}: {}", machine, e));
                return;
            }
        };
        let attached = self.cluster.borrow_mut().vm_attach(vm, machine);
        self.state.borrow_mut().register_vm(vm);
        match attached {
            Ok(()) => self
                .logger
                .borrow_mut()
                .log_debug(now, SCOPE, format!("seeded machine {} with vm {}", machine, vm)),
            Err(e) => self
                .logger
                .borrow_mut()
                .log_debug(now, SCOPE, format!("could not attach vm {}: {}", vm, e)),
        }
    }

    fn machine_has_vm(&self, machine: MachineId) -> bool {
        let cluster = self.cluster.borrow();
        !self.state.borrow().vms_on_machine(&*cluster, machine).is_empty()
    }
}
