//! Migration planner: relief for overloaded and memory-pressured hosts.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::core::cluster_api::ClusterApi;
use crate::core::cluster_state::ClusterState;
use crate::core::common::{MachineId, PState, Priority, SState, SlaTier, TaskId, Time, VmId};
use crate::core::config::ControllerConfig;
use crate::core::logger::Logger;
use crate::core::power::machine_hosts_strict_tasks;

const SCOPE: &str = "migration";

pub struct MigrationPlanner {
    cluster: Rc<RefCell<dyn ClusterApi>>,
    state: Rc<RefCell<ClusterState>>,
    config: Rc<ControllerConfig>,
    logger: Rc<RefCell<Box<dyn Logger>>>,
    last_migration_at: BTreeMap<VmId, Time>,
}

impl MigrationPlanner {
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
            last_migration_at: BTreeMap::new(),
        }
    }

    /// Reacts to a predicted SLA miss. Strict tiers get their priority
    /// forced high and their host forced to P0; if the host is overloaded
    /// the hosting VM is migrated away.
    pub fn on_sla_warning(&mut self, now: Time, task_id: TaskId) {
        let task = self.cluster.borrow().task_info(task_id);
        let task = match task {
            Ok(task) => task,
            Err(e) => {
                self.logger
                    .borrow_mut()
                    .log_debug(now, SCOPE, format!("cannot read task {}: {}", task_id, e));
                return;
            }
        };

        match task.required_sla {
            SlaTier::Sla0 | SlaTier::Sla1 => {
                let set = self.cluster.borrow_mut().set_task_priority(task_id, Priority::High);
                if let Err(e) = set {
                    self.logger
                        .borrow_mut()
                        .log_debug(now, SCOPE, format!("could not raise task {}: {}", task_id, e));
                }
                let (vm, machine) = match self.locate_task(task_id) {
                    Some(found) => found,
                    None => {
                        self.logger
                            .borrow_mut()
                            .log_debug(now, SCOPE, format!("task {} is not hosted anywhere", task_id));
                        return;
                    }
                };
                self.force_p0(now, machine);
                if self.state.borrow().utilization(machine) > self.config.overload_threshold {
                    self.try_migrate(now, vm);
                }
            }
            SlaTier::Sla2 => {
                let priority = self.cluster.borrow().task_priority(task_id);
                if let Ok(Priority::Low) = priority {
                    let set = self.cluster.borrow_mut().set_task_priority(task_id, Priority::Mid);
                    if let Err(e) = set {
                        self.logger
                            .borrow_mut()
                            .log_debug(now, SCOPE, format!("could not raise task {}: {}", task_id, e));
                    }
                }
            }
            SlaTier::Sla3 => {}
        }
    }

    /// Reacts to host memory over-commitment: forces the host to P0 and
    /// tries to migrate its busiest VM away.
    pub fn on_memory_warning(&mut self, now: Time, machine: MachineId) {
        self.logger
            .borrow_mut()
            .log_warn(now, SCOPE, format!("memory pressure on machine {}", machine));

        let mut largest: Option<(VmId, usize)> = None;
        let vms = self.state.borrow().vms();
        for vm in vms {
            if self.state.borrow().is_migrating(vm) {
                continue;
            }
            let info = self.cluster.borrow().vm_info(vm);
            let info = match info {
                Ok(info) => info,
                Err(_) => continue,
            };
            if info.machine_id != Some(machine) {
                continue;
            }
            let load = info.active_tasks.len();
            if largest.map_or(true, |(_, best)| load > best) {
                largest = Some((vm, load));
            }
        }

        self.force_p0(now, machine);
        if let Some((vm, _)) = largest {
            self.try_migrate(now, vm);
        }
    }

    /// Clears the pending record and rebinds the VM. The destination keeps
    /// full core performance if strict-SLA work landed on it.
    pub fn on_migration_complete(&mut self, now: Time, vm: VmId) {
        if self.state.borrow_mut().finish_migration(vm).is_none() {
            self.logger
                .borrow_mut()
                .log_debug(now, SCOPE, format!("unexpected migration completion for vm {}", vm));
        }
        self.last_migration_at.insert(vm, now);

        let info = self.cluster.borrow().vm_info(vm);
        let info = match info {
            Ok(info) => info,
            Err(_) => return,
        };
        let machine = match info.machine_id {
            Some(machine) => machine,
            None => return,
        };
        self.logger
            .borrow_mut()
            .log_debug(now, SCOPE, format!("vm {} now runs on machine {}", vm, machine));

        let strict = {
            let cluster = self.cluster.borrow();
            let state = self.state.borrow();
            machine_hosts_strict_tasks(&*cluster, &state, machine)
        };
        if strict {
            self.force_p0(now, machine);
        }
    }

    fn try_migrate(&mut self, now: Time, vm: VmId) {
        if self.state.borrow().is_migrating(vm) {
            return;
        }
        if let Some(&last) = self.last_migration_at.get(&vm) {
            if now.saturating_sub(last) < self.config.migration_cooldown {
                self.logger
                    .borrow_mut()
                    .log_debug(now, SCOPE, format!("vm {} migrated too recently", vm));
                return;
            }
        }
        let target = match self.find_migration_target(now, vm) {
            Some(target) => target,
            None => {
                self.logger
                    .borrow_mut()
                    .log_debug(now, SCOPE, format!("no migration target for vm {}", vm));
                return;
            }
        };

        self.state.borrow_mut().begin_migration(vm, target);
        let requested = self.cluster.borrow_mut().vm_migrate(vm, target);
        match requested {
            Ok(()) => {
                self.last_migration_at.insert(vm, now);
                self.logger
                    .borrow_mut()
                    .log_info(now, SCOPE, format!("migrating vm {} to machine {}", vm, target));
            }
            Err(e) => {
                self.state.borrow_mut().finish_migration(vm);
                self.logger
                    .borrow_mut()
                    .log_debug(now, SCOPE, format!("could not migrate vm {}: {}", vm, e));
            }
        }
    }

    /// Walks machines in efficiency order and accepts the first one that
    /// matches the VM's CPU, is awake, fits the VM's full footprint and is
    /// not overloaded. Parked machines encountered on the way are asked to
    /// wake up for future use but never chosen for this migration.
    fn find_migration_target(&mut self, now: Time, vm: VmId) -> Option<MachineId> {
        let info = self.cluster.borrow().vm_info(vm);
        let info = match info {
            Ok(info) => info,
            Err(_) => return None,
        };
        let source = match info.machine_id {
            Some(machine) => machine,
            None => return None,
        };

        let mut total_needed = self.config.vm_memory_overhead;
        for task in &info.active_tasks {
            let memory = self.cluster.borrow().task_memory(*task);
            if let Ok(memory) = memory {
                total_needed += memory;
            }
        }

        let machines = self.state.borrow().sorted_by_efficiency();
        for machine in machines {
            if machine == source || self.state.borrow().is_migration_target(machine) {
                continue;
            }
            let candidate = self.cluster.borrow().machine_info(machine);
            let candidate = match candidate {
                Ok(candidate) => candidate,
                Err(_) => continue,
            };
            if candidate.cpu != info.cpu {
                continue;
            }
            if candidate.s_state != SState::S0 {
                if !self.state.borrow().is_waking(machine) {
                    let requested = self.cluster.borrow_mut().machine_set_state(machine, SState::S0);
                    if requested.is_ok() {
                        self.state.borrow_mut().mark_waking(machine);
                        self.logger
                            .borrow_mut()
                            .log_debug(now, SCOPE, format!("waking machine {} for future load", machine));
                    }
                }
                continue;
            }
            if candidate.memory_used + total_needed > candidate.memory_size {
                continue;
            }
            if self.state.borrow().utilization(machine) >= self.config.overload_threshold {
                continue;
            }
            return Some(machine);
        }
        None
    }

    fn locate_task(&self, task: TaskId) -> Option<(VmId, MachineId)> {
        let vms = self.state.borrow().vms();
        for vm in vms {
            let info = self.cluster.borrow().vm_info(vm);
            let info = match info {
                Ok(info) => info,
                Err(_) => continue,
            };
            if !info.active_tasks.contains(&task) {
                continue;
            }
            return info.machine_id.map(|machine| (vm, machine));
        }
        None
    }

    fn force_p0(&mut self, now: Time, machine: MachineId) {
        let info = self.cluster.borrow().machine_info(machine);
        let info = match info {
            Ok(info) => info,
            Err(_) => return,
        };
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
}
