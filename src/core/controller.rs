//! Event dispatcher: routes simulator callbacks to the engines and keeps
//! the cluster mirror consistent across asynchronous completions.

use std::cell::RefCell;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use serde::Serialize;
use sugars::{rc, refcell};

use crate::core::cluster_api::ClusterApi;
use crate::core::cluster_state::ClusterState;
use crate::core::common::{CpuArch, MachineId, PState, SState, SlaTier, TaskId, Time, VmId, VmType};
use crate::core::config::ControllerConfig;
use crate::core::events::ClusterEvent;
use crate::core::logger::Logger;
use crate::core::migration::MigrationPlanner;
use crate::core::placement::{Placement, PlacementEngine};
use crate::core::power::PowerGovernor;

const SCOPE: &str = "controller";

/// VM flavors seeded on an active machine at init, following its CPU.
fn prefill_assortment(cpu: CpuArch) -> [VmType; 4] {
    match cpu {
        CpuArch::X86 | CpuArch::Arm => [VmType::Win, VmType::Win, VmType::Linux, VmType::LinuxRt],
        CpuArch::Power => [VmType::Aix, VmType::Aix, VmType::Linux, VmType::LinuxRt],
        CpuArch::Riscv => [VmType::Linux, VmType::Linux, VmType::LinuxRt, VmType::LinuxRt],
    }
}

/// Summary emitted at the end of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    /// Percent of SLA violations per tier, index 0 is SLA0.
    pub sla_violations: [f64; 4],
    /// Total cluster energy in KW-Hour.
    pub total_energy: f64,
    /// Simulated wall-clock seconds.
    pub wall_seconds: f64,
}

impl Display for FinalReport {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        writeln!(f, "SLA violation report:")?;
        for (tier, violations) in self.sla_violations.iter().enumerate() {
            writeln!(f, "  SLA{}: {}%", tier, violations)?;
        }
        writeln!(f, "Total Energy: {} KW-Hour", self.total_energy)?;
        write!(f, "Finished in {} seconds", self.wall_seconds)
    }
}

/// The workload placement engine. One instance drives one cluster; the
/// simulator calls the `on_*` entry points, all of which are total: errors
/// from the cluster are handled at the call site and never escape.
pub struct Controller {
    cluster: Rc<RefCell<dyn ClusterApi>>,
    state: Rc<RefCell<ClusterState>>,
    config: Rc<ControllerConfig>,
    logger: Rc<RefCell<Box<dyn Logger>>>,
    placement: PlacementEngine,
    governor: PowerGovernor,
    migration: MigrationPlanner,
}

impl Controller {
    pub fn new(cluster: Rc<RefCell<dyn ClusterApi>>, config: ControllerConfig, logger: Box<dyn Logger>) -> Self {
        let config = Rc::new(config);
        let logger = rc!(refcell!(logger));
        let state = rc!(refcell!(ClusterState::new()));
        let placement = PlacementEngine::new(cluster.clone(), state.clone(), config.clone(), logger.clone());
        let governor = PowerGovernor::new(cluster.clone(), state.clone(), config.clone(), logger.clone());
        let migration = MigrationPlanner::new(cluster.clone(), state.clone(), config.clone(), logger.clone());
        Self {
            cluster,
            state,
            config,
            logger,
            placement,
            governor,
            migration,
        }
    }

    /// Takes the machine census, freezes the efficiency ranking and seeds
    /// active machines with an assortment of VMs.
    pub fn init(&mut self) {
        let total = self.cluster.borrow().machine_count();
        for id in 0..total {
            let info = self.cluster.borrow().machine_info(id);
            match info {
                Ok(info) => {
                    self.state
                        .borrow_mut()
                        .add_machine(id, info.cpu, info.s0_idle_power(), info.s_state == SState::S0);
                }
                Err(e) => {
                    self.logger
                        .borrow_mut()
                        .log_error(0, SCOPE, format!("cannot read machine {}: {}", id, e));
                }
            }
        }
        self.state.borrow_mut().finish_census();

        let prefilled = self.prefill_vms();
        self.logger.borrow_mut().log_info(
            0,
            SCOPE,
            format!("initialized with {} machines, prefilled {} vms", total, prefilled),
        );
    }

    fn prefill_vms(&mut self) -> u32 {
        let mut created = 0;
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
            let assortment = prefill_assortment(info.cpu);
            let overhead = self.config.vm_memory_overhead * assortment.len() as u64;
            if info.memory_used + overhead > info.memory_size {
                continue;
            }
            for vm_type in assortment {
                let vm = self.cluster.borrow_mut().vm_create(vm_type, info.cpu);
                let vm = match vm {
                    Ok(vm) => vm,
                    Err(e) => {
                        self.logger
                            .borrow_mut()
                            .log_debug(0, SCOPE, format!("prefill create failed on machine {}: {}", machine, e));
                        continue;
                    }
                };
                let attached = self.cluster.borrow_mut().vm_attach(vm, machine);
                self.state.borrow_mut().register_vm(vm);
                match attached {
                    Ok(()) => created += 1,
                    Err(e) => {
                        self.logger
                            .borrow_mut()
                            .log_debug(0, SCOPE, format!("prefill attach failed on machine {}: {}", machine, e));
                    }
                }
            }
        }
        created
    }

    /// Routes one simulator callback. Returns the final report when the
    /// event ends the run.
    pub fn dispatch(&mut self, now: Time, event: ClusterEvent) -> Option<FinalReport> {
        self.logger.borrow_mut().log_trace(
            now,
            SCOPE,
            format!("event {}", serde_json::to_string(&event).unwrap_or_default()),
        );
        match event {
            ClusterEvent::NewTask { task_id } => {
                self.on_new_task(now, task_id);
                None
            }
            ClusterEvent::TaskCompleted { task_id } => {
                self.on_task_completion(now, task_id);
                None
            }
            ClusterEvent::PeriodicCheck => {
                self.on_scheduler_check(now);
                None
            }
            ClusterEvent::MemoryWarning { machine_id } => {
                self.on_memory_warning(now, machine_id);
                None
            }
            ClusterEvent::SlaWarning { task_id } => {
                self.on_sla_warning(now, task_id);
                None
            }
            ClusterEvent::StateChangeComplete { machine_id } => {
                self.on_state_change_complete(now, machine_id);
                None
            }
            ClusterEvent::MigrationComplete { vm_id } => {
                self.on_migration_complete(now, vm_id);
                None
            }
            ClusterEvent::SimulationComplete => Some(self.on_simulation_complete(now)),
        }
    }

    pub fn on_new_task(&mut self, now: Time, task_id: TaskId) {
        if let Placement::MemoryPressure(machine) = self.placement.on_new_task(now, task_id) {
            self.migration.on_memory_warning(now, machine);
        }
    }

    pub fn on_task_completion(&mut self, now: Time, task_id: TaskId) {
        self.logger
            .borrow_mut()
            .log_trace(now, SCOPE, format!("task {} finished", task_id));
        let cluster = self.cluster.borrow();
        self.state.borrow_mut().refresh_utilization(&*cluster);
    }

    /// Periodic tick: replay deferred tasks, then run the governor pass.
    pub fn on_scheduler_check(&mut self, now: Time) {
        for machine in self.placement.retry_pending(now) {
            self.migration.on_memory_warning(now, machine);
        }
        self.governor.periodic_check(now);
    }

    pub fn on_memory_warning(&mut self, now: Time, machine_id: MachineId) {
        self.migration.on_memory_warning(now, machine_id);
    }

    pub fn on_sla_warning(&mut self, now: Time, task_id: TaskId) {
        self.migration.on_sla_warning(now, task_id);
    }

    /// A sleep transition finished. Newly awake machines start at P1 and
    /// get their deferred VMs attached (or a seed VM created); machines
    /// that left S0 drop out of the active set.
    pub fn on_state_change_complete(&mut self, now: Time, machine_id: MachineId) {
        self.state.borrow_mut().clear_waking(machine_id);
        let info = self.cluster.borrow().machine_info(machine_id);
        let info = match info {
            Ok(info) => info,
            Err(e) => {
                self.logger
                    .borrow_mut()
                    .log_warn(now, SCOPE, format!("cannot read machine {}: {}", machine_id, e));
                return;
            }
        };
        self.logger
            .borrow_mut()
            .log_debug(now, SCOPE, format!("machine {} is now {}", machine_id, info.s_state));

        if info.s_state == SState::S0 {
            let newly_active = !self.state.borrow().is_active(machine_id);
            self.state.borrow_mut().activate_machine(machine_id);
            if newly_active {
                if info.p_state != PState::P1 {
                    let set = self.cluster.borrow_mut().machine_set_core_performance(machine_id, 0, PState::P1);
                    if let Err(e) = set {
                        self.logger
                            .borrow_mut()
                            .log_debug(now, SCOPE, format!("could not set machine {} to P1: {}", machine_id, e));
                    }
                }
                self.placement.on_machine_awake(now, machine_id);
            }
        } else {
            self.state.borrow_mut().deactivate_machine(machine_id);
        }

        self.on_scheduler_check(now);
    }

    pub fn on_migration_complete(&mut self, now: Time, vm_id: VmId) {
        self.migration.on_migration_complete(now, vm_id);
    }

    /// Emits the final report and shuts down every attached VM.
    pub fn on_simulation_complete(&mut self, now: Time) -> FinalReport {
        let report = {
            let cluster = self.cluster.borrow();
            FinalReport {
                sla_violations: [
                    cluster.sla_report(SlaTier::Sla0),
                    cluster.sla_report(SlaTier::Sla1),
                    cluster.sla_report(SlaTier::Sla2),
                    cluster.sla_report(SlaTier::Sla3),
                ],
                total_energy: cluster.cluster_energy(),
                wall_seconds: now as f64 / 1e6,
            }
        };
        for line in report.to_string().lines() {
            self.logger.borrow_mut().log_info(now, SCOPE, line.to_string());
        }
        self.shutdown(now);
        report
    }

    fn shutdown(&mut self, now: Time) {
        self.logger.borrow_mut().log_debug(now, SCOPE, "stopping vms".to_string());
        let vms = self.state.borrow().vms();
        for vm in vms {
            let info = self.cluster.borrow().vm_info(vm);
            let attached = matches!(info, Ok(ref info) if info.machine_id.is_some());
            if !attached {
                continue;
            }
            let stopped = self.cluster.borrow_mut().vm_shutdown(vm);
            if let Err(e) = stopped {
                self.logger
                    .borrow_mut()
                    .log_debug(now, SCOPE, format!("could not shut down vm {}: {}", vm, e));
            }
        }
    }

    /// The controller-side cluster mirror, mainly useful for inspection.
    pub fn cluster_state(&self) -> Rc<RefCell<ClusterState>> {
        self.state.clone()
    }

    /// Number of tasks waiting in the pending queue.
    pub fn pending_task_count(&self) -> usize {
        self.placement.pending_count()
    }

    pub fn config(&self) -> Rc<ControllerConfig> {
        self.config.clone()
    }
}
