//! Power governor: P-state control and idle machine parking.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::cluster_api::ClusterApi;
use crate::core::cluster_state::ClusterState;
use crate::core::common::{MachineId, PState, SState, Time};
use crate::core::config::ControllerConfig;
use crate::core::logger::Logger;

const SCOPE: &str = "governor";

/// True if any VM on the machine runs a task from a strict SLA tier.
pub(crate) fn machine_hosts_strict_tasks(cluster: &dyn ClusterApi, state: &ClusterState, machine: MachineId) -> bool {
    for vm in state.vms_on_machine(cluster, machine) {
        let info = match cluster.vm_info(vm) {
            Ok(info) => info,
            Err(_) => continue,
        };
        for task in info.active_tasks {
            if let Ok(sla) = cluster.required_sla(task) {
                if sla.is_strict() {
                    return true;
                }
            }
        }
    }
    false
}

pub struct PowerGovernor {
    cluster: Rc<RefCell<dyn ClusterApi>>,
    state: Rc<RefCell<ClusterState>>,
    config: Rc<ControllerConfig>,
    logger: Rc<RefCell<Box<dyn Logger>>>,
    last_sleep_pass_at: Time,
}

impl PowerGovernor {
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
            last_sleep_pass_at: 0,
        }
    }

    /// Governor pass: refresh utilization, recompute per-machine P-states
    /// and, at a sparse cadence, park deeply idle machines.
    pub fn periodic_check(&mut self, now: Time) {
        {
            let cluster = self.cluster.borrow();
            self.state.borrow_mut().refresh_utilization(&*cluster);
        }

        let active = self.state.borrow().active_machines();
        for machine in active {
            let info = self.cluster.borrow().machine_info(machine);
            let info = match info {
                Ok(info) => info,
                Err(_) => continue,
            };
            if info.s_state != SState::S0 {
                continue;
            }

            let strict = {
                let cluster = self.cluster.borrow();
                let state = self.state.borrow();
                machine_hosts_strict_tasks(&*cluster, &state, machine)
            };
            let utilization = self.state.borrow().utilization(machine);
            let target = if strict {
                PState::P0
            } else if utilization > 0.75 {
                PState::P0
            } else if utilization > 0.30 {
                PState::P1
            } else if info.active_tasks > 0 {
                PState::P2
            } else {
                PState::P3
            };

            if info.p_state != target {
                let set = self.cluster.borrow_mut().machine_set_core_performance(machine, 0, target);
                match set {
                    Ok(()) => self
                        .logger
                        .borrow_mut()
                        .log_trace(now, SCOPE, format!("machine {} -> {}", machine, target)),
                    Err(e) => self
                        .logger
                        .borrow_mut()
                        .log_debug(now, SCOPE, format!("could not set machine {} to {}: {}", machine, target, e)),
                }
            }
        }

        self.sleep_pass(now);
    }

    /// Parks up to `sleep_batch_limit` idle underloaded machines, least
    /// efficient first, keeping at least `min_active_machines` active.
    fn sleep_pass(&mut self, now: Time) {
        if now.saturating_sub(self.last_sleep_pass_at) < self.config.sleep_pass_interval {
            return;
        }
        self.last_sleep_pass_at = now;

        let mut spare = self
            .state
            .borrow()
            .active_count()
            .saturating_sub(self.config.min_active_machines as usize);
        if spare == 0 {
            return;
        }

        let mut order = self.state.borrow().sorted_by_efficiency();
        order.reverse();

        let mut parked = 0;
        for machine in order {
            if parked >= self.config.sleep_batch_limit || spare == 0 {
                break;
            }
            {
                let state = self.state.borrow();
                if !state.is_active(machine) || state.utilization(machine) >= self.config.underload_threshold {
                    continue;
                }
            }
            let info = self.cluster.borrow().machine_info(machine);
            let info = match info {
                Ok(info) => info,
                Err(_) => continue,
            };
            if info.active_tasks > 0 {
                continue;
            }

            let requested = self.cluster.borrow_mut().machine_set_state(machine, SState::S0i1);
            match requested {
                Ok(()) => {
                    self.state.borrow_mut().deactivate_machine(machine);
                    self.logger
                        .borrow_mut()
                        .log_debug(now, SCOPE, format!("parking idle machine {}", machine));
                    parked += 1;
                    spare -= 1;
                }
                Err(e) => {
                    self.logger
                        .borrow_mut()
                        .log_debug(now, SCOPE, format!("could not park machine {}: {}", machine, e));
                }
            }
        }
    }
}
