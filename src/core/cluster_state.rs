//! In-memory mirror of the cluster queried by all engines.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::cluster_api::ClusterApi;
use crate::core::common::{CpuArch, MachineId, SState, VmId, VmType};

/// Controller-side registries of machines and VMs plus the derived state
/// (active set, utilization, efficiency ranking, in-flight transitions).
///
/// The mirror stores only stable ids; structures are resolved through
/// cluster queries at each use, so the mirror can never hold a dangling
/// reference. Every derived value is treated as stale the moment it is
/// read: utilization is recomputed on every tick and task completion.
pub struct ClusterState {
    machines: Vec<MachineId>,
    machines_by_cpu: BTreeMap<CpuArch, Vec<MachineId>>,
    census: Vec<(u64, MachineId)>,
    sorted_by_efficiency: Vec<MachineId>,
    active_machines: BTreeSet<MachineId>,
    utilization: BTreeMap<MachineId, f64>,
    vms: Vec<VmId>,
    pending_migrations: BTreeMap<VmId, MachineId>,
    waking: BTreeSet<MachineId>,
    deferred_attach: BTreeMap<MachineId, Vec<VmId>>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self {
            machines: Vec::new(),
            machines_by_cpu: BTreeMap::new(),
            census: Vec::new(),
            sorted_by_efficiency: Vec::new(),
            active_machines: BTreeSet::new(),
            utilization: BTreeMap::new(),
            vms: Vec::new(),
            pending_migrations: BTreeMap::new(),
            waking: BTreeSet::new(),
            deferred_attach: BTreeMap::new(),
        }
    }

    /// Records one machine from the census taken at init.
    pub fn add_machine(&mut self, machine: MachineId, cpu: CpuArch, s0_idle_power: u64, active: bool) {
        self.machines.push(machine);
        self.machines_by_cpu.entry(cpu).or_default().push(machine);
        self.census.push((s0_idle_power, machine));
        self.utilization.insert(machine, 0.0);
        if active {
            self.active_machines.insert(machine);
        }
    }

    /// Freezes the efficiency ranking (ascending S0 idle power). Computed
    /// once; machine hardware never changes after init.
    pub fn finish_census(&mut self) {
        let mut census = std::mem::take(&mut self.census);
        census.sort_by_key(|&(power, machine)| (power, machine));
        self.sorted_by_efficiency = census.into_iter().map(|(_, machine)| machine).collect();
    }

    pub fn machines(&self) -> Vec<MachineId> {
        self.machines.clone()
    }

    pub fn machines_with_cpu(&self, cpu: CpuArch) -> Vec<MachineId> {
        self.machines_by_cpu.get(&cpu).cloned().unwrap_or_default()
    }

    /// Machine ids ordered by ascending S0 idle power.
    pub fn sorted_by_efficiency(&self) -> Vec<MachineId> {
        self.sorted_by_efficiency.clone()
    }

    pub fn is_active(&self, machine: MachineId) -> bool {
        self.active_machines.contains(&machine)
    }

    pub fn active_machines(&self) -> Vec<MachineId> {
        self.active_machines.iter().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active_machines.len()
    }

    pub fn activate_machine(&mut self, machine: MachineId) {
        self.active_machines.insert(machine);
        self.utilization.insert(machine, 0.0);
    }

    pub fn deactivate_machine(&mut self, machine: MachineId) {
        self.active_machines.remove(&machine);
        self.utilization.insert(machine, 0.0);
    }

    /// Last computed utilization, 0 for machines out of the active set.
    pub fn utilization(&self, machine: MachineId) -> f64 {
        self.utilization.get(&machine).copied().unwrap_or(0.0)
    }

    /// Recomputes utilization for every machine from fresh cluster queries.
    /// Machines observed out of S0 (or failing the query) leave the active
    /// set here.
    pub fn refresh_utilization(&mut self, cluster: &dyn ClusterApi) {
        for machine in self.machines.clone() {
            if !self.active_machines.contains(&machine) {
                self.utilization.insert(machine, 0.0);
                continue;
            }
            match cluster.machine_info(machine) {
                Ok(info) if info.s_state == SState::S0 => {
                    let utilization = if info.num_cpus > 0 {
                        info.active_tasks as f64 / info.num_cpus as f64
                    } else {
                        0.0
                    };
                    self.utilization.insert(machine, utilization);
                }
                _ => {
                    self.deactivate_machine(machine);
                }
            }
        }
    }

    /// Registered VMs in stable registry order.
    pub fn vms(&self) -> Vec<VmId> {
        self.vms.clone()
    }

    pub fn register_vm(&mut self, vm: VmId) {
        self.vms.push(vm);
    }

    pub fn vm_count(&self) -> usize {
        self.vms.len()
    }

    /// Registered VMs of the given type, resolved through cluster queries.
    pub fn vms_of_type(&self, cluster: &dyn ClusterApi, vm_type: VmType) -> Vec<VmId> {
        self.vms
            .iter()
            .copied()
            .filter(|&vm| matches!(cluster.vm_info(vm), Ok(info) if info.vm_type == vm_type))
            .collect()
    }

    /// Registered VMs currently attached to the given machine.
    pub fn vms_on_machine(&self, cluster: &dyn ClusterApi, machine: MachineId) -> Vec<VmId> {
        self.vms
            .iter()
            .copied()
            .filter(|&vm| matches!(cluster.vm_info(vm), Ok(info) if info.machine_id == Some(machine)))
            .collect()
    }

    // In-flight migrations. A VM appears at most once; while present it is
    // invisible to placement and to further migration attempts.

    pub fn is_migrating(&self, vm: VmId) -> bool {
        self.pending_migrations.contains_key(&vm)
    }

    pub fn migration_target(&self, vm: VmId) -> Option<MachineId> {
        self.pending_migrations.get(&vm).copied()
    }

    /// True if some in-flight migration is headed at this machine.
    pub fn is_migration_target(&self, machine: MachineId) -> bool {
        self.pending_migrations.values().any(|&target| target == machine)
    }

    pub fn begin_migration(&mut self, vm: VmId, target: MachineId) {
        self.pending_migrations.insert(vm, target);
    }

    pub fn finish_migration(&mut self, vm: VmId) -> Option<MachineId> {
        self.pending_migrations.remove(&vm)
    }

    // Requested S0 transitions that have not completed yet, tracked so that
    // neither placement nor the migration planner wakes a machine twice.

    pub fn is_waking(&self, machine: MachineId) -> bool {
        self.waking.contains(&machine)
    }

    pub fn mark_waking(&mut self, machine: MachineId) {
        self.waking.insert(machine);
    }

    pub fn clear_waking(&mut self, machine: MachineId) {
        self.waking.remove(&machine);
    }

    // VMs created for a machine that is still waking up; attached when its
    // transition completes.

    pub fn defer_attach(&mut self, vm: VmId, machine: MachineId) {
        self.deferred_attach.entry(machine).or_default().push(vm);
    }

    pub fn take_deferred(&mut self, machine: MachineId) -> Vec<VmId> {
        self.deferred_attach.remove(&machine).unwrap_or_default()
    }
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::new()
    }
}
