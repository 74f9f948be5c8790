//! Common identifiers and cluster-wide enumerations.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Stable machine identifier assigned by the simulator (dense integers).
pub type MachineId = u32;
/// Stable virtual machine identifier assigned by the simulator.
pub type VmId = u32;
/// Stable task identifier assigned by the simulator.
pub type TaskId = u32;
/// Simulation time in simulator time units (microseconds).
pub type Time = u64;

/// CPU architecture of a physical machine or required by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CpuArch {
    Arm,
    Power,
    Riscv,
    X86,
}

impl Display for CpuArch {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CpuArch::Arm => write!(f, "ARM"),
            CpuArch::Power => write!(f, "POWER"),
            CpuArch::Riscv => write!(f, "RISCV"),
            CpuArch::X86 => write!(f, "x86"),
        }
    }
}

/// Virtual machine flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmType {
    Aix,
    Linux,
    LinuxRt,
    Win,
}

impl Display for VmType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            VmType::Aix => write!(f, "aix"),
            VmType::Linux => write!(f, "linux"),
            VmType::LinuxRt => write!(f, "linux-rt"),
            VmType::Win => write!(f, "win"),
        }
    }
}

/// Service-level class of a task, `Sla0` is the strictest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlaTier {
    Sla0,
    Sla1,
    Sla2,
    Sla3,
}

impl SlaTier {
    /// Strict tiers get preferential placement and force high core performance.
    pub fn is_strict(&self) -> bool {
        matches!(self, SlaTier::Sla0 | SlaTier::Sla1)
    }
}

impl Display for SlaTier {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            SlaTier::Sla0 => write!(f, "SLA0"),
            SlaTier::Sla1 => write!(f, "SLA1"),
            SlaTier::Sla2 => write!(f, "SLA2"),
            SlaTier::Sla3 => write!(f, "SLA3"),
        }
    }
}

/// Scheduling priority hint passed to the cluster's underlying task scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Mid,
    High,
}

impl Priority {
    /// Base priority of a task derived from its SLA tier.
    pub fn for_sla(sla: SlaTier) -> Self {
        match sla {
            SlaTier::Sla0 => Priority::High,
            SlaTier::Sla1 => Priority::Mid,
            SlaTier::Sla2 => Priority::Low,
            SlaTier::Sla3 => Priority::Low,
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Mid => write!(f, "mid"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Core performance level, `P0` is the highest frequency and power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PState {
    P0,
    P1,
    P2,
    P3,
}

impl Display for PState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            PState::P0 => write!(f, "P0"),
            PState::P1 => write!(f, "P1"),
            PState::P2 => write!(f, "P2"),
            PState::P3 => write!(f, "P3"),
        }
    }
}

/// Machine sleep state, `S0` is active, `S5` is powered off. Intermediate
/// states trade wake latency for idle power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SState {
    S0,
    S0i1,
    S1,
    S2,
    S3,
    S4,
    S5,
}

impl SState {
    /// Index of this state in a machine's idle power table.
    pub fn index(&self) -> usize {
        match self {
            SState::S0 => 0,
            SState::S0i1 => 1,
            SState::S1 => 2,
            SState::S2 => 3,
            SState::S3 => 4,
            SState::S4 => 5,
            SState::S5 => 6,
        }
    }
}

impl Display for SState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            SState::S0 => write!(f, "S0"),
            SState::S0i1 => write!(f, "S0i1"),
            SState::S1 => write!(f, "S1"),
            SState::S2 => write!(f, "S2"),
            SState::S3 => write!(f, "S3"),
            SState::S4 => write!(f, "S4"),
            SState::S5 => write!(f, "S5"),
        }
    }
}
