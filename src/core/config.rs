//! Controller configuration.

use serde::{Deserialize, Serialize};

use crate::core::common::Time;

/// Auxiliary structure to parse ControllerConfig from file
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ControllerConfigRaw {
    /// memory reserved on a host for every instantiated VM, in MB
    pub vm_memory_overhead: Option<u64>,
    /// tasks due within this window are treated as urgent
    pub urgent_window: Option<Time>,
    /// host utilization above which migration away is considered
    pub overload_threshold: Option<f64>,
    /// host utilization below which a host is a candidate for sleep
    pub underload_threshold: Option<f64>,
    /// utilization cap for placing strict-SLA tasks on a shared host
    pub strict_utilization_cap: Option<f64>,
    /// minimum time between two sleep passes of the power governor
    pub sleep_pass_interval: Option<Time>,
    /// at most this many machines are put to sleep per pass
    pub sleep_batch_limit: Option<u32>,
    /// the governor never parks machines below this active count
    pub min_active_machines: Option<u32>,
    /// a VM migrated this recently is not migrated again
    pub migration_cooldown: Option<Time>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ControllerConfig {
    /// memory reserved on a host for every instantiated VM, in MB
    pub vm_memory_overhead: u64,
    /// tasks due within this window are treated as urgent
    pub urgent_window: Time,
    /// host utilization above which migration away is considered
    pub overload_threshold: f64,
    /// host utilization below which a host is a candidate for sleep
    pub underload_threshold: f64,
    /// utilization cap for placing strict-SLA tasks on a shared host
    pub strict_utilization_cap: f64,
    /// minimum time between two sleep passes of the power governor
    pub sleep_pass_interval: Time,
    /// at most this many machines are put to sleep per pass
    pub sleep_batch_limit: u32,
    /// the governor never parks machines below this active count
    pub min_active_machines: u32,
    /// a VM migrated this recently is not migrated again
    pub migration_cooldown: Time,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            vm_memory_overhead: 8,
            urgent_window: 12_000_000,
            overload_threshold: 0.8,
            underload_threshold: 0.3,
            strict_utilization_cap: 0.5,
            sleep_pass_interval: 10_000_000,
            sleep_batch_limit: 2,
            min_active_machines: 2,
            migration_cooldown: 1_000_000,
        }
    }
}

impl ControllerConfig {
    /// Creates controller config by reading parameter values from .yaml file
    /// (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Self {
        let raw: ControllerConfigRaw = serde_yaml::from_str(
            &std::fs::read_to_string(file_name).unwrap_or_else(|_| panic!("Can't read file {}", file_name)),
        )
        .unwrap_or_else(|_| panic!("Can't parse YAML from file {}", file_name));

        let defaults = Self::default();
        Self {
            vm_memory_overhead: raw.vm_memory_overhead.unwrap_or(defaults.vm_memory_overhead),
            urgent_window: raw.urgent_window.unwrap_or(defaults.urgent_window),
            overload_threshold: raw.overload_threshold.unwrap_or(defaults.overload_threshold),
            underload_threshold: raw.underload_threshold.unwrap_or(defaults.underload_threshold),
            strict_utilization_cap: raw.strict_utilization_cap.unwrap_or(defaults.strict_utilization_cap),
            sleep_pass_interval: raw.sleep_pass_interval.unwrap_or(defaults.sleep_pass_interval),
            sleep_batch_limit: raw.sleep_batch_limit.unwrap_or(defaults.sleep_batch_limit),
            min_active_machines: raw.min_active_machines.unwrap_or(defaults.min_active_machines),
            migration_cooldown: raw.migration_cooldown.unwrap_or(defaults.migration_cooldown),
        }
    }
}
