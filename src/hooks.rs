//! C-style hook surface over a process-wide controller instance.
//!
//! Simulators that expect free functions can install a controller once and
//! route their callbacks through these adapters. Embedders that can hold an
//! object should use [`Controller`] directly instead; tests do.

use std::cell::RefCell;

use crate::core::common::{MachineId, TaskId, Time, VmId};
use crate::core::controller::Controller;

thread_local! {
    static CONTROLLER: RefCell<Option<Controller>> = RefCell::new(None);
}

/// Installs the controller that subsequent hook calls dispatch to.
pub fn install(controller: Controller) {
    CONTROLLER.with(|slot| *slot.borrow_mut() = Some(controller));
}

/// Removes and returns the installed controller, if any.
pub fn take() -> Option<Controller> {
    CONTROLLER.with(|slot| slot.borrow_mut().take())
}

fn with_controller<F: FnOnce(&mut Controller)>(hook: &str, f: F) {
    CONTROLLER.with(|slot| match slot.borrow_mut().as_mut() {
        Some(controller) => f(controller),
        None => log::warn!("{} called with no controller installed", hook),
    });
}

pub fn init_scheduler() {
    with_controller("init_scheduler", |c| c.init());
}

pub fn handle_new_task(now: Time, task_id: TaskId) {
    with_controller("handle_new_task", |c| c.on_new_task(now, task_id));
}

pub fn handle_task_completion(now: Time, task_id: TaskId) {
    with_controller("handle_task_completion", |c| c.on_task_completion(now, task_id));
}

pub fn scheduler_check(now: Time) {
    with_controller("scheduler_check", |c| c.on_scheduler_check(now));
}

pub fn memory_warning(now: Time, machine_id: MachineId) {
    with_controller("memory_warning", |c| c.on_memory_warning(now, machine_id));
}

pub fn sla_warning(now: Time, task_id: TaskId) {
    with_controller("sla_warning", |c| c.on_sla_warning(now, task_id));
}

pub fn state_change_complete(now: Time, machine_id: MachineId) {
    with_controller("state_change_complete", |c| c.on_state_change_complete(now, machine_id));
}

pub fn migration_done(now: Time, vm_id: VmId) {
    with_controller("migration_done", |c| c.on_migration_complete(now, vm_id));
}

pub fn simulation_complete(now: Time) {
    with_controller("simulation_complete", |c| {
        c.on_simulation_complete(now);
    });
}
