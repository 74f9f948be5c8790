mod common;

use common::{build_controller, init_logging, Call, MockCluster};

use std::cell::RefCell;
use std::rc::Rc;

use greensched::core::common::{CpuArch, PState, SState, SlaTier, VmType};

fn new_mock() -> Rc<RefCell<MockCluster>> {
    Rc::new(RefCell::new(MockCluster::new()))
}

#[test]
// P-state follows utilization: saturated hosts run at P0, moderately
// loaded at P1, barely busy at P2 and idle hosts drop to P3.
fn pstate_follows_utilization() {
    init_logging();
    let mock = new_mock();
    for power in [10, 20, 30, 40] {
        mock.borrow_mut().add_machine(CpuArch::X86, 4, 8192, SState::S0, power);
    }
    let mut controller = build_controller(&mock);
    controller.init();

    mock.borrow_mut().set_machine_tasks(0, 4);
    mock.borrow_mut().set_machine_tasks(1, 2);
    mock.borrow_mut().set_machine_tasks(2, 1);
    mock.borrow_mut().clear_calls();
    controller.on_scheduler_check(1000);

    assert_eq!(mock.borrow().machine(0).p_state, PState::P0);
    assert_eq!(mock.borrow().machine(1).p_state, PState::P1);
    assert_eq!(mock.borrow().machine(2).p_state, PState::P2);
    assert_eq!(mock.borrow().machine(3).p_state, PState::P3);
    // P3 was already in effect, so the idle machine needs no actuation
    assert_eq!(
        mock.borrow()
            .count_calls(|c| matches!(c, Call::SetCorePerformance { machine: 3, .. })),
        0
    );
    assert_eq!(mock.borrow().count_calls(|c| matches!(c, Call::SetState { .. })), 0);
}

#[test]
// A host with a strict-SLA task runs at P0 regardless of utilization.
fn strict_task_forces_p0_on_tick() {
    let mock = new_mock();
    let m0 = mock.borrow_mut().add_machine(CpuArch::X86, 4, 8192, SState::S0, 100);
    let mut controller = build_controller(&mock);
    controller.init();

    let task = mock
        .borrow_mut()
        .add_task(CpuArch::X86, VmType::Linux, SlaTier::Sla0, 256, 500_000_000);
    controller.on_new_task(0, task);
    assert_eq!(mock.borrow().machine(m0).p_state, PState::P0);

    // simulate drift and verify the governor restores P0
    mock.borrow_mut().set_p_state(m0, PState::P2);
    mock.borrow_mut().clear_calls();
    controller.on_scheduler_check(1000);
    assert_eq!(mock.borrow().machine(m0).p_state, PState::P0);
    assert!(mock.borrow().calls.contains(&Call::SetCorePerformance {
        machine: m0,
        core: 0,
        p_state: PState::P0
    }));
}

#[test]
// A second tick with no intervening event issues no actuator calls.
fn governor_tick_is_idempotent() {
    let mock = new_mock();
    mock.borrow_mut().add_machine(CpuArch::X86, 4, 8192, SState::S0, 50);
    mock.borrow_mut().add_machine(CpuArch::X86, 4, 8192, SState::S0, 100);
    let mut controller = build_controller(&mock);
    controller.init();

    let task = mock
        .borrow_mut()
        .add_task(CpuArch::X86, VmType::Linux, SlaTier::Sla0, 256, 500_000_000);
    controller.on_new_task(0, task);
    controller.on_scheduler_check(1000);

    mock.borrow_mut().clear_calls();
    controller.on_scheduler_check(2000);
    assert!(mock.borrow().calls.is_empty());
}

#[test]
// At the sleep cadence at most two idle underloaded machines are parked,
// least efficient first, and busy machines are left alone.
fn sleep_pass_parks_at_most_two_idle_machines() {
    let mock = new_mock();
    for power in [10, 20, 30, 40, 50, 60] {
        mock.borrow_mut().add_machine(CpuArch::X86, 4, 8192, SState::S0, power);
    }
    let mut controller = build_controller(&mock);
    controller.init();

    for busy in 0..3 {
        mock.borrow_mut().set_machine_tasks(busy, 3);
    }
    mock.borrow_mut().clear_calls();
    controller.on_scheduler_check(10_000_000);

    // the two least efficient idle machines go first
    assert_eq!(mock.borrow().requested_state(5), Some(SState::S0i1));
    assert_eq!(mock.borrow().requested_state(4), Some(SState::S0i1));
    assert_eq!(
        mock.borrow()
            .count_calls(|c| matches!(c, Call::SetState { state: SState::S0i1, .. })),
        2
    );
    assert_eq!(controller.cluster_state().borrow().active_count(), 4);

    // next tick falls inside the cadence window, nothing more is parked
    mock.borrow_mut().clear_calls();
    controller.on_scheduler_check(12_000_000);
    assert_eq!(mock.borrow().count_calls(|c| matches!(c, Call::SetState { .. })), 0);

    // the following pass parks the remaining idle machine
    controller.on_scheduler_check(20_000_000);
    assert_eq!(
        mock.borrow()
            .count_calls(|c| matches!(c, Call::SetState { state: SState::S0i1, .. })),
        1
    );
    assert_eq!(controller.cluster_state().borrow().active_count(), 3);
}

#[test]
// The governor never parks the cluster below two active machines.
fn sleep_pass_keeps_two_machines_active() {
    let mock = new_mock();
    for power in [10, 20, 30] {
        mock.borrow_mut().add_machine(CpuArch::X86, 4, 8192, SState::S0, power);
    }
    let mut controller = build_controller(&mock);
    controller.init();

    mock.borrow_mut().clear_calls();
    controller.on_scheduler_check(10_000_000);
    assert_eq!(
        mock.borrow()
            .count_calls(|c| matches!(c, Call::SetState { state: SState::S0i1, .. })),
        1
    );
    assert_eq!(controller.cluster_state().borrow().active_count(), 2);

    controller.on_scheduler_check(20_000_000);
    assert_eq!(
        mock.borrow()
            .count_calls(|c| matches!(c, Call::SetState { state: SState::S0i1, .. })),
        1
    );
    assert_eq!(controller.cluster_state().borrow().active_count(), 2);
}

#[test]
// A machine observed outside S0 drops out of the active set on refresh.
fn refresh_drops_machines_that_left_s0() {
    let mock = new_mock();
    let _m0 = mock.borrow_mut().add_machine(CpuArch::X86, 4, 8192, SState::S0, 50);
    let m1 = mock.borrow_mut().add_machine(CpuArch::X86, 4, 8192, SState::S0, 100);
    let mut controller = build_controller(&mock);
    controller.init();
    assert!(controller.cluster_state().borrow().is_active(m1));

    mock.borrow_mut().set_s_state(m1, SState::S1);
    controller.on_scheduler_check(1000);

    let state = controller.cluster_state();
    assert!(!state.borrow().is_active(m1));
    assert_eq!(state.borrow().utilization(m1), 0.0);
}
