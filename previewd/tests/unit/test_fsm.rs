//! FSM unit tests

use previewd::models::deployment::ContainerStatus;
use previewd::orchestrator::fsm::{next_status, ContainerEvent, ContainerFsm};

#[test]
fn test_fsm_initial_state() {
    let fsm = ContainerFsm::new();
    assert_eq!(fsm.state(), ContainerStatus::Hibernating);
}

#[test]
fn test_fsm_first_start_flow() {
    let mut fsm = ContainerFsm::new();

    // Hibernating -> Starting
    fsm.process(ContainerEvent::Created).unwrap();
    assert_eq!(fsm.state(), ContainerStatus::Starting);

    // Starting -> Running
    fsm.process(ContainerEvent::Healthy).unwrap();
    assert_eq!(fsm.state(), ContainerStatus::Running);
}

#[test]
fn test_fsm_upgrade_flow() {
    let mut fsm = ContainerFsm::from_status(ContainerStatus::Running);

    fsm.process(ContainerEvent::UpgradeStarted { replacing: true }).unwrap();
    assert_eq!(fsm.state(), ContainerStatus::Restarting);

    fsm.process(ContainerEvent::UpgradeCompleted).unwrap();
    assert_eq!(fsm.state(), ContainerStatus::Running);
}

#[test]
fn test_fsm_upgrade_from_hibernation_starts() {
    let mut fsm = ContainerFsm::new();

    fsm.process(ContainerEvent::UpgradeStarted { replacing: false }).unwrap();
    assert_eq!(fsm.state(), ContainerStatus::Starting);

    fsm.process(ContainerEvent::UpgradeCompleted).unwrap();
    assert_eq!(fsm.state(), ContainerStatus::Running);
}

#[test]
fn test_fsm_aborted_upgrade_keeps_running() {
    let mut fsm = ContainerFsm::from_status(ContainerStatus::Restarting);
    fsm.process(ContainerEvent::UpgradeAborted).unwrap();
    assert_eq!(fsm.state(), ContainerStatus::Running);
}

#[test]
fn test_fsm_failure_and_recovery() {
    let mut fsm = ContainerFsm::from_status(ContainerStatus::Starting);

    fsm.process(ContainerEvent::Failed).unwrap();
    assert_eq!(fsm.state(), ContainerStatus::Failed);

    // a failed container only comes back through a new task
    assert!(fsm.process(ContainerEvent::Healthy).is_err());
    assert_eq!(fsm.state(), ContainerStatus::Failed);

    fsm.process(ContainerEvent::Created).unwrap();
    assert_eq!(fsm.state(), ContainerStatus::Starting);
}

#[test]
fn test_fsm_hibernate_and_delete() {
    for status in [
        ContainerStatus::Starting,
        ContainerStatus::Running,
        ContainerStatus::Restarting,
        ContainerStatus::Failed,
    ] {
        assert_eq!(
            next_status(status, ContainerEvent::Hibernated).unwrap(),
            ContainerStatus::Hibernating
        );
        assert_eq!(
            next_status(status, ContainerEvent::Deleted).unwrap(),
            ContainerStatus::Hibernating
        );
    }
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = ContainerFsm::new();

    // Hibernating -> Running is invalid without a task
    let result = fsm.process(ContainerEvent::Healthy);
    assert!(result.is_err());
    assert_eq!(fsm.state(), ContainerStatus::Hibernating);

    assert!(fsm.process(ContainerEvent::UpgradeAborted).is_err());
    assert!(fsm.process(ContainerEvent::UpgradeCompleted).is_err());
}
