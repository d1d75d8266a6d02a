//! FSM unit tests

use hostengine::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};
use hostengine::errors::EngineError;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.status(), DeploymentStatus::Queued);
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = DeploymentFsm::new();

    // Queued -> Building
    assert_eq!(fsm.process(DeploymentEvent::Start).unwrap(), DeploymentStatus::Building);

    // Building -> Ready
    assert_eq!(fsm.process(DeploymentEvent::Succeed).unwrap(), DeploymentStatus::Ready);
    assert!(fsm.status().is_terminal());
}

#[test]
fn test_fsm_failure_flow() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::Fail("npm exited with code 1".to_string()))
        .unwrap();

    assert_eq!(fsm.status(), DeploymentStatus::Failed);
    assert_eq!(fsm.error(), Some("npm exited with code 1"));
}

#[test]
fn test_fsm_can_fail_before_building() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeploymentEvent::Fail("dispatch failed".to_string()))
        .unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Failed);
}

#[test]
fn test_fsm_terminal_states_are_final() {
    let mut fsm = DeploymentFsm::resume(DeploymentStatus::Ready);
    let err = fsm.process(DeploymentEvent::Start).unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition(_)));
    assert_eq!(fsm.status(), DeploymentStatus::Ready);

    let mut fsm = DeploymentFsm::resume(DeploymentStatus::Failed);
    assert!(fsm.process(DeploymentEvent::Succeed).is_err());
    assert_eq!(fsm.status(), DeploymentStatus::Failed);
}

#[test]
fn test_fsm_cannot_succeed_without_building() {
    let mut fsm = DeploymentFsm::new();
    assert!(fsm.process(DeploymentEvent::Succeed).is_err());
    assert_eq!(fsm.status(), DeploymentStatus::Queued);
}

#[test]
fn test_status_serializes_lowercase() {
    assert_eq!(
        serde_json::to_string(&DeploymentStatus::Building).unwrap(),
        "\"building\""
    );
    let status: DeploymentStatus = serde_json::from_str("\"ready\"").unwrap();
    assert_eq!(status, DeploymentStatus::Ready);
}
