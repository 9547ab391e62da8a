//! Manager-level routing, universal subscriptions, and teardown.

use serde_json::json;
use statebus::{BusError, Manager, ManagerConfig};
use std::collections::HashSet;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(1);
const QUIET: Duration = Duration::from_millis(50);

#[test]
fn test_manager_simple() {
    let manager = Manager::default();

    let sub = manager.subscribe("hello@world.com", &["printers"]).unwrap();
    let update = r#"{"printers":{"w01":{"online":true}}}"#;

    // Published to a different entity
    manager.publish("zzz", update).unwrap();
    assert!(sub.try_recv().is_err());

    manager.publish("hello@world.com", update).unwrap();
    assert_eq!(sub.try_recv().unwrap(), update);

    manager.unsubscribe(sub.id);
    manager.stop();
}

#[test]
fn test_entities_are_isolated() {
    let manager = Manager::default();
    manager.publish("a", r#"{"x":1}"#).unwrap();
    manager.publish("b", r#"{"x":2}"#).unwrap();

    let a = manager.node("a").unwrap().snapshot().unwrap();
    let b = manager.node("b").unwrap().snapshot().unwrap();
    assert_ne!(a, b);
}

#[test]
fn test_initial_paths_template() {
    let manager = Manager::new(ManagerConfig::with_initial_paths(["login", "ts.gcode"]));

    let sub = manager.subscribe("device-1", &["login", "ts"]).unwrap();
    assert_eq!(sub.try_recv().unwrap(), r#"{"login":{},"ts":{"gcode":{}}}"#);

    manager.publish("device-1", r#"{"login":{"deviceName":"w01"}}"#).unwrap();
    assert_eq!(sub.try_recv().unwrap(), r#"{"login":{"deviceName":"w01"}}"#);
}

#[test]
fn test_subscribe_string_through_manager() {
    let manager = Manager::new(ManagerConfig::with_initial_paths(["login"]));
    let sub = manager.subscribe_string("device-1", "login.deviceName").unwrap();

    manager
        .publish_json("device-1", json!({"login": {"deviceName": "w01"}}))
        .unwrap();
    assert_eq!(sub.recv_timeout(WAIT).unwrap(), "w01");
}

// --- Universal Subscriptions ---

#[test]
fn test_universal_subscription_retroactivity() {
    let manager = Manager::default();
    let all = manager.subscribe_all(&["status"]).unwrap();

    manager.publish("printer-1", r#"{"status":"idle","temp":20}"#).unwrap();
    assert_eq!(all.recv_timeout(WAIT).unwrap(), r#"{"status":"idle"}"#);

    manager.publish("printer-2", r#"{"status":"busy"}"#).unwrap();
    assert_eq!(all.recv_timeout(WAIT).unwrap(), r#"{"status":"busy"}"#);
}

#[test]
fn test_universal_subscription_snapshots_existing_entities() {
    let manager = Manager::default();
    manager.publish("a", r#"{"status":"one"}"#).unwrap();
    manager.publish("b", r#"{"status":"two"}"#).unwrap();
    manager.publish("c", r#"{"other":1}"#).unwrap();

    let all = manager.subscribe_all(&["status"]).unwrap();

    let mut seen = HashSet::new();
    while let Ok(delta) = all.recv_timeout(QUIET) {
        seen.insert(delta);
    }
    let expected: HashSet<String> = [r#"{"status":"one"}"#, r#"{"status":"two"}"#]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_universal_and_entity_subscriptions_coexist() {
    let manager = Manager::default();
    let all = manager.subscribe_all(&["status"]).unwrap();
    let one = manager.subscribe("a", &["status"]).unwrap();

    manager.publish("a", r#"{"status":"on"}"#).unwrap();
    assert_eq!(all.recv_timeout(WAIT).unwrap(), r#"{"status":"on"}"#);
    assert_eq!(one.recv_timeout(WAIT).unwrap(), r#"{"status":"on"}"#);

    all.unsubscribe();
    manager.publish("a", r#"{"status":"off"}"#).unwrap();
    assert_eq!(one.recv_timeout(WAIT).unwrap(), r#"{"status":"off"}"#);
    assert!(all.recv_timeout(QUIET).is_err());
}

// --- Errors and Teardown ---

#[test]
fn test_malformed_patch_reported() {
    let manager = Manager::default();
    assert!(matches!(
        manager.publish("a", "nope"),
        Err(BusError::MalformedPatch(_))
    ));
}

#[test]
fn test_stop_closes_everything() {
    let manager = Manager::default();
    let sub = manager.subscribe("a", &["x"]).unwrap();
    let all = manager.subscribe_all(&["x"]).unwrap();
    let scalar = manager.subscribe_string("b", "x").unwrap();

    manager.stop();

    assert!(sub.recv_timeout(QUIET).is_err());
    assert!(all.recv_timeout(QUIET).is_err());
    assert!(scalar.recv_timeout(WAIT).is_err());

    assert!(matches!(
        manager.publish("a", r#"{"x":1}"#),
        Err(BusError::Stopped)
    ));
    assert!(matches!(
        manager.subscribe("a", &["x"]),
        Err(BusError::Stopped)
    ));
    assert!(matches!(
        manager.subscribe_all(&["x"]),
        Err(BusError::Stopped)
    ));
}
