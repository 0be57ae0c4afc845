//! End-to-end device scenarios over the in-memory bus

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use disco_core::{DeviceInfo, EntityName, ManualClock, SignatureEntry};
use disco_entities::hardware::memory::MemoryOutput;
use disco_entities::{Light, Sensor, Switch};
use disco_runtime::{
    ConnectionManager, Device, LinkState, LoopExit, MemoryBus, PublishedMessage, RetryPolicy,
    Scheduler,
};
use serde_json::json;

const STATUS: &str = "homeassistant/status";
const STATE: &str = "homeassistant/sensor/abc/state";

fn name(s: &str) -> EntityName {
    s.parse().unwrap()
}

struct Rig {
    bus: MemoryBus,
    clock: Arc<ManualClock>,
    fan: MemoryOutput,
    scheduler: Scheduler,
}

fn rig(policy: RetryPolicy) -> Rig {
    let bus = MemoryBus::new();
    let clock = ManualClock::shared();
    let fan = MemoryOutput::new(false);

    let connection = ConnectionManager::new(Box::new(bus.clone()), clock.clone(), policy, STATUS);
    let info = DeviceInfo::new("abc", "PicoTest", "homeassistant").with_location("Garage");
    let mut device = Device::new(info, connection);
    device
        .add(Box::new(Sensor::constant(
            name("temp"),
            22.25,
            None,
            SignatureEntry::new().unit("C"),
        )))
        .unwrap();
    device
        .add(Box::new(Switch::new(name("fan"), Box::new(fan.clone()))))
        .unwrap();

    Rig {
        bus,
        clock,
        fan,
        scheduler: Scheduler::new(device),
    }
}

fn is_config(message: &PublishedMessage) -> bool {
    message.topic.ends_with("/config")
}

#[test]
fn test_sensor_and_switch_lifecycle() {
    let mut rig = rig(RetryPolicy::default());
    rig.scheduler.run_once();

    let published = rig.bus.take_published();
    assert_eq!(published.len(), 3);
    assert!(published[..2].iter().all(|m| is_config(m) && m.retain));
    assert_eq!(published[0].topic, "homeassistant/sensor/abc/temp/config");
    assert_eq!(published[1].topic, "homeassistant/switch/abc/fan/config");

    let temp_config = published[0].json().unwrap();
    assert!(temp_config.get("command_topic").is_none());
    assert_eq!(temp_config["device"]["suggested_area"], "Garage");
    assert_eq!(temp_config["force_update"], true);
    let fan_config = published[1].json().unwrap();
    assert_eq!(fan_config["command_topic"], "homeassistant/switch/abc/fan/set");

    assert_eq!(published[2].topic, STATE);
    assert!(!published[2].retain);
    assert_eq!(
        published[2].json().unwrap(),
        json!({"temp": 22.25, "fan_state": "OFF"})
    );

    // command is applied and reflected without waiting for the interval
    rig.bus.inject("homeassistant/switch/abc/fan/set", "ON");
    rig.scheduler.run_once();
    assert!(rig.fan.is_on());
    let published = rig.bus.take_published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].json().unwrap()["fan_state"], "ON");
}

#[test]
fn test_broker_restart_triggers_single_rediscovery() {
    let mut rig = rig(RetryPolicy::default());
    rig.scheduler.run_once();
    rig.bus.take_published();

    rig.bus.inject(STATUS, "offline");
    rig.scheduler.run_once();
    for _ in 0..3 {
        rig.clock.advance(Duration::from_secs(5));
        rig.scheduler.run_once();
    }
    // commands still apply but nothing is published while down
    rig.bus.inject("homeassistant/switch/abc/fan/set", "ON");
    rig.scheduler.run_once();
    assert!(rig.fan.is_on());
    assert!(rig.bus.published().is_empty());

    rig.bus.inject(STATUS, "online");
    rig.scheduler.run_once();
    let configs: Vec<String> = rig
        .bus
        .published()
        .into_iter()
        .filter(is_config)
        .map(|m| m.topic)
        .collect();
    assert_eq!(
        configs,
        vec![
            "homeassistant/sensor/abc/temp/config".to_string(),
            "homeassistant/switch/abc/fan/config".to_string()
        ]
    );
    assert_eq!(rig.scheduler.device().connection().state().read_failure_count, 0);

    // a second "online" while connected changes nothing
    rig.bus.take_published();
    rig.bus.inject(STATUS, "online");
    rig.scheduler.run_once();
    assert!(rig.bus.published().iter().all(|m| !is_config(m)));
}

#[test]
fn test_publish_failures_below_bound_recover() {
    let mut rig = rig(RetryPolicy::default());
    rig.scheduler.run_once();
    rig.bus.take_published();

    rig.bus.fail_publishes(3);
    rig.clock.advance(Duration::from_secs(5));
    rig.scheduler.run_once();

    let connection = rig.scheduler.device().connection();
    assert_eq!(connection.link(), LinkState::Connected);
    assert_eq!(connection.state().connection_failure_count, 0);
    assert_eq!(rig.bus.published().len(), 1);
}

#[test]
fn test_publish_failures_past_bound_mark_broker_down() {
    let mut rig = rig(RetryPolicy::default());
    rig.scheduler.run_once();
    rig.bus.take_published();
    let attempts_before = rig.bus.publish_attempts();

    rig.bus.fail_publishes(100);
    rig.clock.advance(Duration::from_secs(5));
    rig.scheduler.run_once();

    let connection = rig.scheduler.device().connection();
    assert_eq!(connection.link(), LinkState::BrokerDown);
    assert!(!connection.state().broker_alive);
    assert_eq!(rig.bus.publish_attempts() - attempts_before, 4);

    // the abandoned payload is not retried on later cycles
    rig.scheduler.run_once();
    assert_eq!(rig.bus.publish_attempts() - attempts_before, 4);
}

#[test]
fn test_sustained_outage_requests_restart() {
    let policy = RetryPolicy {
        read_failure_reset_threshold: 3,
        ..RetryPolicy::default()
    };
    let mut rig = rig(policy);
    rig.scheduler.run_once();
    rig.bus.inject(STATUS, "offline");
    rig.scheduler.run_once();

    let mut exits = Vec::new();
    for _ in 0..5 {
        rig.clock.advance(Duration::from_secs(5));
        if let ControlFlow::Break(exit) = rig.scheduler.run_once() {
            exits.push(exit);
            break;
        }
    }
    assert_eq!(exits, vec![LoopExit::RestartRequested]);
}

#[test]
fn test_reconnect_starts_a_fresh_outage_budget() {
    let policy = RetryPolicy {
        read_failure_reset_threshold: 5,
        ..RetryPolicy::default()
    };
    let mut rig = rig(policy);
    rig.scheduler.run_once();
    rig.bus.inject(STATUS, "offline");
    rig.scheduler.run_once();
    for _ in 0..4 {
        rig.clock.advance(Duration::from_secs(5));
        assert!(rig.scheduler.run_once().is_continue());
    }
    assert_eq!(rig.scheduler.device().connection().state().read_failure_count, 4);

    rig.bus.fail_polls(1);
    rig.scheduler.run_once();
    let connection = rig.scheduler.device().connection();
    assert_eq!(connection.link(), LinkState::Connected);
    assert_eq!(connection.state().read_failure_count, 0);

    // a new outage gets the full threshold again
    rig.bus.inject(STATUS, "offline");
    rig.scheduler.run_once();
    let breaks: Vec<bool> = (0..5)
        .map(|_| {
            rig.clock.advance(Duration::from_secs(5));
            rig.scheduler.run_once().is_break()
        })
        .collect();
    assert_eq!(breaks, vec![false, false, false, false, true]);
}

#[test]
fn test_transport_loss_reconnects_and_rediscovers() {
    let mut rig = rig(RetryPolicy::default());
    rig.scheduler.run_once();
    rig.bus.take_published();

    rig.bus.fail_polls(1);
    rig.bus.fail_connects(2);
    rig.scheduler.run_once();

    assert_eq!(rig.bus.connects(), 2);
    assert_eq!(rig.scheduler.device().connection().link(), LinkState::Connected);
    assert!(rig
        .bus
        .subscriptions()
        .contains(&"homeassistant/switch/abc/fan/set".to_string()));
    assert_eq!(rig.bus.published().iter().filter(|m| is_config(m)).count(), 2);
}

#[test]
fn test_light_brightness_command() {
    use disco_entities::hardware::memory::MemoryPwm;

    let bus = MemoryBus::new();
    let clock = ManualClock::shared();
    let pwm = MemoryPwm::new(0.0);
    let connection = ConnectionManager::new(
        Box::new(bus.clone()),
        clock,
        RetryPolicy::default(),
        STATUS,
    );
    let mut device = Device::new(DeviceInfo::new("abc", "PicoTest", "homeassistant"), connection);
    device
        .add(Box::new(Light::new(name("lamp"), Box::new(pwm.clone()))))
        .unwrap();
    let mut scheduler = Scheduler::new(device);
    scheduler.run_once();
    bus.take_published();

    bus.inject("homeassistant/light/abc/lamp/set", "128");
    scheduler.run_once();
    let state = bus.published()[0].json().unwrap();
    assert_eq!(state["lamp_state"], "ON");
    assert_eq!(state["lamp_brightness"], 128);
    assert!((pwm.current() - 128.0 / 255.0).abs() < 1e-3);
}
