//! The run loop

use std::ops::ControlFlow;
use std::time::Duration;

use disco_core::SharedClock;
use tracing::{debug, error, info};

use crate::{DispatchOutcome, Device, Dispatcher, LinkState, PollOutcome, ReadOutcome};

/// Exit status used when the device asks its supervisor for a restart
pub const RESTART_EXIT_CODE: i32 = 75;

/// Why the run loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The broker stayed unreachable past the skipped-read threshold
    RestartRequested,
}

/// Performs the hard reset the loop asks for
pub trait RestartHandler {
    fn restart(&self, exit: LoopExit);
}

/// Restart by exiting the process and leaving the rest to the supervisor
#[derive(Debug, Clone, Copy)]
pub struct ExitProcess {
    pub code: i32,
}

impl Default for ExitProcess {
    fn default() -> Self {
        Self {
            code: RESTART_EXIT_CODE,
        }
    }
}

impl RestartHandler for ExitProcess {
    fn restart(&self, exit: LoopExit) {
        error!(?exit, code = self.code, "Exiting for restart");
        std::process::exit(self.code);
    }
}

/// Single cooperative loop driving discovery, reads and dispatch
pub struct Scheduler {
    device: Device,
    dispatcher: Dispatcher,
    clock: SharedClock,
    /// When the last scheduled read ran
    last_read: Option<Duration>,
}

impl Scheduler {
    pub fn new(device: Device) -> Self {
        let clock = device.connection().clock().clone();
        Self {
            device,
            dispatcher: Dispatcher::new(),
            clock,
            last_read: None,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    /// Run one iteration
    ///
    /// 1. connect if there is no session yet
    /// 2. discover once
    /// 3. read when the interval elapsed or a trigger fired
    /// 4. dispatch at most one inbound message
    /// 5. sleep briefly
    pub fn run_once(&mut self) -> ControlFlow<LoopExit> {
        if self.device.connection().link() == LinkState::Disconnected {
            self.device.connection_mut().connect();
        }

        if !self.device.is_discovered() {
            self.device.discover();
        }

        let now = self.clock.now();
        let interval = self.device.info().interval;
        let due = self
            .last_read
            .map_or(true, |last| now.saturating_sub(last) >= interval);
        // pending triggers wait for the broker instead of burning skipped reads
        let forced = self.device.connection().is_connected() && self.device.registry().interrupt_pending();

        if due || forced {
            if due {
                self.last_read = Some(now);
            } else {
                debug!("Interrupt forced read");
            }
            if self.device.read_and_publish() == ReadOutcome::RestartRequired {
                return ControlFlow::Break(LoopExit::RestartRequested);
            }
        }

        match self.device.connection_mut().poll() {
            PollOutcome::Message(message) => {
                let outcome = self.dispatcher.dispatch(&mut self.device, message);
                if let DispatchOutcome::Commanded {
                    read: ReadOutcome::RestartRequired,
                    ..
                } = outcome
                {
                    return ControlFlow::Break(LoopExit::RestartRequested);
                }
            }
            PollOutcome::Reconnected => {
                info!("Rediscovering after reconnect");
                self.device.discover();
            }
            PollOutcome::Idle => {}
        }

        let idle = self.device.connection().policy().idle_sleep;
        self.clock.sleep(idle);
        ControlFlow::Continue(())
    }

    /// Run until a restart is needed
    pub fn run(&mut self) -> LoopExit {
        info!(
            device = %self.device.info().name(),
            entities = self.device.registry().len(),
            "Run loop started"
        );
        loop {
            if let ControlFlow::Break(exit) = self.run_once() {
                return exit;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionManager, MemoryBus, RetryPolicy};
    use disco_core::{DeviceInfo, ManualClock, SignatureEntry};
    use disco_entities::{Sensor, Trigger};
    use std::sync::Arc;

    fn scheduler(bus: &MemoryBus, clock: &Arc<ManualClock>) -> Scheduler {
        let connection = ConnectionManager::new(
            Box::new(bus.clone()),
            clock.clone(),
            RetryPolicy::default(),
            "homeassistant/status",
        );
        let info = DeviceInfo::new("abc", "PicoTest", "homeassistant").with_interval(Duration::from_secs(5));
        let mut device = Device::new(info, connection);
        device
            .add(Box::new(Sensor::constant(
                "temp".parse().unwrap(),
                20,
                None,
                SignatureEntry::new().unit("C"),
            )))
            .unwrap();
        Scheduler::new(device)
    }

    fn state_publishes(bus: &MemoryBus) -> usize {
        bus.published()
            .iter()
            .filter(|m| m.topic == "homeassistant/sensor/abc/state")
            .count()
    }

    #[test]
    fn test_first_iteration_connects_discovers_and_reads() {
        let bus = MemoryBus::new();
        let clock = ManualClock::shared();
        let mut scheduler = scheduler(&bus, &clock);

        assert_eq!(scheduler.run_once(), ControlFlow::Continue(()));
        let published = bus.published();
        assert_eq!(published.len(), 2);
        assert!(published[0].topic.ends_with("/config"));
        assert_eq!(published[1].topic, "homeassistant/sensor/abc/state");
        assert_eq!(clock.slept(), Duration::from_millis(50));
    }

    #[test]
    fn test_reads_follow_interval() {
        let bus = MemoryBus::new();
        let clock = ManualClock::shared();
        let mut scheduler = scheduler(&bus, &clock);

        scheduler.run_once();
        for _ in 0..10 {
            scheduler.run_once();
        }
        assert_eq!(state_publishes(&bus), 1);

        clock.advance(Duration::from_secs(5));
        scheduler.run_once();
        assert_eq!(state_publishes(&bus), 2);
    }

    #[test]
    fn test_interrupt_forces_read() {
        let bus = MemoryBus::new();
        let clock = ManualClock::shared();
        let connection = ConnectionManager::new(
            Box::new(bus.clone()),
            clock.clone(),
            RetryPolicy::default(),
            "homeassistant/status",
        );
        let mut device = Device::new(DeviceInfo::new("abc", "PicoTest", "homeassistant"), connection);
        device
            .add(Box::new(Trigger::new(
                "button".parse().unwrap(),
                disco_entities::InterruptSource(3),
                clock.clone(),
            )))
            .unwrap();
        let router = device.interrupt_router();
        let mut scheduler = Scheduler::new(device);

        scheduler.run_once();
        scheduler.run_once();
        assert_eq!(state_publishes(&bus), 1);

        assert!(router.route(disco_entities::InterruptSource(3)));
        scheduler.run_once();
        assert_eq!(state_publishes(&bus), 2);
        let last = bus.published().last().unwrap().json().unwrap();
        assert_eq!(last["button_state"], "ON");
    }

    #[test]
    fn test_restart_after_skipped_reads() {
        let bus = MemoryBus::new();
        let clock = ManualClock::shared();
        let mut scheduler = scheduler(&bus, &clock);
        scheduler.run_once();

        bus.inject("homeassistant/status", "offline");
        scheduler.run_once();
        assert_eq!(scheduler.device().connection().link(), LinkState::BrokerDown);

        let mut exit = None;
        for _ in 0..20 {
            clock.advance(Duration::from_secs(5));
            if let ControlFlow::Break(reason) = scheduler.run_once() {
                exit = Some(reason);
                break;
            }
        }
        assert_eq!(exit, Some(LoopExit::RestartRequested));
        assert_eq!(scheduler.device().connection().state().read_failure_count, 10);
    }
}
