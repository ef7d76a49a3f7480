extern crate std;

use std::boxed::Box;
use std::cell::Cell;
use std::rc::Rc;
use std::vec::Vec;

use core::time::Duration;

use embedded_hal::digital::{ErrorKind, ErrorType, InputPin, OutputPin};

use lares::channel::ChannelState;
use lares::clock::ManualClock;
use lares::element::{Element, ElementId};
use lares::error::Error;
use lares::gateway::Publisher;
use lares::runtime::{Runtime, RuntimeConfig};
use lares::storage::MemoryStorage;

pub(crate) type TestRuntime = Runtime<MemoryStorage, Recorder, ManualClock>;

#[derive(Default)]
pub(crate) struct Recorder {
    pub(crate) updates: Vec<ChannelState>,
}

impl Recorder {
    pub(crate) fn take(&mut self) -> Vec<ChannelState> {
        core::mem::take(&mut self.updates)
    }
}

impl Publisher for Recorder {
    fn publish(&mut self, update: &ChannelState) -> Result<(), Error> {
        self.updates.push(*update);
        Ok(())
    }
}

/// A pin whose level is shared among its clones.
#[derive(Clone, Default)]
pub(crate) struct TestPin {
    high: Rc<Cell<bool>>,
    broken: Rc<Cell<bool>>,
    writes: Rc<Cell<usize>>,
}

impl TestPin {
    pub(crate) fn is_set(&self) -> bool {
        self.high.get()
    }

    pub(crate) fn set(&self, high: bool) {
        self.high.set(high);
    }

    pub(crate) fn break_pin(&self, broken: bool) {
        self.broken.set(broken);
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.get()
    }

    fn check(&self) -> Result<(), ErrorKind> {
        if self.broken.get() {
            Err(ErrorKind::Other)
        } else {
            Ok(())
        }
    }
}

impl ErrorType for TestPin {
    type Error = ErrorKind;
}

impl OutputPin for TestPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.check()?;
        self.high.set(false);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.check()?;
        self.high.set(true);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

impl InputPin for TestPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.check()?;
        Ok(self.high.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

pub(crate) fn runtime() -> TestRuntime {
    runtime_on(MemoryStorage::new())
}

pub(crate) fn runtime_on(storage: MemoryStorage) -> TestRuntime {
    Runtime::new(
        storage,
        Recorder::default(),
        ManualClock::new(),
        RuntimeConfig::new(),
    )
}

pub(crate) fn register(runtime: &mut TestRuntime, element: impl Element + 'static) -> ElementId {
    runtime.register(Box::new(element)).unwrap()
}

/// Advances the clock by `total` in `step` increments, ticking each time.
pub(crate) fn run_for(runtime: &mut TestRuntime, total: Duration, step: Duration) {
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        runtime.clock().advance(step);
        runtime.tick();
        elapsed += step;
    }
}

/// Simulates a power loss: the storage survives, everything else is lost.
pub(crate) fn power_cycle(runtime: &mut TestRuntime) -> MemoryStorage {
    core::mem::take(runtime.storage_mut())
}

// Device level scenarios involving several elements.

#[cfg(all(
    feature = "binary_sensor",
    feature = "impulse_counter",
    feature = "relay",
    feature = "status_led",
    feature = "valve"
))]
mod scenarios {
    use alloc::vec::Vec;

    use core::time::Duration;

    use lares::action::{Action, ActionCommand, Rejection};
    use lares::channel::{ChannelFlags, ChannelValue};
    use lares::gateway::ConnectionState;

    use crate::binary_sensor::{BinarySensor, Edge};
    use crate::impulse_counter::ImpulseCounter;
    use crate::relay::Relay;
    use crate::status_led::StatusLed;
    use crate::valve::Valve;

    use super::{TestPin, power_cycle, register, run_for, runtime, runtime_on};

    const TICK: Duration = Duration::from_millis(10);

    #[test]
    fn test_two_relays_toggle() {
        let mut runtime = runtime();
        let first = TestPin::default();
        let second = TestPin::default();
        let _ = register(
            &mut runtime,
            Relay::new().with_output(first.clone()).with_output(second.clone()),
        );
        runtime.boot().unwrap();
        runtime.set_connection_state(ConnectionState::Registered);
        run_for(&mut runtime, TICK, TICK);
        let _ = runtime.publisher_mut().take();

        runtime
            .handle_action(ActionCommand::new(0, Action::Toggle))
            .unwrap();
        run_for(&mut runtime, TICK * 3, TICK);

        assert!(first.is_set());
        assert!(!second.is_set());
        assert_eq!(runtime.channel(0).unwrap().value(), ChannelValue::Bool(true));
        assert_eq!(runtime.channel(1).unwrap().value(), ChannelValue::Bool(false));

        let updates = runtime.publisher_mut().take();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].number, 0);
        assert_eq!(updates[0].value, ChannelValue::Bool(true));

        // The other channel toggles on its own.
        runtime
            .handle_action(ActionCommand::new(1, Action::Toggle))
            .unwrap();
        run_for(&mut runtime, TICK * 3, TICK);
        assert!(first.is_set());
        assert!(second.is_set());
        let updates = runtime.publisher_mut().take();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].number, 1);
    }

    #[test]
    fn test_sensor_edge_toggles_relay() {
        let mut runtime = runtime();
        let button = TestPin::default();
        let output = TestPin::default();
        let _ = register(
            &mut runtime,
            BinarySensor::new(button.clone())
                .with_binding(Edge::Rising, ActionCommand::new(1, Action::Toggle)),
        );
        let _ = register(&mut runtime, Relay::new().with_output(output.clone()));
        runtime.boot().unwrap();
        runtime.set_connection_state(ConnectionState::Registered);
        run_for(&mut runtime, TICK, TICK);
        let _ = runtime.publisher_mut().take();

        button.set(true);
        run_for(&mut runtime, TICK * 10, TICK);
        assert!(output.is_set());
        assert_eq!(runtime.channel(1).unwrap().value(), ChannelValue::Bool(true));
        let updates = runtime.publisher_mut().take();
        assert!(updates.iter().any(|update| update.number == 1));

        // Releasing does nothing, the next press toggles back.
        button.set(false);
        run_for(&mut runtime, TICK * 10, TICK);
        assert!(output.is_set());

        button.set(true);
        run_for(&mut runtime, TICK * 10, TICK);
        assert!(!output.is_set());
        assert_eq!(runtime.channel(1).unwrap().value(), ChannelValue::Bool(false));
    }

    #[test]
    fn test_flooding_closes_valve_once() {
        let mut runtime = runtime();
        let flood = TestPin::default();
        let valve = TestPin::default();

        let _ = register(&mut runtime, BinarySensor::new(flood.clone()));
        let _ = register(
            &mut runtime,
            Valve::new(valve.clone()).with_flood_sensor(0),
        );
        runtime.boot().unwrap();
        runtime.set_connection_state(ConnectionState::Registered);

        runtime
            .handle_action(ActionCommand::new(1, Action::Open))
            .unwrap();
        run_for(&mut runtime, Duration::from_secs(2), TICK);
        assert!(valve.is_set());
        let _ = runtime.publisher_mut().take();

        flood.set(true);
        run_for(&mut runtime, Duration::from_secs(5), TICK);

        assert!(!valve.is_set());
        let valve_updates: Vec<_> = runtime
            .publisher_mut()
            .take()
            .into_iter()
            .filter(|update| update.number == 1)
            .collect();
        assert_eq!(valve_updates.len(), 1);
        assert_eq!(valve_updates[0].value, ChannelValue::Percentage(0));
        assert!(valve_updates[0].flags.contains(ChannelFlags::FLOODING));

        // Opening is refused while the flood lasts.
        assert_eq!(
            runtime.handle_action(ActionCommand::new(1, Action::Open)),
            Err(Rejection::Blocked)
        );
        assert!(!valve.is_set());

        // The flood clears, the valve stays closed and the alarm raised
        // until the valve is opened again.
        flood.set(false);
        run_for(&mut runtime, Duration::from_secs(2), TICK);
        assert!(!valve.is_set());
        assert!(
            runtime
                .channel(1)
                .unwrap()
                .has_flags(ChannelFlags::FLOODING)
        );
        assert!(
            runtime
                .publisher_mut()
                .take()
                .iter()
                .all(|update| update.number != 1)
        );

        runtime
            .handle_action(ActionCommand::new(1, Action::Open))
            .unwrap();
        assert!(valve.is_set());
        assert!(
            !runtime
                .channel(1)
                .unwrap()
                .has_flags(ChannelFlags::FLOODING)
        );
    }

    #[test]
    fn test_state_survives_power_loss() {
        let mut runtime = runtime();
        let _ = register(&mut runtime, Relay::new().with_output(TestPin::default()));
        let counter_pin = TestPin::default();
        let _ = register(&mut runtime, ImpulseCounter::new(counter_pin.clone()));
        runtime.boot().unwrap();

        runtime
            .handle_action(ActionCommand::new(0, Action::TurnOn))
            .unwrap();
        for _ in 0..3 {
            counter_pin.set(true);
            run_for(&mut runtime, TICK * 5, TICK);
            counter_pin.set(false);
            run_for(&mut runtime, TICK * 5, TICK);
        }
        assert_eq!(
            runtime.channel(1).unwrap().value(),
            ChannelValue::Counter(3)
        );

        // Both elements asked for a save, which is written before the
        // periodic one.
        run_for(&mut runtime, Duration::from_secs(60), Duration::from_millis(100));
        let storage = power_cycle(&mut runtime);

        let relay = TestPin::default();
        let mut runtime = runtime_on(storage);
        let _ = register(&mut runtime, Relay::new().with_output(relay.clone()));
        let _ = register(&mut runtime, ImpulseCounter::new(TestPin::default()));
        runtime.boot().unwrap();

        assert!(relay.is_set());
        assert_eq!(
            runtime.channel(0).unwrap().value(),
            ChannelValue::Bool(true)
        );
        assert_eq!(
            runtime.channel(1).unwrap().value(),
            ChannelValue::Counter(3)
        );
    }

    #[test]
    fn test_replaced_element_starts_from_defaults() {
        let mut runtime = runtime();
        let counter_pin = TestPin::default();
        let _ = register(&mut runtime, ImpulseCounter::new(counter_pin.clone()));
        runtime.boot().unwrap();

        counter_pin.set(true);
        run_for(&mut runtime, TICK * 5, TICK);
        counter_pin.set(false);
        run_for(&mut runtime, TICK * 5, TICK);
        assert_eq!(
            runtime.channel(0).unwrap().value(),
            ChannelValue::Counter(1)
        );
        let _ = runtime.save_state().unwrap();
        assert!(runtime.storage_mut().get("state_0.a").is_some());
        let storage = power_cycle(&mut runtime);

        // A relay now sits where the counter was.
        let relay = TestPin::default();
        let mut runtime = runtime_on(storage);
        let _ = register(&mut runtime, Relay::new().with_output(relay.clone()));
        runtime.boot().unwrap();

        assert!(!relay.is_set());
        assert_eq!(
            runtime.channel(0).unwrap().value(),
            ChannelValue::Bool(false)
        );
    }

    #[test]
    fn test_registration_republishes_everything() {
        let mut runtime = runtime();
        let _ = register(
            &mut runtime,
            Relay::new()
                .with_output(TestPin::default())
                .with_output(TestPin::default()),
        );
        let _ = register(&mut runtime, BinarySensor::new(TestPin::default()));
        let _ = register(&mut runtime, StatusLed::new(TestPin::default()));
        runtime.boot().unwrap();

        for _ in 0..2 {
            runtime.set_connection_state(ConnectionState::Registered);
            run_for(&mut runtime, TICK * 5, TICK);
            let numbers: Vec<_> = runtime
                .publisher_mut()
                .take()
                .into_iter()
                .map(|update| update.number)
                .collect();
            assert_eq!(numbers, [0, 1, 2]);

            runtime.set_connection_state(ConnectionState::Disconnected);
            run_for(&mut runtime, TICK * 5, TICK);
        }
        assert!(runtime.publisher_mut().take().is_empty());
    }
}
