//! Single-timeline scheduler.
//!
//! A frame lasts `1 / refresh` seconds and is split into
//! `quanta_per_frame` quanta. At the end of global quantum `n` a device clocked
//! at `f` Hz is owed `floor(n * f / (refresh * quanta_per_frame))` cycles; the
//! budget for a quantum is what is owed minus what it already executed, so
//! overshoot is repaid and no cycles drift over long runs.

use std::collections::VecDeque;

use crate::device::DeviceEvent;
use crate::ConfigError;

/// Exact refresh rate `numerator / denominator` Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RefreshRate {
    /// Numerator in Hz.
    pub numerator: u64,
    /// Denominator.
    pub denominator: u64,
}

impl RefreshRate {
    /// Whole-number rate.
    #[must_use]
    pub const fn hz(hz: u64) -> Self {
        Self {
            numerator: hz,
            denominator: 1,
        }
    }

    /// Rate given in hundredths of a hertz, e.g. `5924` for 59.24 Hz.
    #[must_use]
    pub const fn centihertz(centihertz: u64) -> Self {
        Self {
            numerator: centihertz,
            denominator: 100,
        }
    }
}

/// Number of quanta per frame when none is configured.
pub const DEFAULT_QUANTA_PER_FRAME: u32 = 10;

/// Timeline parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SchedulerConfig {
    /// Frame rate.
    pub refresh: RefreshRate,
    /// Scheduling slices per frame.
    pub quanta_per_frame: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh: RefreshRate::hz(60),
            quanta_per_frame: DEFAULT_QUANTA_PER_FRAME,
        }
    }
}

impl SchedulerConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh.numerator == 0 || self.refresh.denominator == 0 {
            return Err(ConfigError::InvalidScheduler {
                reason: "refresh rate must be non-zero".to_owned(),
            });
        }
        if self.quanta_per_frame == 0 {
            return Err(ConfigError::InvalidScheduler {
                reason: "a frame needs at least one quantum".to_owned(),
            });
        }
        Ok(())
    }

    /// Cycles a `clock` Hz device is owed after `quanta` global quanta.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn cycles_owed(&self, clock: u64, quanta: u64) -> u64 {
        let owed = quanta as u128 * clock as u128 * self.refresh.denominator as u128
            / (self.refresh.numerator as u128 * self.quanta_per_frame as u128);
        if owed > u64::MAX as u128 {
            u64::MAX
        } else {
            owed as u64
        }
    }
}

/// Interrupt asserted on a device at a fixed point of every frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PeriodicInterrupt {
    /// Target device tag.
    pub device: String,
    /// Interrupt level.
    pub line: u8,
    /// Quantum of the frame, `0..quanta_per_frame`, at whose start it is posted.
    pub quantum: u32,
}

/// Watchdog parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct WatchdogConfig {
    /// Frames without a kick before the machine is reset.
    pub interval_frames: u32,
}

/// Counter reset by kicks; expiry requests a machine reset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Watchdog {
    interval: u64,
    counter: u64,
    expirations: u64,
}

impl Watchdog {
    pub(crate) fn new(config: WatchdogConfig, quanta_per_frame: u32) -> Result<Self, ConfigError> {
        if config.interval_frames == 0 {
            return Err(ConfigError::InvalidScheduler {
                reason: "watchdog interval must be at least one frame".to_owned(),
            });
        }
        Ok(Self {
            interval: u64::from(config.interval_frames) * u64::from(quanta_per_frame),
            counter: 0,
            expirations: 0,
        })
    }

    /// Restarts the countdown.
    pub fn service(&mut self) {
        self.counter = 0;
    }

    /// Quanta elapsed since the last kick or reset.
    #[must_use]
    pub const fn counter(&self) -> u64 {
        self.counter
    }

    /// Interval in quanta.
    #[must_use]
    pub const fn interval(&self) -> u64 {
        self.interval
    }

    /// Number of expirations so far.
    #[must_use]
    pub const fn expirations(&self) -> u64 {
        self.expirations
    }

    /// Advances one quantum; returns `true` exactly once per expiry.
    pub(crate) fn tick(&mut self) -> bool {
        self.counter += 1;
        if self.counter < self.interval {
            return false;
        }
        self.counter = 0;
        self.expirations += 1;
        true
    }

    pub(crate) fn restore(&mut self, counter: u64, expirations: u64) {
        self.counter = counter;
        self.expirations = expirations;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DeviceTimeline {
    clock: u64,
    executed: u64,
    events: VecDeque<DeviceEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Periodic {
    device: usize,
    line: u8,
    quantum: u32,
}

/// Per-machine timeline: global quantum counter, per-device cycle ledgers
/// and event queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheduler {
    config: SchedulerConfig,
    quantum: u64,
    devices: Vec<DeviceTimeline>,
    periodic: Vec<Periodic>,
}

impl Scheduler {
    pub(crate) fn new(config: SchedulerConfig, clocks: &[u64]) -> Self {
        Self {
            config,
            quantum: 0,
            devices: clocks
                .iter()
                .map(|&clock| DeviceTimeline {
                    clock,
                    executed: 0,
                    events: VecDeque::new(),
                })
                .collect(),
            periodic: Vec::new(),
        }
    }

    pub(crate) fn add_periodic(&mut self, device: usize, line: u8, quantum: u32) {
        self.periodic.push(Periodic {
            device,
            line,
            quantum,
        });
    }

    /// Timeline parameters.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Quanta completed since power-on.
    #[must_use]
    pub const fn quantum(&self) -> u64 {
        self.quantum
    }

    /// Frames completed since power-on.
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.quantum / self.config.quanta_per_frame as u64
    }

    /// Position of the next quantum inside its frame.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn quantum_in_frame(&self) -> u32 {
        (self.quantum % self.config.quanta_per_frame as u64) as u32
    }

    /// Cycles device `index` has executed.
    #[must_use]
    pub fn executed(&self, index: usize) -> u64 {
        self.devices.get(index).map_or(0, |device| device.executed)
    }

    pub(crate) fn clock(&self, index: usize) -> u64 {
        self.devices[index].clock
    }

    /// Posts the periodic events due at the start of the next quantum.
    pub(crate) fn begin_quantum(&mut self) {
        let position = self.quantum_in_frame();
        for periodic in &self.periodic {
            if periodic.quantum == position {
                self.devices[periodic.device]
                    .events
                    .push_back(DeviceEvent::Interrupt {
                        line: periodic.line,
                    });
            }
        }
    }

    /// Cycles device `index` may run in the current quantum.
    pub(crate) fn budget(&self, index: usize) -> u64 {
        let device = &self.devices[index];
        self.config
            .cycles_owed(device.clock, self.quantum + 1)
            .saturating_sub(device.executed)
    }

    /// Records what device `index` consumed out of `budget`; a device that
    /// stops short still burns the slice.
    pub(crate) fn charge(&mut self, index: usize, consumed: u64, budget: u64) {
        self.devices[index].executed += consumed.max(budget);
    }

    pub(crate) fn post(&mut self, index: usize, event: DeviceEvent) {
        self.devices[index].events.push_back(event);
    }

    pub(crate) fn take_events(&mut self, index: usize) -> Vec<DeviceEvent> {
        self.devices[index].events.drain(..).collect()
    }

    /// Pending events of device `index`.
    #[must_use]
    pub fn pending(&self, index: usize) -> Vec<DeviceEvent> {
        self.devices
            .get(index)
            .map(|device| device.events.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn end_quantum(&mut self) {
        self.quantum += 1;
    }

    pub(crate) fn clear_events(&mut self) {
        for device in &mut self.devices {
            device.events.clear();
        }
    }

    pub(crate) fn restore(&mut self, quantum: u64, executed: &[u64], events: Vec<Vec<DeviceEvent>>) {
        self.quantum = quantum;
        for ((device, &cycles), queue) in self.devices.iter_mut().zip(executed).zip(events) {
            device.executed = cycles;
            device.events = queue.into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RefreshRate, Scheduler, SchedulerConfig, Watchdog, WatchdogConfig};
    use crate::device::DeviceEvent;

    fn board() -> SchedulerConfig {
        SchedulerConfig {
            refresh: RefreshRate::centihertz(5924),
            quanta_per_frame: 10,
        }
    }

    #[test]
    fn owed_cycles_follow_clock_ratio_without_drift() {
        let config = board();
        // 12 MHz at 59.24 Hz owes 202_565 whole cycles per frame.
        assert_eq!(config.cycles_owed(12_000_000, 10), 202_565);
        // One second of frames lands within one cycle of the clock.
        let quanta = 5924 * 10 / 100;
        let owed = config.cycles_owed(12_000_000, quanta);
        assert!(owed.abs_diff(12_000_000 * 5920 / 5924) <= 1);
        assert_eq!(config.cycles_owed(12_000_000, 0), 0);
    }

    #[test]
    fn overshoot_is_repaid_next_quantum() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default(), &[6000]);
        assert_eq!(scheduler.budget(0), 10);
        scheduler.charge(0, 14, 10);
        scheduler.end_quantum();
        assert_eq!(scheduler.budget(0), 6);
        scheduler.charge(0, 0, 6);
        scheduler.end_quantum();
        assert_eq!(scheduler.executed(0), 20);
        assert_eq!(scheduler.budget(0), 10);
    }

    #[test]
    fn periodic_interrupt_is_posted_once_per_frame() {
        let mut scheduler = Scheduler::new(board(), &[12_000_000]);
        scheduler.add_periodic(0, 6, 9);
        let mut posted = 0;
        for _ in 0..30 {
            scheduler.begin_quantum();
            posted += scheduler.take_events(0).len();
            scheduler.end_quantum();
        }
        assert_eq!(posted, 3);
        assert_eq!(scheduler.frame(), 3);
    }

    #[test]
    fn events_are_queued_in_order_and_cleared() {
        let mut scheduler = Scheduler::new(board(), &[1, 2]);
        scheduler.post(1, DeviceEvent::Line { line: 0, state: true });
        scheduler.post(1, DeviceEvent::Interrupt { line: 6 });
        assert_eq!(scheduler.pending(1).len(), 2);
        assert!(scheduler.pending(0).is_empty());
        scheduler.clear_events();
        assert!(scheduler.take_events(1).is_empty());
    }

    #[test]
    fn watchdog_fires_once_per_interval_and_kicks_postpone_it() {
        let mut watchdog = Watchdog::new(WatchdogConfig { interval_frames: 2 }, 10).expect("valid");
        let fired: Vec<bool> = (0..20).map(|_| watchdog.tick()).collect();
        assert_eq!(fired.iter().filter(|&&fired| fired).count(), 1);
        assert!(fired[19]);

        for _ in 0..100 {
            assert!(!watchdog.tick());
            watchdog.service();
        }
        assert_eq!(watchdog.expirations(), 1);
        assert!(Watchdog::new(WatchdogConfig { interval_frames: 0 }, 10).is_err());
    }
}
