//! Scripted backend and manual clock for unit tests.

use crate::backend::{Backend, Session};
use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::error::{ConnectError, TrackerError};
use crate::types::{
    BackendKind, Capabilities, DeviceClass, DeviceEntry, DeviceHandle, Liveness, RawPose,
    RawRotation, RawVelocity, SampleResult,
};
use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Clock advanced by hand.
#[derive(Clone, Default)]
pub(crate) struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug)]
pub(crate) struct MockState {
    pub runtime_up: bool,
    pub devices: Vec<DeviceEntry>,
    pub liveness: Liveness,
    /// Played back one per `sample()`; `fallback` once empty.
    pub samples: VecDeque<SampleResult>,
    pub fallback: SampleResult,
    pub connect_attempts: usize,
    pub attempt_times: Vec<Duration>,
    pub connects: usize,
    pub closes: usize,
    pub open_sessions: usize,
    pub close_delay: Duration,
    pub samples_taken: usize,
    pub sampled_while_not_alive: usize,
}

/// Shared handle to the scripted runtime; clones observe the same state.
#[derive(Clone)]
pub(crate) struct MockRuntime {
    state: Arc<Mutex<MockState>>,
    clock: ManualClock,
    closed_tx: Sender<usize>,
    closed_rx: Receiver<usize>,
}

impl MockRuntime {
    /// Runtime up, an HMD at index 0 and a tracker at index 1.
    pub fn new() -> Self {
        let (closed_tx, closed_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(Mutex::new(MockState {
                runtime_up: true,
                devices: vec![
                    DeviceEntry {
                        index: 0,
                        connected: true,
                        class: DeviceClass::HeadMounted,
                        name: Some("HMD".into()),
                    },
                    tracker_entry(1, "LHR-TRACKER1"),
                ],
                liveness: Liveness::Alive,
                samples: VecDeque::new(),
                fallback: SampleResult::Invalid,
                connect_attempts: 0,
                attempt_times: Vec::new(),
                connects: 0,
                closes: 0,
                open_sessions: 0,
                close_delay: Duration::ZERO,
                samples_taken: 0,
                sampled_while_not_alive: 0,
            })),
            clock: ManualClock::default(),
            closed_tx,
            closed_rx,
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    /// Receives one message per completed session close.
    pub fn closed(&self) -> Receiver<usize> {
        self.closed_rx.clone()
    }

    pub fn push(&self, samples: impl IntoIterator<Item = SampleResult>) {
        self.with(|s| s.samples.extend(samples));
    }

    pub fn backend(&self, capabilities: Capabilities) -> Box<dyn Backend> {
        Box::new(MockBackend {
            runtime: self.clone(),
            capabilities,
        })
    }

    pub fn session(&self) -> Box<dyn Session> {
        self.with(|s| {
            s.connects += 1;
            s.open_sessions += 1;
        });
        Box::new(MockSession {
            runtime: self.clone(),
            last_liveness: Liveness::Alive,
        })
    }
}

pub(crate) fn tracker_entry(index: usize, name: &str) -> DeviceEntry {
    DeviceEntry {
        index,
        connected: true,
        class: DeviceClass::GenericTracker,
        name: Some(name.into()),
    }
}

/// Valid lighthouse-style sample at identity rotation.
pub(crate) fn valid_at(position: [f64; 3]) -> SampleResult {
    SampleResult::Valid(
        RawPose {
            position,
            rotation: RawRotation::Quaternion([1.0, 0.0, 0.0, 0.0]),
        },
        RawVelocity {
            linear: [0.1, 0.2, 0.3],
            angular: [0.0, 0.0, 1.0],
        },
    )
}

struct MockBackend {
    runtime: MockRuntime,
    capabilities: Capabilities,
}

impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Lighthouse
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn connect(&mut self, _config: &TrackerConfig) -> Result<Box<dyn Session>, ConnectError> {
        let now = self.runtime.clock.now();
        let up = self.runtime.with(|s| {
            s.connect_attempts += 1;
            s.attempt_times.push(now);
            s.runtime_up
        });
        if !up {
            return Err(TrackerError::RuntimeNotRunning);
        }
        Ok(self.runtime.session())
    }
}

struct MockSession {
    runtime: MockRuntime,
    last_liveness: Liveness,
}

impl Session for MockSession {
    fn kind(&self) -> BackendKind {
        BackendKind::Lighthouse
    }

    fn poll_liveness(&mut self) -> Liveness {
        self.last_liveness = self.runtime.with(|s| s.liveness);
        self.last_liveness
    }

    fn devices(&mut self) -> Vec<DeviceEntry> {
        self.runtime.with(|s| s.devices.clone())
    }

    fn sample(&mut self, _device: &DeviceHandle) -> SampleResult {
        let not_alive = self.last_liveness != Liveness::Alive;
        self.runtime.with(|s| {
            s.samples_taken += 1;
            if not_alive {
                s.sampled_while_not_alive += 1;
            }
            s.samples.pop_front().unwrap_or(s.fallback)
        })
    }

    fn close(self: Box<Self>) {
        let delay = self.runtime.with(|s| s.close_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let closes = self.runtime.with(|s| {
            s.closes += 1;
            s.open_sessions -= 1;
            s.closes
        });
        let _ = self.runtime.closed_tx.send(closes);
    }
}
