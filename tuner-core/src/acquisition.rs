//! # Acquisition Channel
//!
//! Owns the sample buffer and the readiness flag that hands a finished block
//! from the sampling peripheral to the processing loop.
//!
//! ## Handshake
//! 1. [`AcquisitionChannel::start_acquisition`] clears the flag and asks the
//!    peripheral to fill the buffer at its own clocked cadence. It returns
//!    immediately.
//! 2. The peripheral calls [`CompletionNotifier::notify`] from its own
//!    context once the whole block is written. That call sets the flag and
//!    raises the wake event, nothing else.
//! 3. [`AcquisitionChannel::await_completion`] parks the caller in a
//!    low-power wait and re-enters it after every wake until the flag is set
//!    or the deadline passes. A faulted transfer also sets the flag, with the
//!    fault code recorded first.
//!
//! ## State machine
//! `Idle -> Armed -> Ready -> Armed -> ...`. A timeout stops the peripheral and
//! goes back to `Idle`. Starting a transfer while `Armed` is a programming error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::TransferErrorPolicy;
use crate::error::{Result, TunerError};

/// The block the peripheral writes into. Exactly one writer (the transfer)
/// and one reader (the cycle, after the wait), so the lock is never contended.
pub type SampleBuffer = Arc<spin::Mutex<Box<[u16]>>>;

/// Readiness and fault flags shared between the cycle and the peripheral.
#[derive(Debug, Default)]
pub struct ReadinessFlag {
    ready: AtomicBool,
    faulted: AtomicBool,
    fault_code: AtomicU32,
}

impl ReadinessFlag {
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            fault_code: AtomicU32::new(0),
        }
    }

    /// Marks the block as complete. Buffer writes made before this call are
    /// visible to whoever observes [`ReadinessFlag::is_set`] returning true.
    pub fn set(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.faulted.store(false, Ordering::Relaxed);
        self.ready.store(false, Ordering::Release);
    }

    fn raise_fault(&self, code: u32) {
        self.fault_code.store(code, Ordering::Relaxed);
        self.faulted.store(true, Ordering::Release);
    }

    fn fault(&self) -> Option<u32> {
        if self.faulted.load(Ordering::Acquire) {
            Some(self.fault_code.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

/// Handed to the peripheral for one transfer. Cheap to clone, never blocks
/// and never allocates, so it is safe to call from an interrupt-like context.
#[derive(Debug, Clone)]
pub struct CompletionNotifier {
    flag: Arc<ReadinessFlag>,
    waiter: Thread,
}

impl CompletionNotifier {
    /// The transfer reached its full length.
    pub fn notify(&self) {
        self.flag.set();
        self.waiter.unpark();
    }

    /// The peripheral reported a transfer fault. The code is recorded before
    /// the readiness flag is set, so a waiter that sees the flag also sees the
    /// fault.
    pub fn notify_error(&self, code: u32) {
        self.flag.raise_fault(code);
        self.flag.set();
        self.waiter.unpark();
    }
}

/// A hardware-driven sampler that fills a buffer without intervention from
/// the processing loop.
pub trait SamplingPeripheral {
    /// Begins a transfer of `length` samples into `buffer` and returns
    /// immediately. The notifier must be called exactly once when the
    /// transfer completes (or faults).
    fn start(
        &mut self,
        buffer: SampleBuffer,
        length: usize,
        notifier: CompletionNotifier,
    ) -> Result<()>;

    /// Aborts the transfer in flight. After this returns the peripheral
    /// must neither write the buffer nor call the notifier of that transfer.
    fn stop(&mut self);
}

/// Power-mode primitives used while waiting for a transfer.
pub trait PowerControl {
    /// Stops the periodic tick so it does not wake the core on every period.
    fn suspend_tick(&mut self) {}

    /// Enters the low-power state until any wake event arrives or `limit`
    /// elapses. Spurious returns are allowed.
    fn sleep_until_woken(&mut self, limit: Option<Duration>);

    fn resume_tick(&mut self) {}
}

/// Host stand-in for "sleep until interrupt": parks the current thread until
/// the notifier unparks it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPark;

impl PowerControl for ThreadPark {
    fn sleep_until_woken(&mut self, limit: Option<Duration>) {
        match limit {
            Some(limit) => thread::park_timeout(limit),
            None => thread::park(),
        }
    }
}

/// How long [`AcquisitionChannel::await_completion`] may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    Forever,
    Bounded(Duration),
}

/// Result of one acquisition wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "code")]
pub enum WaitOutcome {
    /// The block is complete.
    Ready,
    /// The peripheral reported a fault; the buffer holds stale or zeroed data.
    Faulted(u32),
    /// No completion arrived in time; there is no block this cycle.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Armed,
    Ready,
}

/// One peripheral, one buffer, one readiness flag.
pub struct AcquisitionChannel<P, W> {
    peripheral: P,
    power: W,
    buffer: SampleBuffer,
    capacity: usize,
    flag: Arc<ReadinessFlag>,
    state: ChannelState,
    wait: WaitPolicy,
    on_error: TransferErrorPolicy,
}

impl<P: SamplingPeripheral, W: PowerControl> AcquisitionChannel<P, W> {
    /// Allocates a zeroed buffer of `capacity` samples.
    pub fn new(peripheral: P, power: W, capacity: usize) -> Self {
        Self {
            peripheral,
            power,
            buffer: Arc::new(spin::Mutex::new(vec![0u16; capacity].into_boxed_slice())),
            capacity,
            flag: Arc::new(ReadinessFlag::new()),
            state: ChannelState::Idle,
            wait: WaitPolicy::Forever,
            on_error: TransferErrorPolicy::default(),
        }
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_error_policy(mut self, on_error: TransferErrorPolicy) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn flag(&self) -> &ReadinessFlag {
        &self.flag
    }

    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    pub fn power(&self) -> &W {
        &self.power
    }

    /// Arms a `length`-sample transfer and returns without waiting.
    ///
    /// # Arguments
    /// * `length` - Number of samples to transfer, must equal [`Self::capacity`]
    ///
    /// # Returns
    /// * `Ok(())` once the peripheral is running. A start the peripheral
    ///   refuses with [`TunerError::Acquisition`] is reported as a fault to
    ///   the next wait instead.
    /// * `Err(TunerError::Configuration)` on a length mismatch
    ///
    /// # Panics
    /// If a transfer is already in flight.
    pub fn start_acquisition(&mut self, length: usize) -> Result<()> {
        assert!(
            self.state != ChannelState::Armed,
            "start_acquisition called while a transfer is in flight"
        );
        if length != self.capacity {
            return Err(TunerError::Configuration(format!(
                "transfer length {} does not match buffer capacity {}",
                length, self.capacity
            )));
        }

        self.flag.clear();
        self.state = ChannelState::Armed;

        let notifier = CompletionNotifier {
            flag: Arc::clone(&self.flag),
            waiter: thread::current(),
        };
        match self
            .peripheral
            .start(Arc::clone(&self.buffer), length, notifier.clone())
        {
            Ok(()) => Ok(()),
            // A refused start is a transfer fault like any other.
            Err(TunerError::Acquisition { code }) => {
                notifier.notify_error(code);
                Ok(())
            }
            Err(e) => {
                self.state = ChannelState::Idle;
                Err(e)
            }
        }
    }

    /// Waits in the low-power state until the armed transfer completes.
    ///
    /// Every wake re-checks the readiness flag and goes back to sleep when
    /// it is still clear.
    ///
    /// # Returns
    /// * `WaitOutcome::Ready` - The block is complete
    /// * `WaitOutcome::Faulted(code)` - The transfer faulted; the block holds
    ///   stale or zeroed data depending on the error policy
    /// * `WaitOutcome::Timeout` - The bounded wait expired; the peripheral was
    ///   stopped and there is no block
    ///
    /// # Panics
    /// If no transfer is armed.
    pub fn await_completion(&mut self) -> WaitOutcome {
        assert!(
            self.state == ChannelState::Armed,
            "await_completion called without an armed transfer"
        );

        let deadline = match self.wait {
            WaitPolicy::Forever => None,
            WaitPolicy::Bounded(limit) => Some(Instant::now() + limit),
        };

        self.power.suspend_tick();
        let outcome = loop {
            if self.flag.is_set() {
                match self.flag.fault() {
                    None => break WaitOutcome::Ready,
                    Some(code) if self.on_error != TransferErrorPolicy::KeepWaiting => {
                        break WaitOutcome::Faulted(code);
                    }
                    // Legacy behaviour: a fault is not a completion.
                    Some(_) => {}
                }
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break WaitOutcome::Timeout;
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            self.power.sleep_until_woken(remaining);
        };
        self.power.resume_tick();

        match outcome {
            WaitOutcome::Ready => {
                log::debug!("Audio data is actual");
                self.state = ChannelState::Ready;
            }
            WaitOutcome::Faulted(code) => {
                log::warn!("Transfer fault 0x{:X}, proceeding with {:?}", code, self.on_error);
                self.peripheral.stop();
                if self.on_error == TransferErrorPolicy::ZeroFill {
                    self.buffer.lock().fill(0);
                }
                self.state = ChannelState::Ready;
            }
            WaitOutcome::Timeout => {
                log::warn!("No transfer completion within {:?}", self.wait);
                self.peripheral.stop();
                self.state = ChannelState::Idle;
            }
        }
        outcome
    }

    /// Runs `f` over the completed block. `None` unless the last wait
    /// produced data.
    pub fn with_samples<R>(&self, f: impl FnOnce(&[u16]) -> R) -> Option<R> {
        if self.state != ChannelState::Ready {
            return None;
        }
        let samples = self.buffer.lock();
        Some(f(&samples))
    }
}
