//! Scripted device channel for exercising the coordinator without hardware.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use powerwatch_common::channel;
use powerwatch_common::channel::{ChannelError, DeviceChannel};

/// Everything the channel was asked to do, in order.
#[derive(Debug, Default)]
pub struct Journal {
    calls: Mutex<Vec<&'static str>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    drops: AtomicUsize,
}

impl Journal {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }

    fn enter(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Holds the next voltage read until released.
#[derive(Debug)]
pub struct Gate {
    pub entered: Sender<()>,
    pub release: Receiver<()>,
}

/// Device channel answering reads from per-quantity queues.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    journal: Arc<Journal>,
    configure_result: Option<ChannelError>,
    voltages: VecDeque<channel::Result<f64>>,
    currents: VecDeque<channel::Result<f64>>,
    powers: VecDeque<channel::Result<f64>>,
    gates: VecDeque<Option<Gate>>,
}

impl ScriptedChannel {
    pub fn new() -> (ScriptedChannel, Arc<Journal>) {
        let channel = ScriptedChannel::default();
        let journal = Arc::clone(&channel.journal);
        (channel, journal)
    }

    /// Script one successful cycle.
    pub fn cycle(mut self, volts: f64, milliamps: f64, milliwatts: f64) -> Self {
        self.voltages.push_back(Ok(volts));
        self.currents.push_back(Ok(milliamps));
        self.powers.push_back(Ok(milliwatts));
        self.gates.push_back(None);
        self
    }

    /// Script a cycle whose current read fails.
    pub fn failing_current(mut self, volts: f64, e: ChannelError) -> Self {
        self.voltages.push_back(Ok(volts));
        self.currents.push_back(Err(e));
        self.gates.push_back(None);
        self
    }

    /// Script a successful cycle that blocks in its voltage read.
    pub fn gated_cycle(mut self, gate: Gate, volts: f64, milliamps: f64, milliwatts: f64) -> Self {
        self = self.cycle(volts, milliamps, milliwatts);
        if let Some(last) = self.gates.back_mut() {
            *last = Some(gate);
        }
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.configure_result = Some(ChannelError::Connection("no ACK".to_string()));
        self
    }

    fn next(queue: &mut VecDeque<channel::Result<f64>>) -> channel::Result<f64> {
        queue.pop_front()
            .unwrap_or_else(|| Err(ChannelError::Communication("script exhausted".to_string())))
    }
}

impl DeviceChannel for ScriptedChannel {
    fn configure(&mut self) -> channel::Result<()> {
        self.journal.enter("configure");
        self.journal.leave();
        match self.configure_result.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn read_voltage(&mut self) -> channel::Result<f64> {
        self.journal.enter("voltage");
        if let Some(Some(gate)) = self.gates.pop_front() {
            gate.entered.send(()).unwrap();
            gate.release.recv().unwrap();
        }
        let result = Self::next(&mut self.voltages);
        self.journal.leave();
        result
    }

    fn read_current_milliamps(&mut self) -> channel::Result<f64> {
        self.journal.enter("current");
        let result = Self::next(&mut self.currents);
        self.journal.leave();
        result
    }

    fn read_power_milliwatts(&mut self) -> channel::Result<f64> {
        self.journal.enter("power");
        let result = Self::next(&mut self.powers);
        self.journal.leave();
        result
    }
}

impl Drop for ScriptedChannel {
    fn drop(&mut self) {
        self.journal.drops.fetch_add(1, Ordering::SeqCst);
    }
}
