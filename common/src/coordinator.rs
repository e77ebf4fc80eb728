/*! Polling coordinator.

The coordinator is the single authority over when the device is read and the single source of truth for the latest measurement.
It moves its [`DeviceChannel`] onto a dedicated worker thread at construction; nothing else can reach the channel afterwards.
Refresh cycles run only on that worker, one at a time, and publish their outcome into a shared [`RefreshState`] that any number of readers can look at without waiting on the device.

Two things cause a refresh cycle:
- [`PollingCoordinator::initialize_and_refresh_once`], which runs one cycle synchronously and reports its failure to the caller, and
- ticks from the coordinator's [`Trigger`], which only start flowing once that first refresh has succeeded.

A tick that shows up while another cycle is running is dropped rather than queued.
A tick that finds a first-refresh request waiting is folded into it.
*/

use std::collections::VecDeque;
use std::io;
use std::sync::mpsc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;

use crate::channel;
use crate::channel::DeviceChannel;
use crate::config::DeviceConfig;
use crate::snapshot::{RefreshError, RefreshState, Snapshot};

/// Result type for refreshes requested through the coordinator.
pub type Result<T> = std::result::Result<T, RefreshError>;

/// Refresh period used when none is given.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Conversion from the device's milli-units to base units.
const MILLI: f64 = 1000.0;

/// Source of periodic refresh ticks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Trigger {
    /// Tick on a fixed period driven by the coordinator's own timer.
    Every(Duration),
    /// Tick only when a [`ManualTicker`] says so.
    Manual,
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger::Every(DEFAULT_INTERVAL)
    }
}

/// What happened to a tick.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TickOutcome {
    /// The tick ran a refresh cycle.
    Ran,
    /// A waiting first-refresh request ran in place of the tick.
    Coalesced,
    /// The tick arrived before start-up or while a cycle was in flight.
    Dropped,
}

#[derive(Debug)]
enum Command {
    Refresh(SyncSender<Result<Arc<Snapshot>>>),
    Tick(Option<SyncSender<TickOutcome>>),
    Shutdown,
}

#[derive(Debug, Default)]
struct Shared {
    state: RwLock<RefreshState>,
}

impl Shared {
    fn state(&self) -> RefreshState {
        self.state.read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish<F>(&self, next: F)
    where
        F: FnOnce(&RefreshState) -> RefreshState,
    {
        let mut state = self.state.write()
            .unwrap_or_else(PoisonError::into_inner);
        *state = next(&state);
    }
}

/// Read-only access to a coordinator's cached measurements.
///
/// Views are cheap to clone and never touch the device.
#[derive(Clone, Debug)]
pub struct SnapshotView {
    shared: Arc<Shared>,
}

impl SnapshotView {
    /// Latest snapshot; `None` until a refresh has succeeded.
    pub fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.state().snapshot()
    }

    /// Failure of the latest refresh, cleared by the next successful one.
    pub fn last_error(&self) -> Option<RefreshError> {
        self.shared.state().error()
    }

    /// Snapshot and error of the latest refresh, read together.
    pub fn state(&self) -> RefreshState {
        self.shared.state()
    }
}

/// Issues ticks to a coordinator built with [`Trigger::Manual`].
#[derive(Clone, Debug)]
pub struct ManualTicker {
    commands: Sender<Command>,
}

impl ManualTicker {
    /// Request a tick without waiting for it.
    pub fn tick(&self) {
        let _ = self.commands.send(Command::Tick(None));
    }

    /// Request a tick and wait until the worker has dealt with it.
    pub fn tick_and_wait(&self) -> TickOutcome {
        let (ack_schannel, ack_rchannel) = mpsc::sync_channel(1);
        if self.commands.send(Command::Tick(Some(ack_schannel))).is_err() {
            return TickOutcome::Dropped;
        }

        ack_rchannel.recv().unwrap_or(TickOutcome::Dropped)
    }
}

/// Periodic ticker thread; idle until started, exits when its handle is dropped.
#[derive(Debug)]
struct IntervalTicker {
    start: Sender<()>,
    thread: JoinHandle<()>,
}

impl IntervalTicker {
    fn spawn(interval: Duration, commands: Sender<Command>) -> io::Result<IntervalTicker> {
        let (start_schannel, start_rchannel) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("powerwatch-ticker".to_string())
            .spawn(move || {
                // Nothing to do until the first refresh has succeeded.
                if start_rchannel.recv().is_err() {
                    return;
                }
                log::debug!("ticker: ticking every {:?}", interval);

                loop {
                    match start_rchannel.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if commands.send(Command::Tick(None)).is_err() {
                                break;
                            }
                        },
                        Ok(()) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                log::debug!("ticker: exiting");
            })?;

        Ok(IntervalTicker {
            start: start_schannel,
            thread,
        })
    }

    fn start(&self) {
        let _ = self.start.send(());
    }

    fn stop(self) {
        let IntervalTicker { start, thread } = self;
        drop(start);
        if thread.join().is_err() {
            log::warn!("ticker: thread panicked");
        }
    }
}

/// Owner of the device channel; runs on the worker thread.
struct Worker<C> {
    channel: C,
    configured: bool,
    started: bool,
    shared: Arc<Shared>,
}

impl<C: DeviceChannel> Worker<C> {
    fn run(mut self, commands: Receiver<Command>) {
        log::debug!("poller: started");

        let mut backlog: VecDeque<Command> = VecDeque::new();
        loop {
            let command = match backlog.pop_front() {
                Some(command) => command,
                None => match commands.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };

            match command {
                Command::Shutdown => break,
                Command::Refresh(reply) => {
                    let result = self.first_refresh();
                    self.drain(&commands, &mut backlog);
                    let _ = reply.send(result);
                },
                Command::Tick(ack) => {
                    // Anything already waiting goes ahead of this tick.
                    self.drain(&commands, &mut backlog);
                    if let Some(Command::Refresh(_)) = backlog.front() {
                        log::debug!("poller: tick folded into waiting refresh");
                        respond(ack, TickOutcome::Coalesced);
                        continue;
                    }
                    if !self.started {
                        log::debug!("poller: tick before first refresh dropped");
                        respond(ack, TickOutcome::Dropped);
                        continue;
                    }
                    if !backlog.is_empty() {
                        respond(ack, TickOutcome::Dropped);
                        continue;
                    }

                    self.tick();
                    self.drain(&commands, &mut backlog);
                    respond(ack, TickOutcome::Ran);
                },
            }
        }

        log::debug!("poller: releasing device channel");
    }

    /// Move waiting commands into the backlog, dropping any ticks.
    ///
    /// After a cycle this runs before the requester hears back, so a tick
    /// sent after that reply is never swallowed. Ticks queued alongside the
    /// one being handled are dropped too; only one of them could ever run.
    fn drain(&self, commands: &Receiver<Command>, backlog: &mut VecDeque<Command>) {
        loop {
            match commands.try_recv() {
                Ok(Command::Tick(ack)) => {
                    log::debug!("poller: overlapping tick dropped");
                    respond(ack, TickOutcome::Dropped);
                },
                Ok(command) => backlog.push_back(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn first_refresh(&mut self) -> Result<Arc<Snapshot>> {
        match self.read_cycle() {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                let published = Arc::clone(&snapshot);
                self.shared.publish(|_prev| RefreshState::Ready(published));
                self.started = true;
                log::info!("poller: initial refresh: {}", snapshot);
                Ok(snapshot)
            },
            Err(e) => {
                let e = RefreshError::at_startup(e);
                log::error!("poller: initial refresh failed: {}", e);
                self.shared.publish(|prev| prev.failed(e.clone()));
                Err(e)
            },
        }
    }

    fn tick(&mut self) {
        match self.read_cycle() {
            Ok(snapshot) => {
                log::debug!("poller: refreshed: {}", snapshot);
                self.shared.publish(|_prev| RefreshState::succeeded(snapshot));
            },
            Err(e) => {
                let e = RefreshError::classify(e);
                log::warn!("poller: refresh failed: {}", e);
                self.shared.publish(|prev| prev.failed(e));
            },
        }
    }

    /// Configure the channel if needed, then read one complete triple.
    ///
    /// Stops at the first failed read; the quantities are only meaningful together.
    fn read_cycle(&mut self) -> channel::Result<Snapshot> {
        if !self.configured {
            self.channel.configure()?;
            self.configured = true;
            log::debug!("poller: device configured");
        }

        let voltage = self.channel.read_voltage()?;
        let current = self.channel.read_current_milliamps()? / MILLI;
        let power = self.channel.read_power_milliwatts()? / MILLI;

        Ok(Snapshot::new(voltage, current, power, Utc::now()))
    }
}

fn respond(ack: Option<SyncSender<TickOutcome>>, outcome: TickOutcome) {
    if let Some(ack) = ack {
        let _ = ack.send(outcome);
    }
}

/** Periodically refreshes measurements from one device on behalf of many readers.

# Examples
```ignore
let channel = Ina219::new(config);
let coordinator = PollingCoordinator::new(config, channel, Trigger::default())?;
let snapshot = coordinator.initialize_and_refresh_once()?;
println!("{}", snapshot);
```
*/
#[derive(Debug)]
pub struct PollingCoordinator {
    config: DeviceConfig,
    trigger: Trigger,
    shared: Arc<Shared>,
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    ticker: Mutex<Option<IntervalTicker>>,
}

impl PollingCoordinator {
    /// Create a coordinator that takes sole ownership of `channel`.
    ///
    /// The device is not touched until the first refresh is requested.
    pub fn new<C>(config: DeviceConfig, channel: C, trigger: Trigger) -> io::Result<PollingCoordinator>
    where
        C: DeviceChannel + 'static,
    {
        let shared = Arc::new(Shared::default());
        let (commands, command_rchannel) = mpsc::channel();

        let worker = Worker {
            channel,
            configured: false,
            started: false,
            shared: Arc::clone(&shared),
        };
        let worker = thread::Builder::new()
            .name("powerwatch-poller".to_string())
            .spawn(move || worker.run(command_rchannel))?;

        let ticker = match trigger {
            Trigger::Every(interval) => Some(IntervalTicker::spawn(interval, commands.clone())?),
            Trigger::Manual => None,
        };

        Ok(PollingCoordinator {
            config,
            trigger,
            shared,
            commands,
            worker: Some(worker),
            ticker: Mutex::new(ticker),
        })
    }

    /// Configure the device if necessary and refresh once, synchronously.
    ///
    /// Any failure is reported as [`RefreshError::Connection`] so setup can be abandoned.
    /// Periodic refreshes start only after this has succeeded.
    pub fn initialize_and_refresh_once(&self) -> Result<Arc<Snapshot>> {
        let (reply_schannel, reply_rchannel) = mpsc::sync_channel(1);
        self.commands.send(Command::Refresh(reply_schannel))
            .map_err(|_e| RefreshError::Connection("poller is not running".to_string()))?;
        let snapshot = reply_rchannel.recv()
            .map_err(|_e| RefreshError::Connection("poller stopped during refresh".to_string()))??;

        if let Some(ticker) = self.ticker.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            ticker.start();
        }

        Ok(snapshot)
    }

    /// Latest snapshot; `None` until a refresh has succeeded.
    pub fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.state().snapshot()
    }

    /// Failure of the latest refresh, cleared by the next successful one.
    pub fn last_error(&self) -> Option<RefreshError> {
        self.shared.state().error()
    }

    /// Snapshot and error of the latest refresh, read together.
    pub fn state(&self) -> RefreshState {
        self.shared.state()
    }

    /// Read-only handle for observers.
    pub fn view(&self) -> SnapshotView {
        SnapshotView {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Ticker for a coordinator built with [`Trigger::Manual`].
    pub fn manual_ticker(&self) -> Option<ManualTicker> {
        match self.trigger {
            Trigger::Manual => Some(ManualTicker {
                commands: self.commands.clone(),
            }),
            Trigger::Every(_) => None,
        }
    }

    /// Device the coordinator was built for.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Refresh period, if the coordinator keeps its own time.
    pub fn interval(&self) -> Option<Duration> {
        match self.trigger {
            Trigger::Every(interval) => Some(interval),
            Trigger::Manual => None,
        }
    }

    /// Stop refreshing and wait for the worker to release the device.
    ///
    /// A cycle already in flight is allowed to finish.
    pub fn shutdown(mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("poller: worker thread panicked");
            }
        }
    }

    fn stop(&mut self) {
        let ticker = self.ticker.get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(ticker) = ticker {
            ticker.stop();
        }
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl Drop for PollingCoordinator {
    fn drop(&mut self) {
        // The worker is not joined here; a stalled read must not hang the owner.
        if self.worker.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::channel::ChannelError;

    #[derive(Debug, Default)]
    struct Counters {
        configures: AtomicUsize,
        reads: AtomicUsize,
        drops: AtomicUsize,
    }

    /// Channel returning fixed readings, optionally failing configuration.
    #[derive(Debug)]
    struct FixedChannel {
        counters: Arc<Counters>,
        reachable: bool,
    }

    impl DeviceChannel for FixedChannel {
        fn configure(&mut self) -> channel::Result<()> {
            self.counters.configures.fetch_add(1, Ordering::SeqCst);
            if self.reachable {
                Ok(())
            } else {
                Err(ChannelError::Connection("no ACK from 0x40".to_string()))
            }
        }

        fn read_voltage(&mut self) -> channel::Result<f64> {
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            Ok(5.0)
        }

        fn read_current_milliamps(&mut self) -> channel::Result<f64> {
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            Ok(250.0)
        }

        fn read_power_milliwatts(&mut self) -> channel::Result<f64> {
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            Ok(1250.0)
        }
    }

    impl Drop for FixedChannel {
        fn drop(&mut self) {
            self.counters.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manual(reachable: bool) -> (PollingCoordinator, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let channel = FixedChannel {
            counters: Arc::clone(&counters),
            reachable,
        };
        let coordinator = PollingCoordinator::new(DeviceConfig::default(), channel, Trigger::Manual)
            .unwrap();

        (coordinator, counters)
    }

    #[test]
    fn nothing_is_read_at_construction() {
        let (coordinator, counters) = manual(true);
        assert_eq!(coordinator.current_snapshot(), None);
        assert_eq!(coordinator.state(), RefreshState::Uninitialized);
        coordinator.shutdown();
        assert_eq!(counters.configures.load(Ordering::SeqCst), 0);
        assert_eq!(counters.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn initial_refresh_converts_units() {
        let (coordinator, _counters) = manual(true);
        let snapshot = coordinator.initialize_and_refresh_once().unwrap();
        assert_eq!(snapshot.voltage(), 5.0);
        assert_eq!(snapshot.current(), 0.25);
        assert_eq!(snapshot.power(), 1.25);
        assert_eq!(coordinator.current_snapshot(), Some(snapshot));
        assert_eq!(coordinator.last_error(), None);
    }

    #[test]
    fn unreachable_device_fails_setup() {
        let (coordinator, counters) = manual(false);
        let result = coordinator.initialize_and_refresh_once();
        match result {
            Err(RefreshError::Connection(_)) => {},
            other => panic!("expected a connection error, got {:?}", other),
        }
        assert_eq!(coordinator.current_snapshot(), None);
        assert!(matches!(coordinator.last_error(), Some(RefreshError::Connection(_))));
        assert_eq!(counters.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ticks_before_start_are_dropped() {
        let (coordinator, counters) = manual(true);
        let ticker = coordinator.manual_ticker().unwrap();
        assert_eq!(ticker.tick_and_wait(), TickOutcome::Dropped);
        assert_eq!(counters.reads.load(Ordering::SeqCst), 0);

        coordinator.initialize_and_refresh_once().unwrap();
        assert_eq!(ticker.tick_and_wait(), TickOutcome::Ran);
        assert_eq!(counters.reads.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn failed_setup_keeps_timer_stopped() {
        let (coordinator, counters) = manual(false);
        let ticker = coordinator.manual_ticker().unwrap();
        assert!(coordinator.initialize_and_refresh_once().is_err());
        assert_eq!(ticker.tick_and_wait(), TickOutcome::Dropped);
        assert_eq!(counters.configures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn interval_coordinator_has_no_manual_ticker() {
        let counters = Arc::new(Counters::default());
        let channel = FixedChannel { counters: Arc::clone(&counters), reachable: true };
        let coordinator = PollingCoordinator::new(DeviceConfig::default(),
                                                  channel,
                                                  Trigger::Every(Duration::from_secs(3600)))
            .unwrap();
        assert!(coordinator.manual_ticker().is_none());
        assert_eq!(coordinator.interval(), Some(Duration::from_secs(3600)));
        coordinator.shutdown();
        assert_eq!(counters.drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn interval_ticks_refresh_after_start() {
        let counters = Arc::new(Counters::default());
        let channel = FixedChannel { counters: Arc::clone(&counters), reachable: true };
        let coordinator = PollingCoordinator::new(DeviceConfig::default(),
                                                  channel,
                                                  Trigger::Every(Duration::from_millis(5)))
            .unwrap();

        thread::sleep(Duration::from_millis(30));
        assert_eq!(counters.reads.load(Ordering::SeqCst), 0);

        coordinator.initialize_and_refresh_once().unwrap();
        let mut waited = Duration::from_millis(0);
        while counters.reads.load(Ordering::SeqCst) < 6 && waited < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
            waited += Duration::from_millis(5);
        }
        assert!(counters.reads.load(Ordering::SeqCst) >= 6);
        assert_eq!(counters.configures.load(Ordering::SeqCst), 1);

        coordinator.shutdown();
        assert_eq!(counters.drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_releases_channel_once() {
        let (coordinator, counters) = manual(true);
        coordinator.initialize_and_refresh_once().unwrap();
        drop(coordinator);

        let mut waited = Duration::from_millis(0);
        while counters.drops.load(Ordering::SeqCst) == 0 && waited < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
            waited += Duration::from_millis(5);
        }
        assert_eq!(counters.drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn waiting_refresh_absorbs_pending_tick() {
        for &started in &[false, true] {
            let counters = Arc::new(Counters::default());
            let shared = Arc::new(Shared::default());
            let worker = Worker {
                channel: FixedChannel { counters: Arc::clone(&counters), reachable: true },
                configured: started,
                started,
                shared: Arc::clone(&shared),
            };

            // Queue everything before the worker looks at it.
            let (commands, command_rchannel) = mpsc::channel();
            let (ack_schannel, ack_rchannel) = mpsc::sync_channel(1);
            let (reply_schannel, reply_rchannel) = mpsc::sync_channel(1);
            commands.send(Command::Tick(Some(ack_schannel))).unwrap();
            commands.send(Command::Refresh(reply_schannel)).unwrap();
            commands.send(Command::Shutdown).unwrap();
            worker.run(command_rchannel);

            assert_eq!(ack_rchannel.recv().unwrap(), TickOutcome::Coalesced);
            assert!(reply_rchannel.recv().unwrap().is_ok());
            assert_eq!(counters.reads.load(Ordering::SeqCst), 3);
            assert!(matches!(shared.state(), RefreshState::Ready(_)));
            assert_eq!(counters.drops.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn queued_ticks_run_one_cycle() {
        let counters = Arc::new(Counters::default());
        let worker = Worker {
            channel: FixedChannel { counters: Arc::clone(&counters), reachable: true },
            configured: true,
            started: true,
            shared: Arc::new(Shared::default()),
        };

        let (commands, command_rchannel) = mpsc::channel();
        let mut acks = Vec::new();
        for _ in 0..4 {
            let (ack_schannel, ack_rchannel) = mpsc::sync_channel(1);
            commands.send(Command::Tick(Some(ack_schannel))).unwrap();
            acks.push(ack_rchannel);
        }
        drop(commands);
        worker.run(command_rchannel);

        let outcomes: Vec<TickOutcome> = acks.iter().map(|ack| ack.recv().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|o| **o == TickOutcome::Ran).count(), 1);
        assert_eq!(counters.reads.load(Ordering::SeqCst), 3);
    }
}
