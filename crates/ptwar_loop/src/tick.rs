//! Fixed-rate tick loop.
//!
//! Lifecycle of a [`GameLoop`]:
//!
//! 1. `new` validates the configuration.
//! 2. `start` spawns the loop task, which launches the workers, runs every
//!    setup system once, then ticks at the configured interval.
//! 3. Each tick enqueues every periodic system into its phase queue, drains
//!    the queues highest phase first onto the workers, and waits until no
//!    item is in flight.
//! 4. `stop` cancels the scope; the current tick's in-flight items finish,
//!    queued items are dropped, workers exit and `stop` returns.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use ptwar_system::{
    Order, ShutdownSignal, System, SystemOrder, SystemsProvider, TickContext, TickMessage,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::GameLoopConfig;
use crate::error::LoopError;
use crate::phase::PhaseQueues;
use crate::registry::SystemRegistry;
use crate::worker::{InFlight, WorkerPool};

/// Interval between two checks of the in-flight counter during shutdown.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Ticks between two periodic tick-duration reports.
const REPORT_EVERY: u64 = 100;

/// Observable lifecycle state of a [`GameLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Constructed = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
    Closed = 4,
}

impl LoopState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Constructed,
            1 => Self::Running,
            2 => Self::Stopping,
            3 => Self::Stopped,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug)]
struct Shared {
    tick_count: AtomicU64,
    state: AtomicU8,
    registry: SystemRegistry,
}

impl Shared {
    fn set_state(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Fixed-rate scheduler driving registered systems through ordered phases.
///
/// Must be started from within a tokio runtime.
#[derive(Debug)]
pub struct GameLoop {
    config: GameLoopConfig,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GameLoop {
    /// Create a loop from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::Config`] if any configuration field is invalid.
    pub fn new(config: GameLoopConfig) -> Result<Self, LoopError> {
        config.validate()?;

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            shared: Arc::new(Shared {
                tick_count: AtomicU64::new(0),
                state: AtomicU8::new(LoopState::Constructed as u8),
                registry: SystemRegistry::new(),
            }),
            shutdown_tx,
            handle: Mutex::new(None),
        })
    }

    /// The configuration this loop was built with.
    #[must_use]
    pub fn config(&self) -> &GameLoopConfig {
        &self.config
    }

    /// Number of periodic ticks started so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.shared.tick_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        self.shared.state()
    }

    /// A read-only view of this loop's cancellation scope.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal::new(self.shutdown_tx.subscribe())
    }

    /// Registered systems.
    #[must_use]
    pub fn registry(&self) -> &SystemRegistry {
        &self.shared.registry
    }

    /// Queue a system to run exactly once, before the first periodic tick.
    pub fn add_setup(&self, order: Order, system: impl System + 'static) {
        self.shared.registry.add_setup(order, Arc::new(system));
    }

    /// Queue a system to run on every periodic tick.
    pub fn add_system(&self, order: Order, system: impl System + 'static) {
        self.shared.registry.add_system(order, Arc::new(system));
    }

    /// Register every system yielded by `provider`. The provider is queried
    /// once, now.
    pub fn add_systems(&self, provider: &dyn SystemsProvider) {
        let systems = provider.systems(&self.shutdown_signal());
        debug!(count = systems.len(), "registering provided systems");
        self.shared.registry.extend(systems);
    }

    fn lock_handle(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launch the loop task.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::AlreadyStarted`] while the loop is running,
    /// [`LoopError::CannotRestart`] once it has been stopped, or
    /// [`LoopError::Closed`] after [`GameLoop::close`].
    pub fn start(&self) -> Result<(), LoopError> {
        let mut handle = self.lock_handle();
        match self.shared.state() {
            LoopState::Constructed => {}
            LoopState::Running | LoopState::Stopping => return Err(LoopError::AlreadyStarted),
            LoopState::Stopped => return Err(LoopError::CannotRestart),
            LoopState::Closed => return Err(LoopError::Closed),
        }

        info!(
            tick_ms = self.config.tick_duration.as_millis() as u64,
            workers = self.config.worker_count,
            events_buffer = self.config.events_buffer,
            setup = self.shared.registry.setup_count(),
            systems = self.shared.registry.system_count(),
            "starting game loop"
        );

        self.shared.set_state(LoopState::Running);
        let driver = TickDriver::new(
            &self.config,
            Arc::clone(&self.shared),
            self.shutdown_signal(),
        );
        *handle = Some(tokio::spawn(driver.run()));
        Ok(())
    }

    /// Cancel the loop and wait until every worker has exited.
    ///
    /// The wait is not bounded internally; wrap the call in
    /// `tokio::time::timeout` to cap shutdown latency.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::NotRunning`] if the loop is not running, or
    /// [`LoopError::Join`] if the loop task panicked.
    pub async fn stop(&self) -> Result<(), LoopError> {
        let Some(handle) = self.lock_handle().take() else {
            return Err(LoopError::NotRunning);
        };

        info!(tick = self.tick_count(), "stopping game loop");
        self.shared.set_state(LoopState::Stopping);
        self.shutdown_tx.send_replace(true);

        let result = handle.await;
        self.shared.set_state(LoopState::Stopped);
        result.map_err(|err| LoopError::Join(err.to_string()))?;

        info!(tick = self.tick_count(), "game loop stopped");
        Ok(())
    }

    /// Start the loop, run until `shutdown` resolves, then stop it.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`GameLoop::start`] or [`GameLoop::stop`].
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), LoopError>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        shutdown.await;
        self.stop().await
    }

    /// Stop the loop if it is running and refuse any later start.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::Join`] if the loop task panicked while stopping.
    pub async fn close(&self) -> Result<(), LoopError> {
        match self.stop().await {
            Ok(()) | Err(LoopError::NotRunning) => {}
            Err(err) => return Err(err),
        }
        self.shared.set_state(LoopState::Closed);
        Ok(())
    }
}

/// State owned by the spawned loop task.
struct TickDriver {
    tick_duration: Duration,
    worker_count: usize,
    shared: Arc<Shared>,
    phases: PhaseQueues,
    in_flight: InFlight,
    shutdown: ShutdownSignal,
}

impl TickDriver {
    fn new(config: &GameLoopConfig, shared: Arc<Shared>, shutdown: ShutdownSignal) -> Self {
        Self {
            tick_duration: config.tick_duration,
            worker_count: config.worker_count,
            shared,
            phases: PhaseQueues::new(config.events_buffer),
            in_flight: InFlight::new(),
            shutdown,
        }
    }

    async fn run(mut self) {
        let pool = WorkerPool::spawn(self.worker_count, self.shutdown.clone());

        let setup = self.shared.registry.setup_snapshot();
        if !setup.is_empty() {
            info!(count = setup.len(), "running setup systems");
            self.run_batch(&pool, setup, TickMessage::new(0, Duration::ZERO))
                .await;
        }

        let mut interval = tokio::time::interval_at(
            Instant::now() + self.tick_duration,
            self.tick_duration,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.wait() => break,
                _ = interval.tick() => {}
            }

            let tick = self.shared.tick_count.fetch_add(1, Ordering::AcqRel) + 1;
            let start = Instant::now();
            let delta = start.duration_since(last_tick);
            last_tick = start;

            let systems = self.shared.registry.systems_snapshot();
            self.run_batch(&pool, systems, TickMessage::new(tick, delta))
                .await;

            let elapsed = start.elapsed();
            if elapsed > self.tick_duration {
                warn!(
                    tick,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = self.tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
            if tick % REPORT_EVERY == 0 {
                info!(tick, elapsed_us = elapsed.as_micros() as u64, "tick duration");
            }
        }

        info!(tick = self.shared.tick_count.load(Ordering::Acquire), "tick loop exiting");
        pool.join().await;
    }

    /// Push `systems` through the phase queues onto the workers and wait for
    /// all of them to finish.
    async fn run_batch(&mut self, pool: &WorkerPool, systems: Vec<SystemOrder>, message: TickMessage) {
        for entry in systems {
            self.phases.enqueue(entry);
        }

        let ctx = TickContext::new(message, self.shutdown.clone());

        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.wait() => None,
                system = self.phases.next() => system,
            };
            let Some(system) = next else { break };

            let guard = self.in_flight.enter();
            let ctx = ctx.clone();
            let job = async move {
                let _guard = guard;
                system.on_tick(&ctx).await;
            }
            .boxed();

            let sent = tokio::select! {
                biased;
                () = self.shutdown.wait() => false,
                sent = pool.dispatch(job) => sent,
            };
            if !sent {
                break;
            }
        }

        tokio::select! {
            biased;
            () = self.in_flight.idle() => return,
            () = self.shutdown.wait() => {}
        }

        let dropped = self.phases.clear();
        info!(
            tick = message.tick,
            in_flight = self.in_flight.count(),
            dropped,
            "stopping current tick, waiting for in-flight systems"
        );
        self.in_flight.drain(SHUTDOWN_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use ptwar_system::SystemFn;

    use super::*;
    use crate::error::ConfigError;

    fn fast_config() -> GameLoopConfig {
        GameLoopConfig::new(Duration::from_millis(10), 4, 2)
    }

    fn counter_system(counter: Arc<AtomicU64>) -> SystemFn<impl Fn(&TickContext) + Send + Sync> {
        SystemFn::new("counter", move |_ctx: &TickContext| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let cases = [
            (GameLoopConfig::new(Duration::ZERO, 4, 2), ConfigError::TickDuration),
            (GameLoopConfig::new(Duration::from_millis(10), 0, 2), ConfigError::EventsBuffer),
            (GameLoopConfig::new(Duration::from_millis(10), 4, 0), ConfigError::WorkerCount),
        ];
        for (config, expected) in cases {
            match GameLoop::new(config) {
                Err(LoopError::Config(err)) => assert_eq!(err, expected),
                other => panic!("expected config error, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_stop_before_start_fails() {
        let game_loop = GameLoop::new(fast_config()).unwrap();
        assert!(matches!(game_loop.stop().await, Err(LoopError::NotRunning)));
        assert_eq!(game_loop.state(), LoopState::Constructed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_twice_fails() {
        let game_loop = GameLoop::new(fast_config()).unwrap();
        game_loop.start().unwrap();
        assert!(matches!(game_loop.start(), Err(LoopError::AlreadyStarted)));
        game_loop.stop().await.unwrap();
        assert!(matches!(game_loop.stop().await, Err(LoopError::NotRunning)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_after_stop_cannot_restart() {
        let game_loop = GameLoop::new(fast_config()).unwrap();
        game_loop.start().unwrap();
        game_loop.stop().await.unwrap();
        assert_eq!(game_loop.state(), LoopState::Stopped);
        assert!(matches!(game_loop.start(), Err(LoopError::CannotRestart)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_counter_tracks_tick_count() {
        let game_loop = GameLoop::new(fast_config()).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        game_loop.add_system(Order::First, counter_system(Arc::clone(&counter)));

        game_loop.start().unwrap();
        assert_eq!(game_loop.state(), LoopState::Running);
        tokio::time::sleep(Duration::from_millis(100)).await;
        game_loop.stop().await.unwrap();
        assert_eq!(game_loop.state(), LoopState::Stopped);

        let ran = counter.load(Ordering::SeqCst);
        let ticks = game_loop.tick_count();
        assert!(ran > 0, "system never ran");
        assert!(ticks >= ran && ticks - ran <= 1, "ticks={ticks} ran={ran}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tick_count_frozen_after_stop() {
        let game_loop = GameLoop::new(fast_config()).unwrap();
        game_loop.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        game_loop.stop().await.unwrap();

        let after_stop = game_loop.tick_count();
        assert!(after_stop > 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(game_loop.tick_count(), after_stop);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_setup_runs_once_before_first_tick() {
        let game_loop = GameLoop::new(fast_config()).unwrap();
        let log = Arc::new(StdMutex::new(Vec::<u64>::new()));

        let setup_log = Arc::clone(&log);
        game_loop.add_setup(
            Order::Last,
            SystemFn::new("setup", move |ctx: &TickContext| {
                setup_log.lock().unwrap().push(ctx.tick());
            }),
        );
        let tick_log = Arc::clone(&log);
        game_loop.add_system(
            Order::First,
            SystemFn::new("tick", move |ctx: &TickContext| {
                tick_log.lock().unwrap().push(ctx.tick());
            }),
        );

        game_loop.start().unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        game_loop.stop().await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.first(), Some(&0), "setup must run first");
        assert_eq!(log.iter().filter(|&&tick| tick == 0).count(), 1);
        assert!(log.len() > 1, "periodic system never ran");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_earlier_phase_dispatched_first() {
        // A single worker runs items in dispatch order.
        let game_loop = GameLoop::new(GameLoopConfig::new(Duration::from_millis(10), 4, 1)).unwrap();
        let log = Arc::new(StdMutex::new(Vec::<Order>::new()));

        for order in [Order::Last, Order::Third, Order::First] {
            let log = Arc::clone(&log);
            game_loop.add_system(
                order,
                SystemFn::new(order.as_str(), move |_ctx: &TickContext| {
                    log.lock().unwrap().push(order);
                }),
            );
        }

        game_loop.start().unwrap();
        tokio::time::sleep(Duration::from_millis(35)).await;
        game_loop.stop().await.unwrap();

        let log = log.lock().unwrap();
        assert!(log.len() >= 3);
        assert_eq!(&log[..3], &[Order::First, Order::Third, Order::Last]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_phase_larger_than_buffer_keeps_precedence() {
        // Three First systems against a one-slot queue force deferred placement.
        let game_loop = GameLoop::new(GameLoopConfig::new(Duration::from_millis(20), 1, 1)).unwrap();
        let log = Arc::new(StdMutex::new(Vec::<Order>::new()));

        for order in [Order::Second, Order::First, Order::First, Order::First] {
            let log = Arc::clone(&log);
            game_loop.add_system(
                order,
                SystemFn::new(order.as_str(), move |_ctx: &TickContext| {
                    log.lock().unwrap().push(order);
                }),
            );
        }

        game_loop.start().unwrap();
        tokio::time::sleep(Duration::from_millis(130)).await;
        game_loop.stop().await.unwrap();

        let log = log.lock().unwrap();
        let ticks: Vec<_> = log.chunks_exact(4).collect();
        assert!(ticks.len() >= 3, "only {} full ticks", ticks.len());
        for tick in ticks {
            assert_eq!(tick, &[Order::First, Order::First, Order::First, Order::Second]);
        }
    }

    struct HoldUntilShutdown {
        started: Arc<AtomicU64>,
    }

    impl System for HoldUntilShutdown {
        fn on_tick<'a>(&'a self, ctx: &'a TickContext) -> futures::future::BoxFuture<'a, ()> {
            async move {
                self.started.fetch_add(1, Ordering::SeqCst);
                ctx.shutdown.wait().await;
            }
            .boxed()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queued_systems_dropped_on_stop() {
        let game_loop = GameLoop::new(GameLoopConfig::new(Duration::from_millis(10), 8, 1)).unwrap();
        let started = Arc::new(AtomicU64::new(0));
        let later = Arc::new(AtomicU64::new(0));

        game_loop.add_system(
            Order::First,
            HoldUntilShutdown {
                started: Arc::clone(&started),
            },
        );
        for _ in 0..4 {
            game_loop.add_system(Order::Second, counter_system(Arc::clone(&later)));
        }

        game_loop.start().unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while started.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("holding system should start");
        tokio::time::sleep(Duration::from_millis(30)).await;

        tokio::time::timeout(Duration::from_secs(1), game_loop.stop())
            .await
            .expect("stop should not hang")
            .unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(later.load(Ordering::SeqCst), 0, "queued systems must not run");
        assert_eq!(game_loop.tick_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_system_does_not_stop_ticks() {
        let game_loop = GameLoop::new(fast_config()).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        game_loop.add_system(
            Order::First,
            SystemFn::new("broken", |_ctx: &TickContext| panic!("broken system")),
        );
        game_loop.add_system(Order::Second, counter_system(Arc::clone(&counter)));

        game_loop.start().unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        game_loop.stop().await.unwrap();

        assert!(counter.load(Ordering::SeqCst) >= 2);
    }

    struct WorldSystems {
        counter: Arc<AtomicU64>,
    }

    impl SystemsProvider for WorldSystems {
        fn systems(&self, _shutdown: &ShutdownSignal) -> Vec<SystemOrder> {
            vec![
                SystemOrder::new(Order::Second, counter_system(Arc::clone(&self.counter))),
                SystemOrder::new(Order::Fourth, counter_system(Arc::clone(&self.counter))),
            ]
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_add_systems_from_provider() {
        let game_loop = GameLoop::new(fast_config()).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        game_loop.add_systems(&WorldSystems {
            counter: Arc::clone(&counter),
        });
        assert_eq!(game_loop.registry().system_count(), 2);

        game_loop.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        game_loop.stop().await.unwrap();

        assert!(counter.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_in_flight_system() {
        let game_loop = GameLoop::new(fast_config()).unwrap();
        let started = Arc::new(AtomicU64::new(0));
        let finished = Arc::new(AtomicU64::new(0));
        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
        game_loop.add_system(
            Order::First,
            SystemFn::new("slow", move |_ctx: &TickContext| {
                s.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );

        game_loop.start().unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while started.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("slow system should start");
        game_loop.stop().await.unwrap();

        assert_eq!(
            finished.load(Ordering::SeqCst),
            started.load(Ordering::SeqCst),
            "stop returned before the running system finished"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_until_stops_on_signal() {
        let game_loop = GameLoop::new(fast_config()).unwrap();
        game_loop
            .run_until(tokio::time::sleep(Duration::from_millis(40)))
            .await
            .unwrap();
        assert_eq!(game_loop.state(), LoopState::Stopped);
        assert!(game_loop.tick_count() > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_prevents_restart() {
        let game_loop = GameLoop::new(fast_config()).unwrap();
        game_loop.start().unwrap();
        game_loop.close().await.unwrap();
        assert_eq!(game_loop.state(), LoopState::Closed);
        assert!(matches!(game_loop.start(), Err(LoopError::Closed)));
        // Closing twice is harmless.
        game_loop.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_systems_observe_shutdown() {
        let game_loop = GameLoop::new(fast_config()).unwrap();
        let signal = game_loop.shutdown_signal();
        assert!(!signal.is_shutdown());
        game_loop.start().unwrap();
        game_loop.stop().await.unwrap();
        assert!(signal.is_shutdown());
    }
}
