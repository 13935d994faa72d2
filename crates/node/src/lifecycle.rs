//! Ordered start and shutdown of node subsystems.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use flsd_log::{log_info, log_warn, Category};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::http::serve_rest;
use crate::rest::{register_rest_handlers, unregister_rest_handlers, RestContext, RestRouter};

pub trait Subsystem: Send {
    fn name(&self) -> &'static str;

    fn init(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), String>;

    /// Asks running work to wind down. Must not block.
    fn interrupt(&mut self) {}

    fn stop(&mut self) {}

    fn destroy(&mut self) {}
}

/// Runs subsystems forward on startup and backward on shutdown.
#[derive(Default)]
pub struct Lifecycle {
    subsystems: Vec<Box<dyn Subsystem>>,
    initialized: usize,
    started: usize,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, subsystem: Box<dyn Subsystem>) {
        self.subsystems.push(subsystem);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.subsystems.iter().map(|subsystem| subsystem.name()).collect()
    }

    /// Initializes every subsystem, then starts every subsystem, both in
    /// registration order. On failure whatever already ran is shut down.
    pub fn start(&mut self) -> Result<(), String> {
        while self.initialized < self.subsystems.len() {
            let subsystem = &mut self.subsystems[self.initialized];
            if let Err(err) = subsystem.init() {
                let name = subsystem.name();
                self.shutdown();
                return Err(format!("{name} init failed: {err}"));
            }
            log_info!(cat: Category::Lifecycle, "{} initialized", subsystem.name());
            self.initialized += 1;
        }
        while self.started < self.subsystems.len() {
            let subsystem = &mut self.subsystems[self.started];
            if let Err(err) = subsystem.start() {
                let name = subsystem.name();
                self.shutdown();
                return Err(format!("{name} start failed: {err}"));
            }
            log_info!(cat: Category::Lifecycle, "{} started", subsystem.name());
            self.started += 1;
        }
        Ok(())
    }

    /// Interrupts and stops started subsystems, then destroys initialized
    /// ones, each pass in reverse order. Safe to call more than once.
    pub fn shutdown(&mut self) {
        for subsystem in self.subsystems[..self.started].iter_mut().rev() {
            subsystem.interrupt();
        }
        for subsystem in self.subsystems[..self.started].iter_mut().rev() {
            subsystem.stop();
            log_info!(cat: Category::Lifecycle, "{} stopped", subsystem.name());
        }
        for subsystem in self.subsystems[..self.initialized].iter_mut().rev() {
            subsystem.destroy();
        }
        self.started = 0;
        self.initialized = 0;
    }
}

/// Registers the REST handlers and, when given an address, serves them.
pub struct RestSubsystem {
    router: Arc<RwLock<RestRouter>>,
    ctx: Arc<dyn RestContext>,
    bind: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<watch::Sender<bool>>,
    server: Option<JoinHandle<()>>,
}

impl RestSubsystem {
    pub fn new(
        router: Arc<RwLock<RestRouter>>,
        ctx: Arc<dyn RestContext>,
        bind: Option<SocketAddr>,
    ) -> Self {
        Self {
            router,
            ctx,
            bind,
            local_addr: None,
            shutdown: None,
            server: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn listen(&mut self, addr: SocketAddr) -> Result<(), String> {
        let listener = std::net::TcpListener::bind(addr)
            .map_err(|err| format!("rest bind {addr} failed: {err}"))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| err.to_string())?;
        self.local_addr = listener.local_addr().ok();
        let listener = tokio::net::TcpListener::from_std(listener).map_err(|err| err.to_string())?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let router = Arc::clone(&self.router);
        let ctx = Arc::clone(&self.ctx);
        self.server = Some(tokio::spawn(async move {
            if let Err(err) = serve_rest(listener, router, ctx, shutdown_rx).await {
                log_warn!(cat: Category::Rest, "rest server stopped: {err}");
            }
        }));
        self.shutdown = Some(shutdown_tx);
        log_info!("REST listening on http://{}", self.local_addr.unwrap_or(addr));
        Ok(())
    }
}

impl Subsystem for RestSubsystem {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn start(&mut self) -> Result<(), String> {
        {
            let mut router = self
                .router
                .write()
                .map_err(|_| "rest router lock poisoned".to_string())?;
            register_rest_handlers(&mut router);
        }
        if let Some(addr) = self.bind {
            if let Err(err) = self.listen(addr) {
                if let Ok(mut router) = self.router.write() {
                    unregister_rest_handlers(&mut router);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn interrupt(&mut self) {
        if let Some(shutdown) = &self.shutdown {
            let _ = shutdown.send(true);
        }
    }

    fn stop(&mut self) {
        if let Ok(mut router) = self.router.write() {
            unregister_rest_handlers(&mut router);
        }
        if let Some(server) = self.server.take() {
            server.abort();
        }
        self.shutdown = None;
        self.local_addr = None;
    }
}

type QuorumJob = Box<dyn FnOnce() + Send>;

enum WorkerMessage {
    Job(QuorumJob),
    Stop,
}

/// Background worker the quorum machinery hands jobs to.
#[derive(Default)]
pub struct QuorumWorker {
    sender: Option<Sender<WorkerMessage>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl QuorumWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.sender.is_some()
    }

    pub fn start(&mut self) -> Result<(), String> {
        if self.is_running() {
            return Ok(());
        }
        let (sender, receiver) = unbounded::<WorkerMessage>();
        let handle = thread::Builder::new()
            .name("quorum-worker".to_string())
            .spawn(move || {
                while let Ok(WorkerMessage::Job(job)) = receiver.recv() {
                    job();
                }
            })
            .map_err(|err| format!("failed to spawn quorum worker: {err}"))?;
        self.sender = Some(sender);
        self.handle = Some(handle);
        Ok(())
    }

    /// Queues `job`. Returns false when the worker is not running.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match &self.sender {
            Some(sender) => sender.send(WorkerMessage::Job(Box::new(job))).is_ok(),
            None => false,
        }
    }

    /// Finishes queued jobs, then joins the worker thread.
    pub fn stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(WorkerMessage::Stop);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for QuorumWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Quorum hooks. Only the worker's lifetime is managed here.
#[derive(Default)]
pub struct QuorumSubsystem {
    worker: Option<QuorumWorker>,
}

impl QuorumSubsystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker(&self) -> Option<&QuorumWorker> {
        self.worker.as_ref()
    }
}

impl Subsystem for QuorumSubsystem {
    fn name(&self) -> &'static str {
        "quorum"
    }

    fn init(&mut self) -> Result<(), String> {
        self.worker = Some(QuorumWorker::new());
        Ok(())
    }

    fn start(&mut self) -> Result<(), String> {
        match self.worker.as_mut() {
            Some(worker) => worker.start(),
            None => Err("quorum worker not initialized".to_string()),
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.as_mut() {
            worker.stop();
        }
    }

    fn destroy(&mut self) {
        self.worker = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        events: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    }

    impl Recorder {
        fn boxed(name: &'static str, events: &Arc<Mutex<Vec<String>>>, fail_start: bool) -> Box<Self> {
            Box::new(Self {
                name,
                events: Arc::clone(events),
                fail_start,
            })
        }

        fn record(&self, event: &str) {
            self.events
                .lock()
                .expect("events")
                .push(format!("{}:{event}", self.name));
        }
    }

    impl Subsystem for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn init(&mut self) -> Result<(), String> {
            self.record("init");
            Ok(())
        }

        fn start(&mut self) -> Result<(), String> {
            self.record("start");
            if self.fail_start {
                return Err("boom".to_string());
            }
            Ok(())
        }

        fn interrupt(&mut self) {
            self.record("interrupt");
        }

        fn stop(&mut self) {
            self.record("stop");
        }

        fn destroy(&mut self) {
            self.record("destroy");
        }
    }

    #[test]
    fn shutdown_runs_in_reverse() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut lifecycle = Lifecycle::new();
        lifecycle.register(Recorder::boxed("a", &events, false));
        lifecycle.register(Recorder::boxed("b", &events, false));
        lifecycle.start().expect("start");
        lifecycle.shutdown();
        lifecycle.shutdown();

        let events = events.lock().expect("events").clone();
        assert_eq!(
            events,
            [
                "a:init", "b:init", "a:start", "b:start", "b:interrupt", "a:interrupt", "b:stop",
                "a:stop", "b:destroy", "a:destroy",
            ]
        );
    }

    #[test]
    fn failed_start_unwinds_what_ran() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut lifecycle = Lifecycle::new();
        lifecycle.register(Recorder::boxed("a", &events, false));
        lifecycle.register(Recorder::boxed("b", &events, true));
        let err = lifecycle.start().expect_err("start fails");
        assert_eq!(err, "b start failed: boom");

        let events = events.lock().expect("events").clone();
        assert_eq!(
            events,
            [
                "a:init", "b:init", "a:start", "b:start", "a:interrupt", "a:stop", "b:destroy",
                "a:destroy",
            ]
        );
    }

    #[test]
    fn quorum_worker_follows_the_hooks() {
        let mut quorum = QuorumSubsystem::new();
        assert!(quorum.start().is_err());
        quorum.init().expect("init");
        quorum.start().expect("start");

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        assert!(quorum
            .worker()
            .expect("worker")
            .submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        quorum.stop();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!quorum.worker().expect("worker").submit(|| {}));

        quorum.destroy();
        assert!(quorum.worker().is_none());
    }
}
