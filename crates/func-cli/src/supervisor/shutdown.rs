use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    thread,
    time::Duration,
};

use tokio::{runtime::Handle, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::process_manager::ProcessKiller;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

pub type ShutdownCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Unregistered,
    Registered,
    ShuttingDown,
    ForcedShutdown,
}

struct InterruptHandler {
    killer: Arc<dyn ProcessKiller>,
    on_shutting_down: ShutdownCallback,
    on_grace_period_timeout: Option<ShutdownCallback>,
}

struct Registration {
    state: ShutdownState,
    handler: Option<Arc<InterruptHandler>>,
    interrupt: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
    grace: Option<CancellationToken>,
}

impl Registration {
    fn reset(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(grace) = self.grace.take() {
            grace.cancel();
        }
        self.interrupt = None;
        self.handler = None;
        self.state = ShutdownState::Unregistered;
    }
}

struct Inner {
    grace_period: Duration,
    registration: Mutex<Registration>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Registration> {
        self.registration.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.registration.get_mut().unwrap_or_else(PoisonError::into_inner).reset();
    }
}

/// Turns the first Ctrl+C into an orderly shutdown: kill launched hosts, tell
/// the command to stop, and force the exit if it has not finished within the
/// grace period.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &self.state())
            .field("grace_period", &self.inner.grace_period)
            .finish()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                grace_period,
                registration: Mutex::new(Registration {
                    state: ShutdownState::Unregistered,
                    handler: None,
                    interrupt: None,
                    tasks: Vec::new(),
                    grace: None,
                }),
            }),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.inner.grace_period
    }

    pub fn state(&self) -> ShutdownState {
        self.inner.lock().state
    }

    /// Install the interrupt handler. Returns `false` if one is already
    /// installed; the new callbacks are then dropped.
    pub fn register<F>(
        &self,
        killer: Arc<dyn ProcessKiller>,
        on_shutting_down: F,
        on_grace_period_timeout: Option<ShutdownCallback>,
    ) -> bool
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut registration = self.inner.lock();
        if registration.state != ShutdownState::Unregistered {
            debug!(state = ?registration.state, "shutdown handler already registered");
            return false;
        }

        let interrupt = CancellationToken::new();
        registration.handler = Some(Arc::new(InterruptHandler {
            killer,
            on_shutting_down: Box::new(on_shutting_down),
            on_grace_period_timeout,
        }));
        registration.interrupt = Some(interrupt.clone());
        registration.state = ShutdownState::Registered;

        match Handle::try_current() {
            Ok(handle) => {
                registration.tasks.push(handle.spawn(forward_os_interrupts(interrupt.clone())));
                registration
                    .tasks
                    .push(handle.spawn(observe_interrupt(Arc::downgrade(&self.inner), interrupt)));
            }
            Err(_) => {
                warn!("no async runtime available, Ctrl+C will not be observed");
            }
        }
        true
    }

    /// Deliver an interrupt as if Ctrl+C had been pressed.
    pub fn interrupt(&self) {
        if let Some(token) = self.inner.lock().interrupt.as_ref() {
            token.cancel();
        }
    }

    /// Run the shutdown sequence. Does nothing unless in `Registered`.
    pub fn handle_interrupt(&self) {
        let (handler, grace) = {
            let mut registration = self.inner.lock();
            if registration.state != ShutdownState::Registered {
                info!(state = ?registration.state, "ignoring interrupt");
                return;
            }
            let Some(handler) = registration.handler.clone() else {
                return;
            };
            let grace = CancellationToken::new();
            registration.state = ShutdownState::ShuttingDown;
            registration.grace = Some(grace.clone());
            (handler, grace)
        };

        info!(grace_period = ?self.inner.grace_period, "shutting down");
        handler.killer.kill_child_processes();
        (handler.on_shutting_down)();
        self.arm_grace_timer(handler, grace);
    }

    /// Graceful shutdown finished; the grace timer will not fire.
    pub fn complete(&self) {
        if let Some(grace) = self.inner.lock().grace.as_ref() {
            grace.cancel();
        }
    }

    pub fn unregister(&self) {
        self.inner.lock().reset();
        debug!("shutdown handler unregistered");
    }

    fn arm_grace_timer(&self, handler: Arc<InterruptHandler>, grace: CancellationToken) {
        let timer = grace_timer(Arc::downgrade(&self.inner), handler, grace);
        match Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(timer);
                self.inner.lock().tasks.push(task);
            }
            Err(_) => {
                spawn_on_thread(timer);
            }
        }
    }
}

async fn forward_os_interrupts(interrupt: CancellationToken) {
    loop {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            return;
        }
        if interrupt.is_cancelled() {
            info!("interrupt received while shutting down, ignoring");
        } else {
            interrupt.cancel();
        }
    }
}

async fn observe_interrupt(inner: Weak<Inner>, interrupt: CancellationToken) {
    interrupt.cancelled().await;
    if let Some(inner) = inner.upgrade() {
        ShutdownCoordinator { inner }.handle_interrupt();
    }
}

async fn grace_timer(inner: Weak<Inner>, handler: Arc<InterruptHandler>, grace: CancellationToken) {
    let period = match inner.upgrade() {
        Some(inner) => inner.grace_period,
        None => return,
    };
    tokio::select! {
        _ = grace.cancelled() => {
            debug!("graceful shutdown completed within grace period");
        }
        _ = sleep(period) => {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let forced = {
                let mut registration = inner.lock();
                if registration.state == ShutdownState::ShuttingDown {
                    registration.state = ShutdownState::ForcedShutdown;
                    true
                } else {
                    false
                }
            };
            if forced {
                warn!(grace_period = ?period, "grace period elapsed, forcing shutdown");
                if let Some(callback) = handler.on_grace_period_timeout.as_ref() {
                    callback();
                }
            }
        }
    }
}

fn spawn_on_thread<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    thread::spawn(move || {
        match tokio::runtime::Builder::new_current_thread().enable_time().build() {
            Ok(runtime) => runtime.block_on(future),
            Err(err) => warn!(error = %err, "failed to start grace timer"),
        }
    });
}
