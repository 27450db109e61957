//! Graceful Shutdown Handler
//!
//! Lifecycle state machine (`Running -> Draining -> Closed`) and the signal
//! listener that drives it.

use crate::domain::value_objects::LifecycleState;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::watch;

/// Lifecycle coordinator.
///
/// Tracks the process state and in-flight requests. The first shutdown
/// request moves the state to `Draining`; later requests are no-ops.
#[derive(Clone)]
pub struct LifecycleController {
    /// Current `LifecycleState` as u8
    state: Arc<AtomicU8>,
    /// Requests currently inside the router
    in_flight: Arc<AtomicUsize>,
    /// Broadcasts every state transition
    state_tx: Arc<watch::Sender<LifecycleState>>,
}

impl LifecycleController {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Running);
        Self {
            state: Arc::new(AtomicU8::new(LifecycleState::Running.as_u8())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            state_tx: Arc::new(state_tx),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        let moved = self
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved {
            self.state_tx.send_replace(to);
        }
        moved
    }

    /// Initiate graceful shutdown.
    ///
    /// Returns `true` only for the call that moved the state out of `Running`.
    pub fn begin_shutdown(&self) -> bool {
        let started = self.transition(LifecycleState::Running, LifecycleState::Draining);
        if started {
            tracing::info!(in_flight = self.in_flight(), "shutting down: draining in-flight requests");
        }
        started
    }

    /// Mark the store released. Only valid from `Draining`.
    pub fn mark_closed(&self) -> bool {
        let closed = self.transition(LifecycleState::Draining, LifecycleState::Closed);
        if closed {
            tracing::info!("lifecycle closed");
        }
        closed
    }

    /// Resolves once shutdown has been initiated.
    pub async fn draining(self) {
        self.wait_until(|state| *state != LifecycleState::Running).await;
    }

    /// Resolves once the lifecycle reached `Closed`.
    pub async fn closed(self) {
        self.wait_until(|state| *state == LifecycleState::Closed).await;
    }

    async fn wait_until(&self, done: impl FnMut(&LifecycleState) -> bool) {
        let mut rx = self.state_tx.subscribe();
        // The sender lives as long as `self`, so this only returns once `done` holds.
        let _ = rx.wait_for(done).await;
    }

    /// Get the number of requests in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Create a guard that counts one in-flight request until dropped.
    pub fn request_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            in_flight: self.in_flight.clone(),
        }
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for tracking in-flight requests.
pub struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Listen for SIGINT/SIGTERM and start shutdown on the first one.
///
/// Keeps listening afterwards so repeated signals are logged and ignored
/// instead of falling back to the default (abort) disposition.
#[cfg(unix)]
pub async fn shutdown_signal(lifecycle: LifecycleController) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut interrupt) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "failed to install signal handlers");
                return;
            }
        };

    loop {
        let name = tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
        };
        notify_signal(&lifecycle, name);
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal(lifecycle: LifecycleController) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        notify_signal(&lifecycle, "Ctrl+C");
    }
}

/// Drive `future` to completion, then shut the runtime down within `grace`.
///
/// Blocking tasks still running after `grace` (abandoned store statements)
/// are left behind instead of holding up process exit.
pub fn block_on_bounded<F: Future>(runtime: Runtime, future: F, grace: Duration) -> F::Output {
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(grace);
    output
}

fn notify_signal(lifecycle: &LifecycleController, name: &str) {
    if lifecycle.begin_shutdown() {
        tracing::info!(signal = name, "received termination signal");
    } else {
        tracing::info!(signal = name, state = %lifecycle.state(), "shutdown already in progress, ignoring signal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_lifecycle_new() {
        let lifecycle = LifecycleController::new();
        assert_eq!(lifecycle.state(), LifecycleState::Running);
        assert!(lifecycle.is_running());
        assert_eq!(lifecycle.in_flight(), 0);
    }

    #[test]
    fn test_begin_shutdown_once() {
        let lifecycle = LifecycleController::new();

        assert!(lifecycle.begin_shutdown());
        assert_eq!(lifecycle.state(), LifecycleState::Draining);

        // Calling again should be idempotent
        assert!(!lifecycle.begin_shutdown());
        assert_eq!(lifecycle.state(), LifecycleState::Draining);
    }

    #[test]
    fn test_transitions_are_one_directional() {
        let lifecycle = LifecycleController::new();

        assert!(!lifecycle.mark_closed());
        assert!(lifecycle.begin_shutdown());
        assert!(lifecycle.mark_closed());
        assert_eq!(lifecycle.state(), LifecycleState::Closed);

        assert!(!lifecycle.begin_shutdown());
        assert!(!lifecycle.mark_closed());
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
    }

    #[test]
    fn test_concurrent_shutdown_requests_start_once() {
        let lifecycle = LifecycleController::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                std::thread::spawn(move || lifecycle.begin_shutdown())
            })
            .collect();

        let started = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|started| *started)
            .count();
        assert_eq!(started, 1);
    }

    #[test]
    fn test_request_guard() {
        let lifecycle = LifecycleController::new();

        let guard1 = lifecycle.request_guard();
        let guard2 = lifecycle.request_guard();
        assert_eq!(lifecycle.in_flight(), 2);

        drop(guard1);
        assert_eq!(lifecycle.in_flight(), 1);

        drop(guard2);
        assert_eq!(lifecycle.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_draining_resolves_after_shutdown() {
        let lifecycle = LifecycleController::new();
        let waiter = tokio::spawn(lifecycle.clone().draining());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        lifecycle.begin_shutdown();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_draining_resolves_if_already_shut_down() {
        let lifecycle = LifecycleController::new();
        lifecycle.begin_shutdown();

        let result = tokio::time::timeout(Duration::from_millis(100), lifecycle.clone().draining()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_closed_resolves_after_mark_closed() {
        let lifecycle = LifecycleController::new();
        let waiter = tokio::spawn(lifecycle.clone().closed());

        lifecycle.begin_shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        lifecycle.mark_closed();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[cfg(unix)]
    fn send_sigterm_to_self() {
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    #[traced_test]
    async fn test_repeated_sigterm_starts_shutdown_once() {
        use tokio::signal::unix::{signal, SignalKind};
        use tracing::Instrument;

        // Registering here replaces the default (terminate) disposition
        // before any signal is sent.
        let _installed = signal(SignalKind::terminate()).unwrap();

        let lifecycle = LifecycleController::new();
        let mut transitions = lifecycle.state_tx.subscribe();
        let listener = tokio::spawn(shutdown_signal(lifecycle.clone()).in_current_span());
        tokio::time::sleep(Duration::from_millis(50)).await;

        send_sigterm_to_self();
        tokio::time::timeout(Duration::from_secs(2), lifecycle.clone().draining())
            .await
            .unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Draining);
        assert!(transitions.has_changed().unwrap());
        transitions.borrow_and_update();

        send_sigterm_to_self();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(lifecycle.state(), LifecycleState::Draining);
        assert!(!transitions.has_changed().unwrap());
        assert!(!listener.is_finished());

        logs_assert(|lines: &[&str]| {
            let started = lines
                .iter()
                .filter(|l| l.contains("received termination signal"))
                .count();
            let ignored = lines
                .iter()
                .filter(|l| l.contains("shutdown already in progress"))
                .count();
            match (started, ignored) {
                (1, 1) => Ok(()),
                other => Err(format!("unexpected (started, ignored) counts {other:?}")),
            }
        });
        listener.abort();
    }

    #[test]
    fn test_clone_shares_state() {
        let lifecycle = LifecycleController::new();
        let cloned = lifecycle.clone();

        let _guard = lifecycle.request_guard();
        assert_eq!(cloned.in_flight(), 1);

        cloned.begin_shutdown();
        assert!(!lifecycle.is_running());
    }
}
