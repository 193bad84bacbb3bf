use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lp_core::{DrainOptions, DrainReport, DbError, DriverBackend};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;

/// Options controlling `SignalHandler`'s behavior once a termination
/// signal is observed.
#[derive(Clone)]
pub struct SignalHandlerOptions {
    pub drain: DrainOptions,
    /// Exit the process once the drain completes.
    pub auto_exit: bool,
    /// Exit code used when the drain had to force-cancel queries, or
    /// itself failed.
    pub forced_exit_code: i32,
}

impl Default for SignalHandlerOptions {
    fn default() -> Self {
        Self {
            drain: DrainOptions::default(),
            auto_exit: true,
            forced_exit_code: 1,
        }
    }
}

/// Registers SIGTERM/SIGINT listeners that trigger `driver.drain_and_close`
/// on the first signal received; subsequent signals while already shutting
/// down are logged and ignored.
pub struct SignalHandler {
    shutting_down: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Register OS-signal listeners. Returns the handler (queryable via
    /// `is_shutting_down`) and an `unregister` callback a caller can invoke
    /// to stop listening without waiting for a real signal — needed so
    /// tests can tear down cleanly instead of leaking a background task.
    pub fn register(
        driver: Arc<dyn DriverBackend>,
        opts: SignalHandlerOptions,
    ) -> Result<(Self, impl FnOnce() + Send + 'static), DbError> {
        let term = signal(SignalKind::terminate())
            .map_err(|e| DbError::config(format!("failed to register SIGTERM handler: {e}")))?;
        let int = signal(SignalKind::interrupt())
            .map_err(|e| DbError::config(format!("failed to register SIGINT handler: {e}")))?;

        let shutting_down = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(Notify::new());

        let task_shutting_down = shutting_down.clone();
        let task_stop = stop.clone();
        tokio::spawn(run_signal_loop(term, int, task_stop, move || {
            let driver = driver.clone();
            let opts = opts.clone();
            let shutting_down = task_shutting_down.clone();
            async move { on_termination(driver, &opts, &shutting_down).await }
        }));

        let unregister_stop = stop.clone();
        Ok((Self { shutting_down }, move || unregister_stop.notify_one()))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

async fn run_signal_loop<F, Fut>(
    mut term: tokio::signal::unix::Signal,
    mut int: tokio::signal::unix::Signal,
    stop: Arc<Notify>,
    mut on_signal: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = term.recv() => on_signal().await,
            _ = int.recv() => on_signal().await,
            _ = stop.notified() => break,
        }
    }
}

/// Core drain-on-termination logic, factored out so it can be exercised
/// directly in tests without needing a real OS signal.
pub async fn on_termination(
    driver: Arc<dyn DriverBackend>,
    opts: &SignalHandlerOptions,
    shutting_down: &AtomicBool,
) -> Option<DrainReport> {
    if shutting_down.swap(true, Ordering::SeqCst) {
        log::warn!("shutdown already in progress, ignoring additional signal");
        return None;
    }

    log::info!("termination signal received, draining driver");
    match driver.drain_and_close(opts.drain.clone()).await {
        Ok(report) => {
            if opts.auto_exit {
                let code = if report.cancelled_queries == 0 {
                    0
                } else {
                    opts.forced_exit_code
                };
                std::process::exit(code);
            }
            Some(report)
        }
        Err(e) => {
            log::error!("drain_and_close failed during shutdown: {e}");
            if opts.auto_exit {
                std::process::exit(opts.forced_exit_code);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lp_test_support::FakeDriverBackend;
    use std::time::Duration;

    #[tokio::test]
    async fn first_termination_drains_and_returns_report() {
        let driver: Arc<dyn DriverBackend> = Arc::new(FakeDriverBackend::new());
        let shutting_down = AtomicBool::new(false);
        let opts = SignalHandlerOptions {
            drain: DrainOptions {
                timeout: Duration::from_millis(50),
                ..Default::default()
            },
            auto_exit: false,
            forced_exit_code: 1,
        };

        let report = on_termination(driver, &opts, &shutting_down).await;
        assert!(report.is_some());
        assert!(shutting_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn second_termination_while_shutting_down_is_ignored() {
        let driver: Arc<dyn DriverBackend> = Arc::new(FakeDriverBackend::new());
        let shutting_down = AtomicBool::new(true);
        let opts = SignalHandlerOptions {
            auto_exit: false,
            ..Default::default()
        };

        let report = on_termination(driver, &opts, &shutting_down).await;
        assert!(report.is_none());
    }
}
