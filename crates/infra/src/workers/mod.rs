//! Background threads: projection consumers and the periodic sweeper.

pub mod projection_worker;

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

pub use projection_worker::ProjectionWorker;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
        info!(worker = self.name, "worker stopped");
    }
}

/// Run `tick` every `interval` on a named thread until shut down.
///
/// Shutdown interrupts the wait between ticks, never a running tick.
pub fn spawn_periodic(
    name: &'static str,
    interval: Duration,
    mut tick: impl FnMut() + Send + 'static,
) -> std::io::Result<WorkerHandle> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let join = thread::Builder::new().name(name.to_string()).spawn(move || {
        loop {
            match shutdown_rx.recv_timeout(interval) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    debug!(worker = name, "tick");
                    tick();
                }
                // Explicit shutdown, or every handle dropped.
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    })?;

    info!(worker = name, interval_ms = interval.as_millis() as u64, "worker started");
    Ok(WorkerHandle {
        name,
        shutdown: shutdown_tx,
        join: Some(join),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn periodic_worker_ticks_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = spawn_periodic("test-ticker", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        while ticks.load(Ordering::SeqCst) < 2 {
            thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();

        let after = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }
}
