//! Thread that feeds published envelopes into a read-model handler.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use bindery_events::{EventBus, StreamScoped, Subscription};

use super::WorkerHandle;

/// How long the loop waits for a message before checking for shutdown.
const POLL: Duration = Duration::from_millis(100);

/// Spawns projection consumers.
///
/// The handler sees every message of `stream_type` (or every message when
/// `None`) in publish order. Delivery is at-least-once, so the handler has
/// to tolerate replays. A failing handler is logged and the worker moves on:
/// the read model is rebuildable and must not stall the bus.
#[derive(Debug)]
pub struct ProjectionWorker;

#[derive(Debug, Default)]
struct Tally {
    applied: u64,
    failed: u64,
    skipped: u64,
}

impl ProjectionWorker {
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: B,
        stream_type: Option<&'static str>,
        handler: H,
    ) -> std::io::Result<WorkerHandle>
    where
        M: StreamScoped + Send + 'static,
        B: EventBus<M>,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        // Subscribe before returning so nothing published afterwards is missed.
        let subscription: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new().name(name.to_string()).spawn(move || {
            let tally = consume(name, &subscription, &shutdown_rx, stream_type, handler);
            info!(
                worker = name,
                applied = tally.applied,
                failed = tally.failed,
                skipped = tally.skipped,
                "projection worker drained"
            );
        })?;

        info!(worker = name, stream_type = ?stream_type, "projection worker started");
        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn consume<M, H, E>(
    name: &'static str,
    subscription: &Subscription<M>,
    shutdown: &mpsc::Receiver<()>,
    stream_type: Option<&'static str>,
    mut handler: H,
) -> Tally
where
    M: StreamScoped,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let mut tally = Tally::default();

    while shutdown.try_recv().is_err() {
        let message = match subscription.recv_timeout(POLL) {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!(worker = name, "bus dropped; stopping");
                break;
            }
        };

        if stream_type.is_some_and(|s| message.stream_type() != s) {
            tally.skipped += 1;
            continue;
        }

        match handler(message) {
            Ok(()) => tally.applied += 1,
            Err(err) => {
                tally.failed += 1;
                warn!(worker = name, error = ?err, "projection handler failed");
            }
        }
    }

    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use bindery_events::InMemoryEventBus;

    #[derive(Debug, Clone)]
    struct Msg(&'static str, u32);

    impl StreamScoped for Msg {
        fn stream_type(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn only_the_requested_stream_reaches_the_handler() {
        let bus: Arc<InMemoryEventBus<Msg>> = Arc::new(InMemoryEventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let worker = ProjectionWorker::spawn(
            "test-projection",
            bus.clone(),
            Some("ledger.stock"),
            move |m: Msg| {
                sink.lock().unwrap().push(m.1);
                Ok::<(), ()>(())
            },
        )
        .unwrap();

        bus.publish(Msg("ledger.stock", 1)).unwrap();
        bus.publish(Msg("carts.cart", 2)).unwrap();
        bus.publish(Msg("ledger.stock", 3)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        worker.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
    }
}
