use std::time::{Duration, Instant};

use common_alloc::MemoryStats;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::telemetry::TelemetryShutdown;

/// Events consumed by the supervisor loop. OS signals and internal fault
/// paths all funnel into the same queue, so there is exactly one exit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Quit(i32),
}

const EVENT_QUEUE_DEPTH: usize = 5;
const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);
/// Allocation delta that makes a sample worth logging.
const MEMORY_DELTA_BYTES: u64 = 1024 * 1024;

/// The event queue the supervisor multiplexes on. Constructed by the
/// caller and injected, so fault paths elsewhere can hold the sender.
pub fn channel() -> (mpsc::Sender<Event>, mpsc::Receiver<Event>) {
    mpsc::channel(EVENT_QUEUE_DEPTH)
}

pub struct Supervisor {
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    telemetry: TelemetryShutdown,
    started: Instant,
}

impl Supervisor {
    pub fn new(
        events_tx: mpsc::Sender<Event>,
        events_rx: mpsc::Receiver<Event>,
        telemetry: TelemetryShutdown,
    ) -> Self {
        Self {
            events_tx,
            events_rx,
            telemetry,
            started: Instant::now(),
        }
    }

    /// Multiplex over the event queue, interrupt signals and the memory
    /// sampling timer until a quit event arrives; then flush telemetry and
    /// hand the exit code back to the caller, which owns actually
    /// terminating the process.
    pub async fn run(self) -> i32 {
        let Self {
            events_tx,
            mut events_rx,
            mut telemetry,
            started,
        } = self;

        let mut interrupt =
            signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut ticker = tokio::time::interval(MEMORY_SAMPLE_INTERVAL);

        // The first tick fires immediately and gives the startup sample.
        let mut previous: Option<MemoryStats> = None;

        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => match event {
                    Event::Quit(code) => {
                        warn!("exiting");
                        let mut telemetry = std::mem::take(&mut telemetry);
                        match tokio::task::spawn_blocking(move || telemetry.shutdown()).await {
                            Ok(Ok(())) => info!("telemetry flushed"),
                            Ok(Err(err)) => error!(error = %err, "telemetry shutdown reported errors"),
                            Err(err) => error!(error = %err, "telemetry shutdown task panicked"),
                        }
                        return code;
                    }
                },
                _ = interrupt.recv() => {
                    // Signals only translate into a quit event; the queue
                    // arm above is the one that acts on it.
                    warn!("^C detected");
                    if events_tx.send(Event::Quit(0)).await.is_err() {
                        error!("event queue closed");
                    }
                }
                _ = terminate.recv() => {
                    warn!("termination requested");
                    if events_tx.send(Event::Quit(0)).await.is_err() {
                        error!("event queue closed");
                    }
                }
                _ = ticker.tick() => {
                    previous = observe_memory(started, previous);
                }
            }
        }
    }
}

/// Sample allocator statistics, logging when usage moved by more than
/// [`MEMORY_DELTA_BYTES`] since the last logged sample.
fn observe_memory(started: Instant, previous: Option<MemoryStats>) -> Option<MemoryStats> {
    let sample = match common_alloc::sample() {
        Ok(sample) => sample,
        Err(err) => {
            warn!(error = %err, "cannot read allocator statistics");
            return previous;
        }
    };

    if !worth_logging(previous.as_ref(), &sample) {
        return previous;
    }

    const MIB: u64 = 1024 * 1024;
    info!(
        allocated_mib = sample.allocated / MIB,
        active_mib = sample.active / MIB,
        resident_mib = sample.resident / MIB,
        uptime_hours = started.elapsed().as_secs_f64() / 3600.0,
        "memory usage"
    );
    Some(sample)
}

fn worth_logging(previous: Option<&MemoryStats>, current: &MemoryStats) -> bool {
    match previous {
        None => true,
        Some(previous) => current.allocated.abs_diff(previous.allocated) > MEMORY_DELTA_BYTES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn telemetry_with_counter(calls: Arc<AtomicUsize>) -> TelemetryShutdown {
        let mut telemetry = TelemetryShutdown::new();
        telemetry.register(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        telemetry
    }

    #[tokio::test]
    async fn quit_event_flushes_telemetry_and_returns_its_code() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = channel();
        let supervisor = Supervisor::new(tx.clone(), rx, telemetry_with_counter(calls.clone()));

        tx.send(Event::Quit(3)).await.unwrap();

        assert_eq!(supervisor.run().await, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn only_the_first_quit_event_is_acted_on() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = channel();
        let supervisor = Supervisor::new(tx.clone(), rx, telemetry_with_counter(calls.clone()));

        tx.send(Event::Quit(0)).await.unwrap();
        tx.send(Event::Quit(7)).await.unwrap();

        assert_eq!(supervisor.run().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_sample_is_always_logged() {
        let sample = MemoryStats {
            allocated: 10,
            active: 10,
            resident: 10,
        };
        assert!(worth_logging(None, &sample));
    }

    #[test]
    fn small_allocation_deltas_stay_quiet() {
        let previous = MemoryStats {
            allocated: 10 * 1024 * 1024,
            active: 0,
            resident: 0,
        };
        let current = MemoryStats {
            allocated: previous.allocated + MEMORY_DELTA_BYTES,
            ..previous
        };
        assert!(!worth_logging(Some(&previous), &current));
    }

    #[test]
    fn large_allocation_deltas_are_logged_in_both_directions() {
        let previous = MemoryStats {
            allocated: 10 * 1024 * 1024,
            active: 0,
            resident: 0,
        };
        let grown = MemoryStats {
            allocated: previous.allocated + MEMORY_DELTA_BYTES + 1,
            ..previous
        };
        let shrunk = MemoryStats {
            allocated: previous.allocated - MEMORY_DELTA_BYTES - 1,
            ..previous
        };
        assert!(worth_logging(Some(&previous), &grown));
        assert!(worth_logging(Some(&previous), &shrunk));
    }
}
