//! PlayGate — one start/stop in flight per backend instance.
//!
//! Every engine call runs while holding `op`, so a new request waits for the
//! in-flight one to settle. Each stop bumps `epoch`; a start that observes a
//! different epoch once it gets the lock was superseded and never reaches the
//! engine. After `close` the gate refuses every start.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{Result, TransportError};

#[derive(Default)]
pub struct PlayGate {
    op: Mutex<()>,
    epoch: AtomicU64,
    closed: AtomicBool,
}

impl PlayGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a start operation once any in-flight operation has settled.
    ///
    /// Returns `BackendCancelled` without calling `op` if a stop or close
    /// was requested after this start.
    pub fn start<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), String>,
    {
        let ticket = self.epoch.load(Ordering::SeqCst);
        let _in_flight = self.op.lock();
        if self.closed.load(Ordering::SeqCst) || self.epoch.load(Ordering::SeqCst) != ticket {
            return Err(TransportError::BackendCancelled);
        }
        op().map_err(TransportError::BackendStartFailed)
    }

    /// Supersede pending starts, then run the stop once the gate is free.
    pub fn stop<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), String>,
    {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let _in_flight = self.op.lock();
        op().map_err(TransportError::BackendStopFailed)
    }

    /// Final stop. Later starts are cancelled.
    pub fn close<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), String>,
    {
        self.closed.store(true, Ordering::SeqCst);
        self.stop(op)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn start_and_stop_pass_through() {
        let gate = PlayGate::new();
        assert_eq!(gate.start(|| Ok(())), Ok(()));
        assert_eq!(gate.stop(|| Ok(())), Ok(()));
        assert_eq!(gate.start(|| Ok(())), Ok(()));
    }

    #[test]
    fn failures_are_classified() {
        let gate = PlayGate::new();
        assert_eq!(
            gate.start(|| Err("no device".into())),
            Err(TransportError::BackendStartFailed("no device".into()))
        );
        assert_eq!(
            gate.stop(|| Err("stuck".into())),
            Err(TransportError::BackendStopFailed("stuck".into()))
        );
    }

    #[test]
    fn stop_waits_for_in_flight_start() {
        let gate = Arc::new(PlayGate::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let starter = {
            let gate = Arc::clone(&gate);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                gate.start(|| {
                    log.lock().push("start-begin");
                    thread::sleep(Duration::from_millis(80));
                    log.lock().push("start-end");
                    Ok(())
                })
            })
        };

        thread::sleep(Duration::from_millis(20));
        gate.stop(|| {
            log.lock().push("stop");
            Ok(())
        })
        .unwrap();

        assert_eq!(starter.join().unwrap(), Ok(()));
        assert_eq!(*log.lock(), vec!["start-begin", "start-end", "stop"]);
    }

    #[test]
    fn queued_start_is_cancelled_by_later_stop() {
        let gate = Arc::new(PlayGate::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        // A slow stop holds the gate.
        let first_stop = {
            let gate = Arc::clone(&gate);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                gate.stop(|| {
                    thread::sleep(Duration::from_millis(100));
                    log.lock().push("stop-1");
                    Ok(())
                })
            })
        };
        thread::sleep(Duration::from_millis(20));

        // The start queues behind it...
        let start = {
            let gate = Arc::clone(&gate);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                gate.start(|| {
                    log.lock().push("start");
                    Ok(())
                })
            })
        };
        thread::sleep(Duration::from_millis(20));

        // ...and is superseded before it ever runs.
        gate.stop(|| {
            log.lock().push("stop-2");
            Ok(())
        })
        .unwrap();

        first_stop.join().unwrap().unwrap();
        assert_eq!(start.join().unwrap(), Err(TransportError::BackendCancelled));
        assert!(!log.lock().contains(&"start"));
    }

    #[test]
    fn closed_gate_refuses_starts() {
        let gate = PlayGate::new();
        gate.close(|| Ok(())).unwrap();
        assert!(gate.is_closed());
        let mut called = false;
        let result = gate.start(|| {
            called = true;
            Ok(())
        });
        assert_eq!(result, Err(TransportError::BackendCancelled));
        assert!(!called);
    }
}
