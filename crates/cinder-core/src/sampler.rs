//! Progress sampler — a periodic poll on its own thread.
//!
//! The poll closure returns `false` to end the loop (the transport it
//! samples is gone). `stop` sets the flag and joins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct ProgressSampler {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressSampler {
    pub fn spawn<F>(period: Duration, mut poll: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                if !poll() {
                    break;
                }
                thread::sleep(period);
            }
            log::debug!("cinder: progress sampler exited");
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            // The poll may be the last owner of the transport and end up
            // dropping it on this very thread.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for ProgressSampler {
    fn drop(&mut self) {
        self.halt();
    }
}
