//! Background expiration.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;

use crate::manager::ContinuationManager;

/// Sweeps a manager every `sweep_interval` on a dedicated thread until
/// dropped.
#[derive(Debug)]
pub struct Sweeper {
    stop: Option<mpsc::Sender<()>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn(manager: Arc<ContinuationManager>) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let interval = manager.config().sweep_interval;
        let worker = thread::Builder::new()
            .name("reprise-sweeper".to_owned())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            manager.sweep();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("sweeper stopped");
            })?;
        Ok(Self {
            stop: Some(stop),
            worker: Some(worker),
        })
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        // Dropping the sender wakes the worker.
        self.stop.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("sweeper thread panicked");
        }
    }
}
