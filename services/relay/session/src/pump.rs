//! Background thread that keeps a shared network pumped.

use crate::network::P2pNetwork;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Default pause between pump passes
pub const DEFAULT_PUMP_INTERVAL: Duration = Duration::from_millis(10);

/// Calls [`P2pNetwork::run_callbacks`] on a fixed interval until stopped.
///
/// The network lock is held only for the duration of one pass, so other
/// threads can send and read in between.
#[derive(Debug)]
pub struct EventPump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventPump {
    /// Start pumping `network` every `interval`
    pub fn spawn(network: Arc<Mutex<P2pNetwork>>, interval: Duration) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("relay-pump".to_string())
            .spawn(move || {
                debug!("Event pump started (interval {:?})", interval);
                while !flag.load(Ordering::Acquire) {
                    network.lock().run_callbacks();
                    thread::sleep(interval);
                }
                debug!("Event pump stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Whether the pump thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Signal the thread to exit and wait for it
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.stop();
    }
}
