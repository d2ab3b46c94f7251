//! Main-thread job queue.
//!
//! The oracle is owned by one thread. Worker threads never touch it; they
//! post jobs here and the owner runs them with exclusive access.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::oracle::SymbolOracle;

type MainJob = Box<dyn FnOnce(&mut dyn SymbolOracle) + Send>;

/// Receiving side, held by the thread that owns the oracle.
pub struct MainQueue {
    sender: Sender<MainJob>,
    receiver: Receiver<MainJob>,
}

/// Cloneable posting side handed to worker threads.
#[derive(Clone)]
pub struct MainHandle {
    sender: Sender<MainJob>,
}

impl Default for MainQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MainQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn handle(&self) -> MainHandle {
        MainHandle { sender: self.sender.clone() }
    }

    /// Wait up to `timeout` for one job and run it. Returns whether a job ran.
    pub fn run_next_timeout(&self, oracle: &mut dyn SymbolOracle, timeout: Duration) -> bool {
        // The queue keeps a sender alive, so the only failure is a timeout.
        match self.receiver.recv_timeout(timeout) {
            Ok(job) => {
                job(oracle);
                true
            }
            Err(_) => false,
        }
    }

    /// Run every job already queued; returns how many ran.
    pub fn run_pending(&self, oracle: &mut dyn SymbolOracle) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.receiver.try_recv() {
            job(&mut *oracle);
            ran += 1;
        }
        ran
    }
}

impl MainHandle {
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce(&mut dyn SymbolOracle) + Send + 'static,
    {
        // The queue owns a sender too, so this only fails once it is dropped.
        let _ = self.sender.send(Box::new(job));
    }
}
