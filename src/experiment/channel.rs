use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flume::{Receiver, Sender};

use super::data::Sample;

/// Producer side of the sample stream.
#[derive(Debug, Clone)]
pub struct SampleSender {
    tx: Sender<Sample>,
}

/// Consumer side of the sample stream.
#[derive(Debug)]
pub struct SampleReceiver {
    rx: Receiver<Sample>,
}

/// Unbounded FIFO from the discharge worker to whoever displays the samples.
pub fn sample_channel() -> (SampleSender, SampleReceiver) {
    let (tx, rx) = flume::unbounded::<Sample>();
    (SampleSender { tx }, SampleReceiver { rx })
}

impl SampleSender {
    /// Queues `sample` without blocking. Returns `false` once the receiver is gone.
    pub fn push(&self, sample: Sample) -> bool {
        self.tx.send(sample).is_ok()
    }
}

impl SampleReceiver {
    /// Takes the oldest queued sample, if any, without blocking.
    pub fn try_pop(&self) -> Option<Sample> {
        self.rx.try_recv().ok()
    }

    /// Takes every sample queued so far.
    pub fn drain(&self) -> Vec<Sample> {
        self.rx.try_iter().collect()
    }
}

/// Cooperative stop request shared between the caller and the discharge worker.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
