//! Real-time filter processor: one cooperative loop pulling sample
//! batches through per-channel filter chains.
//!
//! Output backpressure drops the oldest batch; callback panics are
//! contained and counted so one bad subscriber cannot stall the stream.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TrySendError};
use log::{error, warn};

use fc_types::error::{FcError, Result};
use fc_types::{FilteredSample, Sample};

use crate::filter::{create_filter, FilterChain, FilterConfig, FilterStats};

/// Samples pulled per loop iteration.
const BATCH: usize = 64;

/// Capacity of the filtered-batch output queue.
const OUTPUT_QUEUE: usize = 64;

type Callback = Box<dyn Fn(&[FilteredSample]) + Send>;

/// Counters shared with the loop thread.
#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    dropped_batches: AtomicU64,
    callback_errors: AtomicU64,
}

/// Snapshot of the processor's counters.
#[derive(Debug, Clone, Default)]
pub struct ProcessorStats {
    pub samples_processed: u64,
    pub dropped_batches: u64,
    pub callback_errors: u64,
}

/// Owns the per-channel chains and the processing loop.
pub struct FilterProcessor {
    chains: HashMap<u32, FilterChain>,
    callbacks: Vec<Callback>,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<HashMap<u32, FilterChain>>>,
    output: Option<Receiver<Vec<FilteredSample>>>,
}

impl FilterProcessor {
    pub fn new() -> Self {
        Self {
            chains: HashMap::new(),
            callbacks: Vec::new(),
            counters: Arc::new(Counters::default()),
            stop: Arc::new(AtomicBool::new(false)),
            join: None,
            output: None,
        }
    }

    /// Append a filter to `channel`'s chain. Only valid before `start`.
    pub fn add_filter(&mut self, channel: u32, config: &FilterConfig) -> Result<()> {
        if self.join.is_some() {
            return Err(FcError::invariant("processor already running"));
        }
        let filter = create_filter(config)?;
        self.chains.entry(channel).or_default().push(filter);
        Ok(())
    }

    /// Remove one filter from a channel's chain by position.
    pub fn remove_filter(&mut self, channel: u32, index: usize) -> Result<()> {
        if self.join.is_some() {
            return Err(FcError::invariant("processor already running"));
        }
        if let Some(chain) = self.chains.get_mut(&channel) {
            if chain.remove(index) {
                return Ok(());
            }
        }
        Err(FcError::validation(format!(
            "no filter {index} on channel {channel}"
        )))
    }

    /// Register a per-batch callback. A panicking callback is counted
    /// and skipped, not fatal.
    pub fn add_callback(&mut self, callback: Callback) {
        self.callbacks.push(callback);
    }

    pub fn chain_len(&self, channel: u32) -> usize {
        self.chains.get(&channel).map(FilterChain::len).unwrap_or(0)
    }

    /// Spawn the loop over `input`. Channels without a chain pass through.
    pub fn start(&mut self, input: Receiver<Sample>) -> Result<()> {
        if self.join.is_some() {
            return Err(FcError::invariant("processor already running"));
        }
        let mut chains = std::mem::take(&mut self.chains);
        let callbacks = std::mem::take(&mut self.callbacks);
        let counters = Arc::clone(&self.counters);
        let stop = Arc::clone(&self.stop);
        self.stop.store(false, Ordering::SeqCst);

        let (out_tx, out_rx) = bounded::<Vec<FilteredSample>>(OUTPUT_QUEUE);
        // The loop keeps its own receiver so it can shed the oldest batch
        // when consumers fall behind.
        let shed_rx = out_rx.clone();
        self.output = Some(out_rx);

        let join = thread::Builder::new()
            .name("fc-filter".into())
            .spawn(move || {
                loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let first = match input.recv_timeout(Duration::from_millis(100)) {
                        Ok(sample) => sample,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };

                    let mut batch = Vec::with_capacity(BATCH);
                    batch.push(first);
                    while batch.len() < BATCH {
                        match input.try_recv() {
                            Ok(sample) => batch.push(sample),
                            Err(_) => break,
                        }
                    }

                    let filtered: Vec<FilteredSample> = batch
                        .iter()
                        .map(|sample| match chains.get_mut(&sample.channel_id) {
                            Some(chain) => chain.process(sample),
                            None => FilteredSample {
                                sample: *sample,
                                filtered_value: sample.value,
                                group_delay: 0.0,
                                gain: 1.0,
                                processing_time: 0.0,
                            },
                        })
                        .collect();
                    counters
                        .processed
                        .fetch_add(filtered.len() as u64, Ordering::Relaxed);

                    for callback in &callbacks {
                        if catch_unwind(AssertUnwindSafe(|| callback(&filtered))).is_err() {
                            counters.callback_errors.fetch_add(1, Ordering::Relaxed);
                            warn!(target: "filter", "output callback panicked");
                        }
                    }

                    let mut pending = filtered;
                    loop {
                        match out_tx.try_send(pending) {
                            Ok(()) => break,
                            Err(TrySendError::Full(batch_back)) => {
                                // Drop-oldest: shed one queued batch and
                                // retry with the fresh one.
                                if shed_rx.try_recv().is_ok() {
                                    counters.dropped_batches.fetch_add(1, Ordering::Relaxed);
                                }
                                pending = batch_back;
                            }
                            Err(TrySendError::Disconnected(_)) => {
                                return chains;
                            }
                        }
                    }
                }
                chains
            })
            .map_err(|e| FcError::invariant(e.to_string()))?;
        self.join = Some(join);
        Ok(())
    }

    /// Stop the loop, joining and recovering the chains (with their
    /// accumulated statistics).
    pub fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            match join.join() {
                Ok(chains) => self.chains = chains,
                Err(_) => {
                    error!(target: "filter", "processor thread panicked");
                    return Err(FcError::invariant("processor thread panicked"));
                }
            }
        }
        Ok(())
    }

    /// Receiver of filtered batches.
    pub fn output(&self) -> Option<Receiver<Vec<FilteredSample>>> {
        self.output.clone()
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            samples_processed: self.counters.processed.load(Ordering::Relaxed),
            dropped_batches: self.counters.dropped_batches.load(Ordering::Relaxed),
            callback_errors: self.counters.callback_errors.load(Ordering::Relaxed),
        }
    }

    /// Per-filter statistics for one channel (valid when stopped).
    pub fn channel_stats(&self, channel: u32) -> Vec<FilterStats> {
        self.chains
            .get(&channel)
            .map(FilterChain::stats)
            .unwrap_or_default()
    }
}

impl Default for FilterProcessor {
    fn default() -> Self {
        Self::new()
    }
}
