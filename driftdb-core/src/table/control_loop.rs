//! The control loop: sole owner of segment structure
//!
//! Requests are handled one at a time in arrival order. The loop never
//! waits on disk itself; flushing and sealing are handed to the flush loop.

use super::messages::{ControlMessage, FlushMessage};
use super::state::TableState;
use super::Clock;
use crate::segment::{Segment, SegmentPath, WriteStats};
use crate::{DriftError, KvPair, Result};
use crossbeam_channel::{bounded, never, select, tick, Receiver, Sender};
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Thresholds that end a segment's mutable life
#[derive(Debug, Clone, Copy)]
pub(crate) struct SegmentLimits {
    pub target_segment_file_size: u32,
    pub max_segment_key_count: u32,
    pub target_key_file_size: u64,
}

impl SegmentLimits {
    fn exceeded_by(&self, stats: &WriteStats) -> bool {
        stats.max_shard_size > u64::from(self.target_segment_file_size)
            || stats.key_count >= self.max_segment_key_count
            || stats.key_file_size >= self.target_key_file_size
    }
}

pub(crate) struct ControlLoop {
    state: Arc<TableState>,
    requests: Receiver<ControlMessage>,
    flush_tx: Sender<FlushMessage>,
    paths: Vec<SegmentPath>,
    limits: SegmentLimits,
    gc_period: Duration,
    gc_batch_size: usize,
    fsync: bool,
    clock: Clock,
    rng: StdRng,

    lowest: u32,
    highest: u32,
    mutable: Arc<Segment>,
    /// Bytes held by sealed segments
    immutable_size: u64,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<TableState>,
        requests: Receiver<ControlMessage>,
        flush_tx: Sender<FlushMessage>,
        paths: Vec<SegmentPath>,
        limits: SegmentLimits,
        gc_period: Duration,
        gc_batch_size: usize,
        fsync: bool,
        clock: Clock,
        rng: StdRng,
        lowest: u32,
        mutable: Arc<Segment>,
        immutable_size: u64,
    ) -> Self {
        let highest = mutable.index();
        let control_loop = Self {
            state,
            requests,
            flush_tx,
            paths,
            limits,
            gc_period,
            gc_batch_size,
            fsync,
            clock,
            rng,
            lowest,
            highest,
            mutable,
            immutable_size,
        };
        control_loop.publish_size();
        control_loop
    }

    pub fn run(mut self) {
        let requests = self.requests.clone();
        let signal = self.state.fatal.signal().clone();
        let ticker = if self.gc_period.is_zero() {
            never()
        } else {
            tick(self.gc_period)
        };

        loop {
            select! {
                recv(signal) -> _ => {
                    info!("Control loop for table {} exiting after fatal error", self.state.name);
                    return;
                }
                recv(requests) -> msg => match msg {
                    Ok(msg) => {
                        if self.handle(msg) {
                            return;
                        }
                    }
                    Err(_) => return,
                },
                recv(ticker) -> _ => self.run_gc(),
            }
        }
    }

    /// Returns true once the loop should exit
    fn handle(&mut self, msg: ControlMessage) -> bool {
        match msg {
            ControlMessage::Write { pairs } => self.handle_write(pairs),
            ControlMessage::Flush { reply } => self.handle_flush(reply),
            ControlMessage::SetShardingFactor {
                sharding_factor,
                reply,
            } => {
                let result = self.set_sharding_factor(sharding_factor);
                if self.report(result) {
                    let _ = reply.send(());
                }
            }
            ControlMessage::RunGc { reply } => {
                self.run_gc();
                let _ = reply.send(());
            }
            ControlMessage::Shutdown { reply } => {
                let result = self.shutdown();
                if self.report(result) {
                    let _ = reply.send(());
                }
                return true;
            }
        }
        false
    }

    /// Trip the fatal flag on error. Returns whether `result` was Ok.
    fn report(&self, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                self.state.fatal.panic(e);
                false
            }
        }
    }

    fn handle_write(&mut self, pairs: Vec<KvPair>) {
        for pair in &pairs {
            let stats = match self.mutable.write(pair) {
                Ok(stats) => stats,
                Err(e) => {
                    self.state.fatal.panic(e);
                    return;
                }
            };

            if self.limits.exceeded_by(&stats) {
                let result = self.expand_segments();
                if !self.report(result) {
                    return;
                }
            }
        }
        self.publish_size();
    }

    fn handle_flush(&mut self, reply: Sender<()>) {
        let msg = FlushMessage::Flush {
            segment: self.mutable.clone(),
            reply,
        };
        let result = self.state.fatal.send(&self.flush_tx, msg);
        self.report(result);
    }

    /// Seal the mutable segment and start the next one.
    ///
    /// Blocks until the flush loop has sealed the old segment, so segment
    /// structure never changes while a seal is in flight.
    fn expand_segments(&mut self) -> Result<()> {
        let now = self.clock.now();
        let (reply_tx, reply_rx) = bounded(1);
        self.state.fatal.send(
            &self.flush_tx,
            FlushMessage::Seal {
                segment: self.mutable.clone(),
                now,
                reply: reply_tx,
            },
        )?;
        self.state.fatal.await_reply(&reply_rx)?;
        self.immutable_size += self.mutable.size();

        let index = self.highest.checked_add(1).ok_or_else(|| {
            DriftError::Internal("segment index space exhausted".into())
        })?;
        let segment = Segment::create(
            index,
            &self.paths,
            self.state.metadata.sharding_factor(),
            self.rng.gen(),
            self.state.fatal.clone(),
            self.fsync,
        )?;
        self.mutable.set_next(segment.clone())?;
        self.state.segments.write().insert(index, segment.clone());

        debug!(
            "Table {} sealed segment {} and started segment {}",
            self.state.name, self.highest, index
        );
        self.highest = index;
        self.mutable = segment;
        self.state.set_range(self.lowest, self.highest);
        self.publish_size();
        Ok(())
    }

    fn set_sharding_factor(&mut self, sharding_factor: u32) -> Result<()> {
        if sharding_factor == self.state.metadata.sharding_factor() {
            return Ok(());
        }
        self.state.metadata.set_sharding_factor(sharding_factor)?;
        info!(
            "Table {} sharding factor is now {}",
            self.state.name, sharding_factor
        );
        self.expand_segments()
    }

    fn run_gc(&mut self) {
        let result = self.collect_garbage();
        self.report(result);
    }

    /// Delete sealed segments whose age exceeds the TTL, oldest first.
    /// Stops at the first segment that is unsealed or too young.
    fn collect_garbage(&mut self) -> Result<()> {
        let ttl = self.state.metadata.ttl();
        if ttl.is_zero() {
            return Ok(());
        }
        let ttl_ns = u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX);
        let now = self.clock.now();

        let mut collected = 0;
        while self.lowest < self.highest {
            let segment = self.state.segments.read().get(&self.lowest).cloned();
            let segment = segment.ok_or_else(|| {
                DriftError::Internal(format!("segment {} is not tracked", self.lowest))
            })?;

            if !segment.is_sealed() {
                break;
            }
            if now.saturating_sub(segment.seal_time()) < ttl_ns {
                break;
            }

            let keys = segment.get_keys()?;
            for batch in keys.chunks(self.gc_batch_size) {
                self.state.keymap.delete(batch)?;
            }

            self.immutable_size = self.immutable_size.saturating_sub(segment.size());
            self.state
                .key_count
                .fetch_sub(i64::from(segment.key_count()), Ordering::SeqCst);
            self.state.segments.write().remove(&self.lowest);
            segment.release();

            debug!(
                "Table {} collected segment {} with {} keys",
                self.state.name,
                self.lowest,
                keys.len()
            );
            self.lowest += 1;
            collected += 1;
        }

        if collected > 0 {
            info!(
                "Table {} garbage collected {} segment(s), lowest segment is now {}",
                self.state.name, collected, self.lowest
            );
            self.state.set_range(self.lowest, self.highest);
            self.publish_size();
        }
        Ok(())
    }

    /// Stop the flush loop, seal the mutable segment, publish its keys, and stop the keymap
    fn shutdown(&mut self) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.state
            .fatal
            .send(&self.flush_tx, FlushMessage::Shutdown { reply: reply_tx })?;
        self.state.fatal.await_reply(&reply_rx)?;

        let keys = self.mutable.seal(self.clock.now())?;
        self.state.write_keys_to_keymap(&keys)?;
        self.state.keymap.stop()?;

        info!(
            "Control loop for table {} stopped at segment {}",
            self.state.name, self.highest
        );
        Ok(())
    }

    fn publish_size(&self) {
        let size = self.immutable_size + self.mutable.size() + self.state.metadata.size();
        self.state.size.store(size, Ordering::SeqCst);
    }
}
