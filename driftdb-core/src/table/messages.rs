//! Requests exchanged with the control and flush loops
//!
//! Requests that need an answer carry their own single-slot reply channel.

use crate::segment::Segment;
use crate::KvPair;
use crossbeam_channel::Sender;
use std::sync::Arc;

pub(crate) enum ControlMessage {
    /// Append pairs to the mutable segment
    Write { pairs: Vec<KvPair> },
    /// Make everything written so far durable; answered by the flush loop
    Flush { reply: Sender<()> },
    /// Persist a new sharding factor and start a segment that uses it
    SetShardingFactor { sharding_factor: u32, reply: Sender<()> },
    /// Garbage collect expired segments now
    RunGc { reply: Sender<()> },
    /// Stop both loops and seal the mutable segment
    Shutdown { reply: Sender<()> },
}

pub(crate) enum FlushMessage {
    /// Flush `segment` and publish its durable keys
    Flush {
        segment: Arc<Segment>,
        reply: Sender<()>,
    },
    /// Seal `segment` at `now`, publish its durable keys, then snapshot it
    Seal {
        segment: Arc<Segment>,
        now: u64,
        reply: Sender<()>,
    },
    /// Exit the flush loop
    Shutdown { reply: Sender<()> },
}
