//! The flush loop: blocking flush and seal work on behalf of the control loop

use super::boundary::BoundaryFile;
use super::messages::FlushMessage;
use super::state::TableState;
use crate::segment::Segment;
use crate::Result;
use crossbeam_channel::{select, Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) struct FlushLoop {
    state: Arc<TableState>,
    requests: Receiver<FlushMessage>,
    /// Present when snapshots are enabled
    upper_bound: Option<BoundaryFile>,
}

impl FlushLoop {
    pub fn new(
        state: Arc<TableState>,
        requests: Receiver<FlushMessage>,
        upper_bound: Option<BoundaryFile>,
    ) -> Self {
        Self {
            state,
            requests,
            upper_bound,
        }
    }

    pub fn run(mut self) {
        let requests = self.requests.clone();
        let signal = self.state.fatal.signal().clone();

        loop {
            select! {
                recv(signal) -> _ => return,
                recv(requests) -> msg => match msg {
                    Ok(FlushMessage::Flush { segment, reply }) => self.handle_flush(&segment, reply),
                    Ok(FlushMessage::Seal { segment, now, reply }) => self.handle_seal(segment, now, reply),
                    Ok(FlushMessage::Shutdown { reply }) => {
                        debug!("Flush loop for table {} stopped", self.state.name);
                        let _ = reply.send(());
                        return;
                    }
                    Err(_) => return,
                },
            }
        }
    }

    fn handle_flush(&mut self, segment: &Segment, reply: Sender<()>) {
        let result = segment
            .flush()
            .and_then(|keys| self.state.write_keys_to_keymap(&keys));
        match result {
            Ok(()) => {
                let _ = reply.send(());
            }
            Err(e) => self.state.fatal.panic(e),
        }
    }

    fn handle_seal(&mut self, segment: Arc<Segment>, now: u64, reply: Sender<()>) {
        let result = segment
            .seal(now)
            .and_then(|keys| self.state.write_keys_to_keymap(&keys));
        if let Err(e) = result {
            self.state.fatal.panic(e);
            return;
        }

        // Once the control loop has its reply it may collect the segment, so
        // hold it alive until it has been linked into the snapshot tree.
        let reservation = segment.reserve_guard();
        let _ = reply.send(());

        if let Some(reservation) = reservation {
            if let Err(e) = self.snapshot(&reservation) {
                self.state.fatal.panic(e);
            }
        }
    }

    fn snapshot(&mut self, segment: &Segment) -> Result<()> {
        if let Some(upper_bound) = self.upper_bound.as_mut() {
            segment.snapshot()?;
            upper_bound.update(segment.index())?;
            debug!(
                "Snapshotted segment {} of table {}",
                segment.index(),
                self.state.name
            );
        }
        Ok(())
    }
}

/// Link every sealed segment above the lower bound into the snapshot tree.
/// Used on open, when segments sealed by an earlier process may be missing.
pub(crate) fn snapshot_existing(
    segments: &[Arc<Segment>],
    lower_bound: &BoundaryFile,
    upper_bound: &mut BoundaryFile,
) -> Result<()> {
    let mut linked = 0;
    for segment in segments {
        if !segment.is_sealed() {
            continue;
        }
        if lower_bound.is_defined() && segment.index() <= lower_bound.index() {
            continue;
        }
        segment.snapshot()?;
        upper_bound.update(segment.index())?;
        linked += 1;
    }
    if linked > 0 {
        info!("Linked {} existing segment(s) into the snapshot tree", linked);
    }
    Ok(())
}
