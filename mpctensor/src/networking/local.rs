//! Networking implementation for local (debugging) execution.
//!
//! Every party runs on its own thread and values travel as bincode encoded
//! buffers over in-memory channels, one per ordered pair of ranks.

use super::Communicator;
use crate::error::{Error, Result};
use crate::ring::RingTensor;
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

pub struct LocalNetwork;

impl LocalNetwork {
    /// Create `world_size` fully connected communicators, indexed by rank.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(world_size: usize) -> Vec<LocalCommunicator> {
        let mut senders: Vec<Vec<UnboundedSender<Vec<u8>>>> = vec![Vec::new(); world_size];
        let mut receivers: Vec<Vec<Mutex<UnboundedReceiver<Vec<u8>>>>> =
            (0..world_size).map(|_| Vec::new()).collect();
        // channel (src, dst) is pushed to senders[src][dst] and receivers[dst][src]
        for src_senders in senders.iter_mut() {
            for dst_receivers in receivers.iter_mut() {
                let (tx, rx) = unbounded_channel();
                src_senders.push(tx);
                dst_receivers.push(Mutex::new(rx));
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| LocalCommunicator {
                rank,
                senders,
                receivers,
            })
            .collect()
    }
}

pub struct LocalCommunicator {
    rank: usize,
    senders: Vec<UnboundedSender<Vec<u8>>>,
    receivers: Vec<Mutex<UnboundedReceiver<Vec<u8>>>>,
}

impl LocalCommunicator {
    fn check_peer(&self, peer: usize) -> Result<()> {
        if peer >= self.senders.len() {
            return Err(Error::Communication(format!(
                "rank {} outside world of size {}",
                peer,
                self.senders.len()
            )));
        }
        Ok(())
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, dst: usize, value: &RingTensor) -> Result<()> {
        self.check_peer(dst)?;
        let bytes = bincode::serialize(value).map_err(|e| Error::Communication(e.to_string()))?;
        tracing::trace!("rank {} sending {} bytes to {}", self.rank, bytes.len(), dst);
        self.senders[dst].send(bytes).map_err(|_| {
            tracing::error!("rank {} lost its channel to {}", self.rank, dst);
            Error::Communication(format!("channel from {} to {} is closed", self.rank, dst))
        })
    }

    fn recv(&self, src: usize) -> Result<RingTensor> {
        self.check_peer(src)?;
        let bytes = self.receivers[src].lock().blocking_recv().ok_or_else(|| {
            tracing::error!("rank {} lost its channel from {}", self.rank, src);
            Error::Communication(format!("channel from {} to {} is closed", src, self.rank))
        })?;
        bincode::deserialize(&bytes).map_err(|e| Error::Communication(e.to_string()))
    }
}
