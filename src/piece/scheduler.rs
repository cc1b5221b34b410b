use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use crate::error::PieceError;
use crate::piece::{
    Bitfield, BlockOutcome, BlockRequest, CompletedPiece, PeerId, PieceManager,
};

/// Receives every verified piece exactly once.
///
/// Called outside the scheduler lock, but still on the peer task that
/// delivered the last block, so implementations should hand the data off
/// rather than write it in place.
pub trait PieceSink: Send + Sync {
    fn on_piece_complete(&self, piece: CompletedPiece);
}

impl PieceSink for mpsc::UnboundedSender<CompletedPiece> {
    fn on_piece_complete(&self, piece: CompletedPiece) {
        let index = piece.index;
        if self.send(piece).is_err() {
            warn!(piece = index, "piece sink closed, dropping verified piece");
        }
    }
}

/// Result of handing a block to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Stored,
    /// The piece verified and was passed to the sink.
    Completed { index: usize },
    /// The piece failed its hash check and will be downloaded again.
    Requeued { index: usize },
}

/// Cloneable handle to a [`PieceManager`] shared by all peer workers.
///
/// Every call takes the lock for the duration of one bookkeeping step, so
/// queue moves and block state changes are atomic with respect to other
/// peers.
#[derive(Clone)]
pub struct PieceScheduler {
    manager: Arc<Mutex<PieceManager>>,
    sink: Arc<dyn PieceSink>,
}

impl PieceScheduler {
    pub fn new(manager: PieceManager, sink: impl PieceSink + 'static) -> Self {
        Self {
            manager: Arc::new(Mutex::new(manager)),
            sink: Arc::new(sink),
        }
    }

    /// Builds a scheduler whose verified pieces arrive on the returned channel.
    pub fn with_channel(manager: PieceManager) -> (Self, mpsc::UnboundedReceiver<CompletedPiece>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(manager, tx), rx)
    }

    pub async fn update_peer_bitfield(&self, peer: PeerId, bitfield: Bitfield) {
        self.manager.lock().await.update_peer_bitfield(peer, bitfield);
    }

    pub async fn peer_has_piece(&self, peer: PeerId, index: usize) {
        self.manager.lock().await.peer_has_piece(peer, index);
    }

    pub async fn next_request(&self, peer: &PeerId) -> Option<BlockRequest> {
        self.manager.lock().await.next_request(peer)
    }

    pub async fn receive_block(
        &self,
        piece_index: usize,
        offset: u32,
        data: Vec<u8>,
        expected: &BlockRequest,
    ) -> Result<Delivery, PieceError> {
        let outcome = self
            .manager
            .lock()
            .await
            .receive_block(piece_index, offset, data, expected)?;

        Ok(match outcome {
            BlockOutcome::Stored => Delivery::Stored,
            BlockOutcome::Requeued { index } => Delivery::Requeued { index },
            BlockOutcome::Verified(piece) => {
                let index = piece.index;
                self.sink.on_piece_complete(piece);
                Delivery::Completed { index }
            }
        })
    }

    pub async fn request_timed_out(&self, request: &BlockRequest) -> bool {
        self.manager.lock().await.request_timed_out(request)
    }

    pub async fn peer_disconnected(&self, peer: &PeerId) -> Option<usize> {
        self.manager.lock().await.peer_disconnected(peer)
    }

    pub async fn is_complete(&self) -> bool {
        self.manager.lock().await.is_complete()
    }

    /// Returns (complete pieces, total pieces).
    pub async fn progress(&self) -> (usize, usize) {
        let manager = self.manager.lock().await;
        (manager.progress(), manager.total_pieces())
    }

    /// Runs `f` against the manager under the lock.
    pub async fn with_manager<R>(&self, f: impl FnOnce(&PieceManager) -> R) -> R {
        f(&*self.manager.lock().await)
    }
}
