use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::error::PieceError;
use crate::piece::{Bitfield, BlockRequest, BlockState, PeerId, Piece};

/// A verified piece, ready to be written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPiece {
    pub index: usize,
    pub data: Vec<u8>,
}

/// What happened to a piece after a block was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The block was stored; the piece still has outstanding blocks.
    Stored,
    /// The last block arrived and the piece hash checked out.
    Verified(CompletedPiece),
    /// The last block arrived but the hash did not match; the piece is
    /// back in the missing queue with every block cleared.
    Requeued { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceQueue {
    Missing,
    Ongoing,
    Complete,
}

/// Download bookkeeping shared by every peer worker.
///
/// Each piece lives in exactly one of the `missing`, `ongoing` and `complete`
/// queues. Pieces move `missing -> ongoing -> complete`, and fall back from
/// `ongoing` to `missing` when their hash check fails or their owning peer
/// goes away. `missing` is kept sorted by piece index.
///
/// The manager does no I/O; wrap it in a [`PieceScheduler`] to share it
/// between tasks.
///
/// [`PieceScheduler`]: crate::piece::PieceScheduler
#[derive(Debug)]
pub struct PieceManager {
    pieces_hash: Vec<[u8; 20]>,
    piece_length: u32,
    total_length: u64,
    missing: Vec<Piece>,
    ongoing: Vec<Piece>,
    complete: Vec<Piece>,
    peer_bitfields: HashMap<PeerId, Bitfield>,
}

impl PieceManager {
    /// Splits the content into pieces of `piece_length` bytes (the last one
    /// holding the remainder) and queues all of them as missing.
    pub fn new(
        pieces_hash: Vec<[u8; 20]>,
        piece_length: u32,
        total_length: u64,
    ) -> Result<Self, PieceError> {
        if piece_length == 0 {
            return Err(PieceError::config("piece length must be positive"));
        }
        if pieces_hash.is_empty() {
            return Err(PieceError::config("torrent has no pieces"));
        }

        let piece_count = pieces_hash.len() as u64;
        let full_pieces_length = (piece_count - 1) * u64::from(piece_length);
        if total_length <= full_pieces_length
            || total_length > full_pieces_length + u64::from(piece_length)
        {
            return Err(PieceError::config(format!(
                "total length {total_length} does not fit {piece_count} pieces of {piece_length} bytes"
            )));
        }

        let last_index = pieces_hash.len() - 1;
        let missing = pieces_hash
            .iter()
            .enumerate()
            .map(|(index, hash)| {
                let length = if index < last_index {
                    piece_length
                } else {
                    // Bounded by piece_length by the check above.
                    (total_length - full_pieces_length) as u32
                };
                Piece::new(index, *hash, length)
            })
            .collect();

        debug!(
            pieces = pieces_hash.len(),
            piece_length, total_length, "piece manager initialised"
        );

        Ok(Self {
            pieces_hash,
            piece_length,
            total_length,
            missing,
            ongoing: Vec::new(),
            complete: Vec::new(),
            peer_bitfields: HashMap::new(),
        })
    }

    pub fn total_pieces(&self) -> usize {
        self.pieces_hash.len()
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Records which pieces `peer` holds, replacing anything known before.
    pub fn update_peer_bitfield(&mut self, peer: PeerId, bitfield: Bitfield) {
        self.peer_bitfields.insert(peer, bitfield);
    }

    /// Records a single piece announced by `peer`.
    pub fn peer_has_piece(&mut self, peer: PeerId, index: usize) {
        let total = self.total_pieces();
        if index >= total {
            warn!(index, total, "ignoring announcement of unknown piece");
            return;
        }
        self.peer_bitfields
            .entry(peer)
            .or_insert_with(|| Bitfield::from_piece_count(total))
            .set_piece(index);
    }

    pub fn peer_bitfield(&self, peer: &PeerId) -> Option<&Bitfield> {
        self.peer_bitfields.get(peer)
    }

    /// Picks the next block to request from `peer` and marks it requested.
    ///
    /// A peer keeps working on the piece it already owns. Otherwise it takes
    /// the lowest-index missing piece it has. Returns `None` when the peer
    /// has nothing useful, or when every block of its piece is already
    /// requested.
    pub fn next_request(&mut self, peer: &PeerId) -> Option<BlockRequest> {
        if let Some(piece) = self
            .ongoing
            .iter_mut()
            .find(|p| p.owner.as_ref() == Some(peer))
        {
            return piece.claim_next_block();
        }

        let bitfield = self.peer_bitfields.get(peer)?;
        let position = self
            .missing
            .iter()
            .position(|p| bitfield.has_piece(p.index))?;

        let mut piece = self.missing.remove(position);
        piece.owner = Some(*peer);
        debug!(piece = piece.index, "piece claimed by peer");

        let request = piece.claim_next_block();
        self.ongoing.push(piece);
        request
    }

    /// Accepts the payload answering `expected`.
    ///
    /// Returns an error, leaving every queue and block untouched, when the
    /// payload does not match the request that solicited it or when its piece
    /// is not currently in progress.
    pub fn receive_block(
        &mut self,
        piece_index: usize,
        offset: u32,
        data: Vec<u8>,
        expected: &BlockRequest,
    ) -> Result<BlockOutcome, PieceError> {
        let received = BlockRequest {
            piece_index,
            offset,
            length: u32::try_from(data.len()).unwrap_or(u32::MAX),
        };
        if received != *expected {
            warn!(?expected, ?received, "dropping block that does not match request");
            return Err(PieceError::Mismatch {
                expected: *expected,
                received,
            });
        }

        let Some(position) = self.ongoing.iter().position(|p| p.index == piece_index) else {
            debug!(piece = piece_index, "dropping block for piece not in progress");
            return Err(PieceError::UnknownPiece { index: piece_index });
        };

        let piece = &mut self.ongoing[position];
        piece.store_block(offset, data)?;
        if !piece.is_complete() {
            return Ok(BlockOutcome::Stored);
        }

        let mut piece = self.ongoing.remove(position);
        if piece.hash_matches() {
            piece.owner = None;
            let data = piece.take_data();
            info!(piece = piece_index, bytes = data.len(), "piece verified");
            self.complete.push(piece);
            Ok(BlockOutcome::Verified(CompletedPiece {
                index: piece_index,
                data,
            }))
        } else {
            warn!(piece = piece_index, "piece hash mismatch, requeueing");
            piece.reset();
            self.requeue(piece);
            Ok(BlockOutcome::Requeued { index: piece_index })
        }
    }

    /// Returns an expired request's block to the missing state so it can be
    /// asked for again. Returns whether anything changed.
    pub fn request_timed_out(&mut self, request: &BlockRequest) -> bool {
        self.ongoing
            .iter_mut()
            .find(|p| p.index == request.piece_index)
            .is_some_and(|p| {
                p.blocks
                    .iter()
                    .any(|b| b.offset == request.offset && b.length == request.length)
                    && p.release_block(request.offset)
            })
    }

    /// Forgets `peer` and releases the piece it owned, if any. Returns the
    /// index of the released piece.
    pub fn peer_disconnected(&mut self, peer: &PeerId) -> Option<usize> {
        self.peer_bitfields.remove(peer);

        let position = self
            .ongoing
            .iter()
            .position(|p| p.owner.as_ref() == Some(peer))?;
        let mut piece = self.ongoing.remove(position);
        let index = piece.index;
        piece.reset();
        self.requeue(piece);
        info!(piece = index, "released piece of disconnected peer");
        Some(index)
    }

    fn requeue(&mut self, piece: Piece) {
        let position = self
            .missing
            .binary_search_by_key(&piece.index, |p| p.index)
            .unwrap_or_else(|p| p);
        self.missing.insert(position, piece);
    }

    pub fn queue_of(&self, index: usize) -> Option<PieceQueue> {
        if self.missing.iter().any(|p| p.index == index) {
            Some(PieceQueue::Missing)
        } else if self.ongoing.iter().any(|p| p.index == index) {
            Some(PieceQueue::Ongoing)
        } else if self.complete.iter().any(|p| p.index == index) {
            Some(PieceQueue::Complete)
        } else {
            None
        }
    }

    pub fn piece(&self, index: usize) -> Option<&Piece> {
        self.missing
            .iter()
            .chain(&self.ongoing)
            .chain(&self.complete)
            .find(|p| p.index == index)
    }

    pub fn pieces(&self) -> impl Iterator<Item = &Piece> {
        self.missing.iter().chain(&self.ongoing).chain(&self.complete)
    }

    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }

    pub fn ongoing_count(&self) -> usize {
        self.ongoing.len()
    }

    pub fn complete_count(&self) -> usize {
        self.complete.len()
    }

    /// Has all pieces?
    pub fn is_complete(&self) -> bool {
        self.complete.len() == self.total_pieces()
    }

    /// How many pieces downloaded
    pub fn progress(&self) -> usize {
        self.complete.len()
    }

    /// Fraction of a piece's blocks that have arrived.
    pub fn piece_progress(&self, index: usize) -> f64 {
        match self.queue_of(index) {
            Some(PieceQueue::Complete) => 1.0,
            Some(PieceQueue::Ongoing) => self
                .ongoing
                .iter()
                .find(|p| p.index == index)
                .map_or(0.0, |p| p.present_blocks() as f64 / p.blocks.len() as f64),
            _ => 0.0,
        }
    }

    pub fn total_blocks(&self) -> usize {
        self.pieces().map(|p| p.blocks.len()).sum()
    }

    pub fn completed_blocks(&self) -> usize {
        self.pieces().map(Piece::present_blocks).sum()
    }

    /// Blocks requested from peers and not yet answered.
    pub fn requested_blocks(&self) -> Vec<BlockRequest> {
        self.ongoing
            .iter()
            .flat_map(|p| &p.blocks)
            .filter(|b| b.state == BlockState::Requested)
            .map(|b| b.request())
            .collect()
    }
}
