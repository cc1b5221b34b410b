//! Piece acquisition: the block/piece model, peer availability and the
//! scheduler deciding which block to request from which peer.

pub mod bitfield;
pub mod block;
pub mod manager;
pub mod scheduler;

pub use bitfield::Bitfield;
pub use block::{Block, BlockRequest, BlockState, Piece};
pub use manager::{BlockOutcome, CompletedPiece, PieceManager, PieceQueue};
pub use scheduler::{Delivery, PieceScheduler, PieceSink};

pub const PIECE_BLOCK_SIZE: u32 = 16384; // 16KB blocks

/// Identifies a remote peer, as announced in its handshake.
pub type PeerId = [u8; 20];
