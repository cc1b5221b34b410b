pub mod error;
pub mod logging;
pub mod piece;
pub mod tracker;

// Re-export commonly used types and functions for easier access
pub use error::{PieceError, TrackerError};
pub use piece::{
    Bitfield, BlockRequest, CompletedPiece, Delivery, PeerId, PieceManager, PieceScheduler,
    PieceSink,
};
pub use tracker::{InfoHash, ScrapeStats, TrackerConfig, UdpTracker};
