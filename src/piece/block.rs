use sha1::{Digest, Sha1};

use crate::error::PieceError;
use crate::piece::{PIECE_BLOCK_SIZE, PeerId};

/// Coordinates of a block, as sent in a request message and echoed back in
/// the matching piece message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece_index: usize,
    pub offset: u32,
    pub length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Missing,
    Requested,
    Present,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub piece_index: usize,
    pub offset: u32,
    pub length: u32,
    pub state: BlockState,
    pub data: Vec<u8>,
}

impl Block {
    fn new(piece_index: usize, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
            state: BlockState::Missing,
            data: Vec::new(),
        }
    }

    pub fn request(&self) -> BlockRequest {
        BlockRequest {
            piece_index: self.piece_index,
            offset: self.offset,
            length: self.length,
        }
    }

    fn clear(&mut self) {
        self.state = BlockState::Missing;
        self.data = Vec::new();
    }
}

/// A piece of the torrent content, split into fixed-size blocks.
///
/// `blocks` are ordered by ascending offset and cover `[0, length)` without
/// gaps; only the final block may be shorter than [`PIECE_BLOCK_SIZE`].
#[derive(Debug, Clone)]
pub struct Piece {
    pub index: usize,
    pub hash: [u8; 20],
    pub blocks: Vec<Block>,
    pub owner: Option<PeerId>,
}

impl Piece {
    pub fn new(index: usize, hash: [u8; 20], length: u32) -> Self {
        let blocks = (0..length)
            .step_by(PIECE_BLOCK_SIZE as usize)
            .map(|offset| Block::new(index, offset, PIECE_BLOCK_SIZE.min(length - offset)))
            .collect();

        Self {
            index,
            hash,
            blocks,
            owner: None,
        }
    }

    pub fn length(&self) -> u64 {
        self.blocks.iter().map(|b| u64::from(b.length)).sum()
    }

    /// Marks the first missing block as requested and returns its coordinates.
    pub(crate) fn claim_next_block(&mut self) -> Option<BlockRequest> {
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.state == BlockState::Missing)?;
        block.state = BlockState::Requested;
        Some(block.request())
    }

    /// Stores `data` into the block at `offset`.
    ///
    /// Leaves the piece untouched if no block starts at `offset` with a
    /// length equal to `data.len()`.
    pub(crate) fn store_block(&mut self, offset: u32, data: Vec<u8>) -> Result<(), PieceError> {
        let index = self.index;
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.offset == offset && b.length as usize == data.len())
            .ok_or(PieceError::UnknownBlock { index, offset })?;

        block.data = data;
        block.state = BlockState::Present;
        Ok(())
    }

    /// Returns a requested block to the missing state. Returns whether the
    /// block was outstanding.
    pub(crate) fn release_block(&mut self, offset: u32) -> bool {
        match self
            .blocks
            .iter_mut()
            .find(|b| b.offset == offset && b.state == BlockState::Requested)
        {
            Some(block) => {
                block.clear();
                true
            }
            None => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.blocks.iter().all(|b| b.state == BlockState::Present)
    }

    pub fn present_blocks(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.state == BlockState::Present)
            .count()
    }

    /// Hashes the block payloads in ascending offset order and compares the
    /// digest to the expected one.
    pub fn hash_matches(&self) -> bool {
        let mut hasher = Sha1::new();
        for block in &self.blocks {
            hasher.update(&block.data);
        }
        hasher.finalize().as_slice() == self.hash
    }

    /// Moves the block payloads out into one contiguous buffer.
    pub(crate) fn take_data(&mut self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.length() as usize);
        for block in &mut self.blocks {
            data.append(&mut block.data);
        }
        data
    }

    /// Drops every payload and owner so the piece can be requested afresh.
    pub(crate) fn reset(&mut self) {
        self.blocks.iter_mut().for_each(Block::clear);
        self.owner = None;
    }
}
