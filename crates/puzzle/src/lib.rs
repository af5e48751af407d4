#![deny(warnings)]

//! Sliding photo puzzle: a 3x3 board of tile indices with one blank.
//!
//! Tile `i` belongs at position `i`; tile `BLANK` is the empty slot. Shuffles
//! are seeded so a given seed always yields the same board.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::debug;

/// Board width and height.
pub const SIZE: usize = 3;
/// Number of slots on the board.
pub const TOTAL: usize = SIZE * SIZE;
/// Tile index used for the empty slot.
pub const BLANK: u8 = (TOTAL - 1) as u8;

/// Errors produced when building a board from raw tiles.
#[derive(Debug, Error, PartialEq)]
pub enum PuzzleError {
    /// Every tile `0..TOTAL` must appear exactly once.
    #[error("tiles are not a permutation of 0..9")]
    NotAPermutation,
}

/// Result of a slide request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slide {
    /// Tile moved, puzzle still unsolved.
    Moved,
    /// Tile moved and completed the picture.
    Won,
    /// Not adjacent to the blank, out of range, or already won.
    Ignored,
}

/// Whether an arrangement can be solved.
///
/// On an odd-width board this holds iff the number of inversions among the
/// non-blank tiles is even.
pub fn is_solvable(tiles: &[u8]) -> bool {
    let mut inversions = 0usize;
    for i in 0..tiles.len() {
        for j in i + 1..tiles.len() {
            if tiles[i] != BLANK && tiles[j] != BLANK && tiles[i] > tiles[j] {
                inversions += 1;
            }
        }
    }
    inversions % 2 == 0
}

/// Whether every tile sits at its own index.
pub fn is_win(tiles: &[u8]) -> bool {
    tiles.iter().enumerate().all(|(i, &t)| t as usize == i)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Puzzle {
    tiles: [u8; TOTAL],
    moves: u32,
    won: bool,
}

impl Puzzle {
    pub fn solved() -> Self {
        let mut tiles = [0u8; TOTAL];
        for (i, t) in tiles.iter_mut().enumerate() {
            *t = i as u8;
        }
        Self {
            tiles,
            moves: 0,
            won: true,
        }
    }

    pub fn from_tiles(tiles: [u8; TOTAL]) -> Result<Self, PuzzleError> {
        let mut seen = [false; TOTAL];
        for &t in &tiles {
            let slot = seen
                .get_mut(t as usize)
                .ok_or(PuzzleError::NotAPermutation)?;
            if *slot {
                return Err(PuzzleError::NotAPermutation);
            }
            *slot = true;
        }
        Ok(Self {
            won: is_win(&tiles),
            tiles,
            moves: 0,
        })
    }

    /// A solvable, not-yet-solved board derived from `seed`.
    pub fn shuffled(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut tiles = Self::solved().tiles;
        loop {
            tiles.shuffle(&mut rng);
            if is_solvable(&tiles) && !is_win(&tiles) {
                break;
            }
        }
        Self {
            tiles,
            moves: 0,
            won: false,
        }
    }

    pub fn tiles(&self) -> &[u8; TOTAL] {
        &self.tiles
    }

    pub fn moves(&self) -> u32 {
        self.moves
    }

    pub fn is_won(&self) -> bool {
        self.won
    }

    pub fn blank_index(&self) -> usize {
        self.tiles
            .iter()
            .position(|&t| t == BLANK)
            .unwrap_or(TOTAL - 1)
    }

    /// Whether the tile at `idx` is orthogonally next to the blank.
    pub fn can_move(&self, idx: usize) -> bool {
        if idx >= TOTAL {
            return false;
        }
        let blank = self.blank_index();
        let (r, c) = (idx / SIZE, idx % SIZE);
        let (br, bc) = (blank / SIZE, blank % SIZE);
        r.abs_diff(br) + c.abs_diff(bc) == 1
    }

    /// Slide the tile at `idx` into the blank.
    pub fn slide(&mut self, idx: usize) -> Slide {
        if self.won || !self.can_move(idx) {
            return Slide::Ignored;
        }
        let blank = self.blank_index();
        self.tiles.swap(idx, blank);
        self.moves += 1;
        if is_win(&self.tiles) {
            self.won = true;
            debug!(moves = self.moves, "puzzle solved");
            Slide::Won
        } else {
            Slide::Moved
        }
    }
}
