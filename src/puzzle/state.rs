//! Typed states of one sliding puzzle. Only the methods below move a board
//! between states, so a solved board can never take another move and a
//! board that is still loading can never be shuffled.
use super::board::Board;
use super::{Loading, Playable, Shuffling, Solved};
use crate::engine::TextureHandle;
use rand::RngCore;

/// What the tiles are cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileArt {
    Image(TextureHandle),
    Numbered,
}

pub enum IsSolved {
    Done(PuzzleState<Solved>),
    InProgress(PuzzleState<Playable>),
}

#[derive(Debug, Clone)]
pub struct PuzzleContext {
    pub board: Board,
    pub move_count: u32,
    pub started_at: f64,
    pub elapsed_ms: f64,
    pub art: TileArt,
}

#[derive(Debug, Clone)]
pub struct PuzzleState<S> {
    context: PuzzleContext,
    _state: S,
}

impl<S> PuzzleState<S> {
    pub fn context(&self) -> &PuzzleContext {
        &self.context
    }
}

impl PuzzleState<Loading> {
    pub fn new(grid_size: usize) -> Self {
        PuzzleState {
            context: PuzzleContext {
                board: Board::solved(grid_size),
                move_count: 0,
                started_at: 0.0,
                elapsed_ms: 0.0,
                art: TileArt::Numbered,
            },
            _state: Loading,
        }
    }

    pub fn art_ready(mut self, art: TileArt) -> PuzzleState<Shuffling> {
        self.context.art = art;
        PuzzleState {
            context: self.context,
            _state: Shuffling,
        }
    }
}

impl PuzzleState<Shuffling> {
    /// Starts the clock from the moment the board becomes playable.
    pub fn shuffle(mut self, rng: &mut dyn RngCore, moves: usize, now: f64) -> PuzzleState<Playable> {
        self.context.board.shuffle(rng, moves);
        self.context.move_count = 0;
        self.context.started_at = now;
        self.context.elapsed_ms = 0.0;
        PuzzleState {
            context: self.context,
            _state: Playable,
        }
    }
}

impl PuzzleState<Playable> {
    /// Callers validate the cell with [`Board::check_move`] first; an
    /// illegal cell leaves the board untouched.
    pub fn move_tile(mut self, cell: usize, now: f64) -> IsSolved {
        if self.context.board.try_move(cell).is_ok() {
            self.context.move_count += 1;
        }
        self.context.elapsed_ms = now - self.context.started_at;
        if self.context.board.is_solved() {
            IsSolved::Done(PuzzleState {
                context: self.context,
                _state: Solved,
            })
        } else {
            IsSolved::InProgress(self)
        }
    }

    pub fn tick(&mut self, now: f64) {
        self.context.elapsed_ms = now - self.context.started_at;
    }

    pub fn reshuffle(self) -> PuzzleState<Shuffling> {
        PuzzleState {
            context: self.context,
            _state: Shuffling,
        }
    }
}
