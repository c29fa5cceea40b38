use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MoveError {
    #[error("cell {0} is outside the board")]
    OutOfBounds(usize),
    #[error("cell {0} is not next to the empty cell")]
    NotAdjacent(usize),
    #[error("the board does not accept moves right now")]
    NotPlayable,
}

/// Which way a tile slides into the empty cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slide {
    Up,
    Down,
    Left,
    Right,
}

/// Square sliding board. Cells are addressed row-major from the top left;
/// `tiles[cell]` is the tile number whose home is `cell`, and the empty
/// tile's home is the last cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Board {
    size: usize,
    tiles: Vec<usize>,
    empty: usize,
}

impl Board {
    pub fn solved(size: usize) -> Self {
        let cells = size * size;
        Board {
            size,
            tiles: (0..cells).collect(),
            empty: cells - 1,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cells(&self) -> usize {
        self.tiles.len()
    }

    pub fn empty_cell(&self) -> usize {
        self.empty
    }

    /// `None` for the empty cell.
    pub fn tile_at(&self, cell: usize) -> Option<usize> {
        self.tiles
            .get(cell)
            .copied()
            .filter(|_| cell != self.empty)
    }

    fn row_col(&self, cell: usize) -> (usize, usize) {
        (cell / self.size, cell % self.size)
    }

    fn is_adjacent(&self, a: usize, b: usize) -> bool {
        let (row_a, col_a) = self.row_col(a);
        let (row_b, col_b) = self.row_col(b);
        row_a.abs_diff(row_b) + col_a.abs_diff(col_b) == 1
    }

    /// Cells whose tile may slide into the empty cell.
    pub fn legal_moves(&self) -> Vec<usize> {
        let (row, col) = self.row_col(self.empty);
        let mut moves = Vec::with_capacity(4);
        if row > 0 {
            moves.push(self.empty - self.size);
        }
        if row + 1 < self.size {
            moves.push(self.empty + self.size);
        }
        if col > 0 {
            moves.push(self.empty - 1);
        }
        if col + 1 < self.size {
            moves.push(self.empty + 1);
        }
        moves
    }

    pub fn check_move(&self, cell: usize) -> Result<(), MoveError> {
        if cell >= self.cells() {
            return Err(MoveError::OutOfBounds(cell));
        }
        if !self.is_adjacent(cell, self.empty) {
            return Err(MoveError::NotAdjacent(cell));
        }
        Ok(())
    }

    pub fn try_move(&mut self, cell: usize) -> Result<(), MoveError> {
        self.check_move(cell)?;
        self.tiles.swap(cell, self.empty);
        self.empty = cell;
        Ok(())
    }

    /// The cell whose tile would move for a keyboard slide, if any.
    /// `Slide::Up` moves the tile below the gap upwards, and so on.
    pub fn slide_source(&self, slide: Slide) -> Option<usize> {
        let (row, col) = self.row_col(self.empty);
        match slide {
            Slide::Up if row + 1 < self.size => Some(self.empty + self.size),
            Slide::Down if row > 0 => Some(self.empty - self.size),
            Slide::Left if col + 1 < self.size => Some(self.empty + 1),
            Slide::Right if col > 0 => Some(self.empty - 1),
            _ => None,
        }
    }

    /// Plays `moves` random legal moves, never undoing the previous one, and
    /// keeps going if that happens to land back on the solved layout. Random
    /// legal moves keep the board solvable; a random permutation would not.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R, moves: usize) {
        let mut previous = None;
        let mut played = 0;
        while played < moves || self.is_solved() {
            let candidates: Vec<usize> = self
                .legal_moves()
                .into_iter()
                .filter(|cell| Some(*cell) != previous)
                .collect();
            let Some(&cell) = candidates.choose(rng) else {
                break;
            };
            previous = Some(self.empty);
            // legal by construction
            self.tiles.swap(cell, self.empty);
            self.empty = cell;
            played += 1;
        }
    }

    pub fn is_solved(&self) -> bool {
        self.tiles.iter().enumerate().all(|(cell, tile)| cell == *tile)
    }

    /// Inversion-parity test for the empty-last goal layout.
    pub fn is_solvable(&self) -> bool {
        let blank = self.cells() - 1;
        let numbered: Vec<usize> = self.tiles.iter().copied().filter(|t| *t != blank).collect();
        let mut inversions = 0;
        for (i, a) in numbered.iter().enumerate() {
            inversions += numbered[i + 1..].iter().filter(|b| *b < a).count();
        }
        if self.size % 2 == 1 {
            inversions % 2 == 0
        } else {
            let rows_from_bottom = self.size - 1 - self.empty / self.size;
            (inversions + rows_from_bottom) % 2 == 0
        }
    }

    #[cfg(test)]
    pub(crate) fn from_tiles(size: usize, tiles: Vec<usize>) -> Self {
        let empty = tiles
            .iter()
            .position(|tile| *tile == size * size - 1)
            .unwrap_or(size * size - 1);
        Board { size, tiles, empty }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn solved_board_has_gap_bottom_right() {
        let board = Board::solved(3);
        assert!(board.is_solved());
        assert_eq!(board.empty_cell(), 8);
        assert_eq!(board.tile_at(8), None);
        assert_eq!(board.tile_at(0), Some(0));
        let mut moves = board.legal_moves();
        moves.sort();
        assert_eq!(moves, vec![5, 7]);
    }

    #[test]
    fn only_orthogonal_neighbours_may_move() {
        let mut board = Board::solved(3);
        assert_eq!(board.try_move(4), Err(MoveError::NotAdjacent(4)));
        assert_eq!(board.try_move(8), Err(MoveError::NotAdjacent(8)));
        assert_eq!(board.try_move(9), Err(MoveError::OutOfBounds(9)));
        // 2 and 6 are not adjacent to 8 even though their index differs by one row
        assert_eq!(board.try_move(2), Err(MoveError::NotAdjacent(2)));

        board.try_move(7).unwrap();
        assert_eq!(board.empty_cell(), 7);
        assert_eq!(board.tile_at(8), Some(7));
        assert!(!board.is_solved());
    }

    #[test]
    fn row_wrap_is_not_adjacency() {
        let mut board = Board::solved(3);
        board.try_move(5).unwrap();
        board.try_move(4).unwrap();
        board.try_move(3).unwrap();
        // gap now at 3; cell 2 is index-adjacent but on the row above's end
        assert_eq!(board.try_move(2), Err(MoveError::NotAdjacent(2)));
    }

    #[test]
    fn keyboard_slides_follow_the_gap() {
        let board = Board::solved(3);
        assert_eq!(board.slide_source(Slide::Down), Some(5));
        assert_eq!(board.slide_source(Slide::Right), Some(7));
        assert_eq!(board.slide_source(Slide::Up), None);
        assert_eq!(board.slide_source(Slide::Left), None);
    }

    #[test]
    fn shuffles_are_solvable_and_unsolved() {
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            for size in [2, 3, 4] {
                let mut board = Board::solved(size);
                board.shuffle(&mut rng, 300);
                assert!(board.is_solvable(), "seed {} size {}", seed, size);
                assert!(!board.is_solved());
            }
        }
    }

    #[test]
    fn swapped_pair_is_unsolvable() {
        let board = Board::from_tiles(3, vec![1, 0, 2, 3, 4, 5, 6, 7, 8]);
        assert!(!board.is_solvable());
        let board = Board::from_tiles(4, vec![1, 0, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
        assert!(!board.is_solvable());
    }
}
