//! The 3x3 board representation and win/draw detection (row/column/diagonal
//! scan). The wire shape for `TicTacToe.NextMove` is a 9-element array of
//! single characters, `"X"`, `"O"`, or `""` for an empty cell.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mark {
    X,
    O,
}

impl Mark {
    pub fn as_str(self) -> &'static str {
        match self {
            Mark::X => "X",
            Mark::O => "O",
        }
    }

    pub fn opponent(self) -> Mark {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }
}

/// The board as it travels over the wire: 9 cells, row-major, empty cells
/// are the empty string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireBoard(pub [String; 9]);

impl WireBoard {
    pub fn empty() -> Self {
        WireBoard(std::array::from_fn(|_| String::new()))
    }

    pub fn cell(&self, position: usize) -> Option<Mark> {
        match self.0[position].as_str() {
            "X" => Some(Mark::X),
            "O" => Some(Mark::O),
            _ => None,
        }
    }

    pub fn place(&mut self, position: usize, mark: Mark) {
        self.0[position] = mark.as_str().to_string();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Undecided,
    Win(Mark),
    Draw,
}

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Scans the 8 winning lines, falling back to a full-board check for a
/// draw, exactly as the original board's `check_for`/`check_winning` pair
/// did over its `Vec<Vec<u8>>` representation.
pub fn outcome(board: &WireBoard) -> Outcome {
    for line in LINES {
        let marks: Vec<Option<Mark>> = line.iter().map(|&i| board.cell(i)).collect();
        if let (Some(a), Some(b), Some(c)) = (marks[0], marks[1], marks[2]) {
            if a == b && b == c {
                return Outcome::Win(a);
            }
        }
    }
    if board.0.iter().all(|cell| !cell.is_empty()) {
        return Outcome::Draw;
    }
    Outcome::Undecided
}

/// A move at `position` is legal only onto an empty cell within bounds.
pub fn is_legal(board: &WireBoard, position: usize) -> bool {
    position < 9 && board.cell(position).is_none()
}
