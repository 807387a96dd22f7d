//! A reference [`GameProvider`] implementation for Tic-Tac-Toe: the
//! `gamestate:string[9]` wire contract, win/draw detection, and the
//! "every new bot plays every other bot twice, swapping who moves first"
//! matchmaking rule.

mod board;
mod provider;

pub use board::{Mark, Outcome, WireBoard};
pub use provider::TicTacToeProvider;
