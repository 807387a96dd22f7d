use std::collections::{BTreeMap, HashMap};

use merknera_core::error::ConfigError;
use merknera_core::model::{Bot, BotId, Game, GamePlayer, GamePlayerId, Move};
use merknera_core::provider::{BeginResult, GameProvider, MethodHandler};
use merknera_protocol::GameResult;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::board::{self, Mark, WireBoard};

const MNEMONIC: &str = "TICTACTOE";
const DISPLAY_NAME: &str = "Tic-Tac-Toe";
const NAMESPACE: &str = "TicTacToe";
const NEXT_MOVE_METHOD: &str = "NextMove";

/// The full per-move snapshot carried in `Move.game_state`: the board, the
/// mark of whoever is due to move next, the fixed bot-to-mark assignment for
/// the whole game, and the winning mark once the game is decided. Everything
/// a handler needs to act is self-contained here, since handlers only ever
/// see this JSON blob, never the store.
#[derive(Debug, Serialize, Deserialize)]
struct GameState {
    game_id: i64,
    board: WireBoard,
    mark: Mark,
    marks: BTreeMap<String, Mark>,
    winner_mark: Option<Mark>,
}

#[derive(Debug, Deserialize)]
struct NextMoveResult {
    position: usize,
}

pub struct TicTacToeProvider {
    handlers: HashMap<String, MethodHandler>,
}

impl Default for TicTacToeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TicTacToeProvider {
    pub fn new() -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(
            NEXT_MOVE_METHOD.to_string(),
            MethodHandler {
                build_params: Box::new(build_next_move_params),
                process_response: Box::new(process_next_move_response),
            },
        );
        TicTacToeProvider { handlers }
    }
}

impl GameProvider for TicTacToeProvider {
    fn mnemonic(&self) -> &str {
        MNEMONIC
    }

    fn name(&self) -> &str {
        DISPLAY_NAME
    }

    fn rpc_namespace(&self) -> &str {
        NAMESPACE
    }

    /// Pairs the new bot against every other current bot twice, swapping who
    /// moves first each time, so neither bot is always X or always O.
    fn games_for_bot(&self, new_bot: &Bot, other_bots: &[Bot]) -> Vec<Vec<BotId>> {
        other_bots
            .iter()
            .flat_map(|other| [vec![new_bot.id, other.id], vec![other.id, new_bot.id]])
            .collect()
    }

    fn begin(&self, game: &Game, players: &[GamePlayer]) -> Result<BeginResult, ConfigError> {
        let mut ordered = players.to_vec();
        ordered.sort_by_key(|p| p.play_sequence);
        let [first, second]: [GamePlayer; 2] = ordered
            .try_into()
            .map_err(|_| ConfigError::EmptyGame(game.id))?;

        let mut marks = BTreeMap::new();
        marks.insert(first.bot.to_string(), Mark::X);
        marks.insert(second.bot.to_string(), Mark::O);

        let state = GameState {
            game_id: game.id.0,
            board: WireBoard::empty(),
            mark: Mark::X,
            marks,
            winner_mark: None,
        };

        Ok(BeginResult {
            rpc_method: merknera_protocol::namespaced(NAMESPACE, NEXT_MOVE_METHOD),
            initial_player: first.id,
            initial_state: serde_json::to_value(state).map_err(|_| ConfigError::EmptyGame(game.id))?,
        })
    }

    fn resume(&self, _game: &Game) -> Result<String, ConfigError> {
        Ok(merknera_protocol::namespaced(NAMESPACE, NEXT_MOVE_METHOD))
    }

    fn next_player(
        &self,
        current_move: &Move,
        players: &[GamePlayer],
    ) -> Result<GamePlayerId, ConfigError> {
        let fallback_game = players.first().map(|p| p.game).unwrap_or(merknera_core::model::GameId(0));
        players
            .iter()
            .find(|p| p.id != current_move.game_player)
            .map(|p| p.id)
            .ok_or(ConfigError::EmptyGame(fallback_game))
    }

    fn method_handler(&self, bare_method: &str) -> Option<&MethodHandler> {
        self.handlers.get(bare_method)
    }

    fn complete_request_params(&self, game: &Game, bot: &Bot, final_state: &Value) -> Value {
        let Ok(state) = serde_json::from_value::<GameState>(final_state.clone()) else {
            return Value::Null;
        };
        let mark = state.marks.get(&bot.id.to_string()).copied();
        let winner = mark.is_some() && mark == state.winner_mark;
        json!({
            "gameid": game.id.0,
            "mark": mark,
            "winner": winner,
            "gamestate": state.board.0,
        })
    }

    fn error_request_params(&self, game: &Game, message: &str) -> Value {
        json!({
            "gameid": game.id.0,
            "message": message,
        })
    }
}

fn build_next_move_params(_mv: &Move, state: &Value) -> Result<Value, String> {
    let state: GameState = serde_json::from_value(state.clone()).map_err(|e| e.to_string())?;
    Ok(json!({
        "gameid": state.game_id,
        "mark": state.mark,
        "gamestate": state.board.0,
    }))
}

fn process_next_move_response(
    _mv: &Move,
    state: &Value,
    response: &Value,
) -> Result<(GameResult, String, Value), String> {
    let mut state: GameState = serde_json::from_value(state.clone()).map_err(|e| e.to_string())?;
    let result: NextMoveResult = serde_json::from_value(response.clone()).map_err(|e| e.to_string())?;

    if !board::is_legal(&state.board, result.position) {
        tracing::debug!(position = result.position, "bot attempted an illegal move");
        return Err(format!("illegal move: position {} is not open", result.position));
    }
    state.board.place(result.position, state.mark);

    match board::outcome(&state.board) {
        board::Outcome::Win(mark) => {
            state.winner_mark = Some(mark);
            tracing::debug!(?mark, "game decided by a win");
            let new_state = serde_json::to_value(state).map_err(|e| e.to_string())?;
            Ok((GameResult::Win, String::new(), new_state))
        }
        board::Outcome::Draw => {
            let new_state = serde_json::to_value(state).map_err(|e| e.to_string())?;
            Ok((GameResult::Draw, String::new(), new_state))
        }
        board::Outcome::Undecided => {
            state.mark = state.mark.opponent();
            let new_state = serde_json::to_value(state).map_err(|e| e.to_string())?;
            Ok((
                GameResult::Undecided,
                merknera_protocol::namespaced(NAMESPACE, NEXT_MOVE_METHOD),
                new_state,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use merknera_core::model::{BotId, GameId, GamePlayerId, GameTypeId};

    fn bot(id: i64) -> Bot {
        Bot {
            id: BotId(id),
            name: format!("bot-{id}"),
            version: "1.0.0".into(),
            game_type: GameTypeId(1),
            owner: merknera_core::model::UserId(1),
            endpoint: "http://example.invalid/rpc".into(),
            description: None,
            status: merknera_core::model::BotStatus::Online,
            last_online: None,
        }
    }

    fn game_player(id: i64, game: GameId, bot_id: i64, sequence: u32) -> GamePlayer {
        GamePlayer { id: GamePlayerId(id), game, bot: BotId(bot_id), play_sequence: sequence }
    }

    #[test]
    fn games_for_bot_pairs_twice_with_swapped_order() {
        let provider = TicTacToeProvider::new();
        let new_bot = bot(1);
        let other = bot(2);
        let games = provider.games_for_bot(&new_bot, std::slice::from_ref(&other));
        assert_eq!(games, vec![vec![BotId(1), BotId(2)], vec![BotId(2), BotId(1)]]);
    }

    #[test]
    fn begin_assigns_x_to_the_first_play_sequence() {
        let provider = TicTacToeProvider::new();
        let game = Game { id: GameId(10), game_type: GameTypeId(1), status: merknera_core::model::GameStatus::NotStarted };
        let players = vec![
            game_player(1, game.id, 100, 1),
            game_player(2, game.id, 200, 2),
        ];
        let begin = provider.begin(&game, &players).unwrap();
        assert_eq!(begin.initial_player, GamePlayerId(1));
        let state: GameState = serde_json::from_value(begin.initial_state).unwrap();
        assert_eq!(state.mark, Mark::X);
        assert_eq!(state.marks.get("100"), Some(&Mark::X));
        assert_eq!(state.marks.get("200"), Some(&Mark::O));
    }

    #[test]
    fn process_response_rejects_an_occupied_cell() {
        let mut board = WireBoard::empty();
        board.place(0, Mark::X);
        let state = GameState {
            game_id: 1,
            board,
            mark: Mark::O,
            marks: BTreeMap::new(),
            winner_mark: None,
        };
        let mv = sample_move();
        let error = process_next_move_response(
            &mv,
            &serde_json::to_value(state).unwrap(),
            &json!({"position": 0}),
        )
        .unwrap_err();
        assert!(error.contains("not open"));
    }

    #[test]
    fn process_response_detects_a_win() {
        let mut board = WireBoard::empty();
        board.place(0, Mark::X);
        board.place(1, Mark::X);
        let state = GameState {
            game_id: 1,
            board,
            mark: Mark::X,
            marks: BTreeMap::new(),
            winner_mark: None,
        };
        let mv = sample_move();
        let (result, _, new_state) = process_next_move_response(
            &mv,
            &serde_json::to_value(state).unwrap(),
            &json!({"position": 2}),
        )
        .unwrap();
        assert_eq!(result, GameResult::Win);
        let new_state: GameState = serde_json::from_value(new_state).unwrap();
        assert_eq!(new_state.winner_mark, Some(Mark::X));
    }

    fn sample_move() -> Move {
        Move {
            id: merknera_core::model::MoveId(1),
            game_player: GamePlayerId(1),
            status: merknera_core::model::MoveStatus::Awaiting,
            winner: false,
            game_state: Value::Null,
            started_at: time::OffsetDateTime::UNIX_EPOCH,
            ended_at: None,
        }
    }
}
