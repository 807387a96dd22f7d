//! The Registration Coordinator: authenticates a bot owner, resolves the
//! game type, supersedes any prior version of the same bot name, and
//! generates the fresh games a newly (re-)registered bot should play.

use std::sync::Arc;

use merknera_protocol::RegisterBotRequest;

use crate::dispatch::{MoveQueueSender, MoveToken};
use crate::error::RegistrationError;
use crate::provider::ProviderRegistry;
use crate::store::{NewBot, Store};

pub struct RegistrationCoordinator {
    store: Arc<dyn Store>,
    providers: Arc<ProviderRegistry>,
    queue: MoveQueueSender,
}

impl RegistrationCoordinator {
    pub fn new(store: Arc<dyn Store>, providers: Arc<ProviderRegistry>, queue: MoveQueueSender) -> Self {
        RegistrationCoordinator { store, providers, queue }
    }

    pub async fn register(&self, request: RegisterBotRequest) -> Result<String, RegistrationError> {
        let (user, _token) = self
            .store
            .user_by_current_token(&request.token)
            .await?
            .ok_or(RegistrationError::UnknownUser)?;

        let game_type = self
            .store
            .game_type_by_mnemonic(&request.game)
            .await?
            .ok_or(RegistrationError::UnknownGame)?;

        let description = merge_description(&request);

        if let Some(existing) = self.store.bot_by_name_non_superseded(&request.botname).await? {
            if existing.owner != user.id {
                return Err(RegistrationError::NameTaken);
            }
            if existing.version == request.botversion {
                self.store
                    .update_bot_registration(existing.id, &request.rpcendpoint, description.as_deref())
                    .await?;
                self.resume_awaiting_moves_for(existing.id).await?;
                return Ok("already registered, resumed".to_string());
            }
        }

        self.store.supersede_bot_and_games(&request.botname).await?;
        let new_bot = self
            .store
            .insert_bot(NewBot {
                name: request.botname.clone(),
                version: request.botversion.clone(),
                game_type: game_type.id,
                owner: user.id,
                endpoint: request.rpcendpoint.clone(),
                description,
            })
            .await?;

        self.generate_games(&new_bot, &game_type).await?;

        Ok("registered".to_string())
    }

    async fn resume_awaiting_moves_for(&self, bot_id: crate::model::BotId) -> Result<(), RegistrationError> {
        let moves = self.store.awaiting_moves_for_bot(bot_id).await?;
        for mv in moves {
            let chain = self.store.move_chain(mv.id).await?;
            let provider = self
                .providers
                .by_mnemonic(&chain.game_type.mnemonic)
                .map_err(|e| RegistrationError::Provider(e.to_string()))?;
            let method = provider
                .resume(&chain.game)
                .map_err(|e| RegistrationError::Provider(e.to_string()))?;
            if self.queue.enqueue(MoveToken { move_id: mv.id, rpc_method: method }).await.is_err() {
                tracing::warn!(move_id = ?mv.id, "move queue closed while resuming re-registered bot's moves");
            }
        }
        Ok(())
    }

    /// Fetches this game type's other non-superseded bots, asks the
    /// provider which games to create against the new bot, then creates
    /// each game, its players, and its first move.
    async fn generate_games(
        &self,
        new_bot: &crate::model::Bot,
        game_type: &crate::model::GameType,
    ) -> Result<(), RegistrationError> {
        let provider = self
            .providers
            .by_mnemonic(&game_type.mnemonic)
            .map_err(|e| RegistrationError::Provider(e.to_string()))?;

        let other_bots = self
            .store
            .bots_for_game_type_non_superseded(game_type.id, Some(new_bot.id))
            .await?;

        let assignments = provider.games_for_bot(new_bot, &other_bots);

        for players in assignments {
            let (game, game_players) = self.store.create_game(game_type.id, &players).await?;
            let begin = match provider.begin(&game, &game_players) {
                Ok(begin) => begin,
                Err(error) => {
                    tracing::warn!(?error, game_id = ?game.id, "provider could not begin created game");
                    continue;
                }
            };
            let mv = self
                .store
                .create_move(begin.initial_player, begin.initial_state)
                .await?;
            let token = MoveToken { move_id: mv.id, rpc_method: begin.rpc_method };
            if self.queue.enqueue(token).await.is_err() {
                tracing::warn!(move_id = ?mv.id, "move queue closed while enqueueing a freshly-created game's first move");
            }
        }

        Ok(())
    }
}

fn merge_description(request: &RegisterBotRequest) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(language) = &request.programminglanguage {
        parts.push(format!("language: {language}"));
    }
    if let Some(website) = &request.website {
        parts.push(format!("website: {website}"));
    }
    if let Some(description) = &request.description {
        parts.push(description.clone());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}
