//! 在线服务对手
//!
//! 订阅对局事件流：对手的走法成为待走走法，本地一方被接受的走法转发给服务。
//! 事件流断开时报告 "offline" 并按指数退避重连。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use centaur_engine::{ChallengeRequest, GameState, GameStreamEvent, OnlineClient};
use centaur_protocol::Side;
use shakmaty::{Chess, Move, Position};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{match_pending, CommandSender, MoveDecision, Player, PlayerCommand, PlayerKind};
use crate::error::{BridgeError, Result};
use crate::position::{parse_fen, parse_uci, side, to_fen, to_uci, STARTING_FEN};

const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// 对局来源
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteMode {
    /// 挑战服务端 AI
    Ai { level: u8 },
    /// 挑战指定用户
    User { name: String },
    /// 接入已存在的对局
    Game { id: String },
}

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub mode: RemoteMode,
    /// 基础时间（秒）与加秒
    pub clock: Option<(u32, u32)>,
    pub rated: bool,
}

/// 对局结束状态对应的结果
pub fn result_from_status(state: &GameState) -> String {
    match state.winner.as_deref() {
        Some("white") => "1-0".to_string(),
        Some("black") => "0-1".to_string(),
        _ if matches!(state.status.as_str(), "draw" | "stalemate") => "1/2-1/2".to_string(),
        _ => "*".to_string(),
    }
}

/// 走法序列的最后一步若由 `mover` 走出，返回 (走法, 走之前的 FEN)
pub fn remote_pending(initial_fen: &str, moves: &[&str], mover: Side) -> Option<(String, String)> {
    let (last, earlier) = moves.split_last()?;
    let mut pos = parse_fen(initial_fen).ok()?;
    for uci in earlier {
        let mv = match parse_uci(&pos, uci) {
            Ok(mv) => mv,
            Err(e) => {
                warn!("无法重放远端走法: {}", e);
                return None;
            }
        };
        pos = pos.play(&mv).ok()?;
    }
    (side(pos.turn()) == mover).then(|| (last.to_string(), to_fen(&pos)))
}

pub struct RemoteServicePlayer {
    config: RemoteConfig,
    client: Arc<OnlineClient>,
    game_id: Option<String>,
    side: Option<Side>,
    commands: Option<CommandSender>,
    pending: Option<Move>,
    closed: Arc<AtomicBool>,
    online: Arc<AtomicBool>,
    stream: Option<JoinHandle<()>>,
}

impl RemoteServicePlayer {
    pub fn new(config: RemoteConfig, client: Arc<OnlineClient>) -> Self {
        Self {
            config,
            client,
            game_id: None,
            side: None,
            commands: None,
            pending: None,
            closed: Arc::new(AtomicBool::new(false)),
            online: Arc::new(AtomicBool::new(false)),
            stream: None,
        }
    }

    pub fn game_id(&self) -> Option<&str> {
        self.game_id.as_deref()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn create_game(&self, side: Side) -> Result<String> {
        let request = ChallengeRequest {
            color: Some(side.opponent().to_string()),
            clock: self.config.clock,
            rated: self.config.rated,
            initial_fen: None,
        };
        let created = match &self.config.mode {
            RemoteMode::Ai { level } => self.client.challenge_ai(*level, &request).await,
            RemoteMode::User { name } => self.client.challenge_user(name, &request).await,
            RemoteMode::Game { id } => Ok(id.clone()),
        };
        created.map_err(|e| BridgeError::Remote(format!("{e:#}")))
    }

    fn report(&self, message: String) {
        if let (Some(commands), Some(side)) = (&self.commands, self.side) {
            let _ = commands.send(PlayerCommand::Status { side, message });
        }
    }
}

struct StreamTask {
    client: Arc<OnlineClient>,
    game_id: String,
    side: Side,
    commands: CommandSender,
    closed: Arc<AtomicBool>,
    online: Arc<AtomicBool>,
    initial_fen: String,
    announced: bool,
}

impl StreamTask {
    async fn run(mut self) {
        let mut backoff = BACKOFF_START;
        while !self.closed.load(Ordering::Acquire) {
            match self.client.stream_game(&self.game_id).await {
                Ok(mut events) => {
                    self.online.store(true, Ordering::Release);
                    backoff = BACKOFF_START;
                    while let Some(event) = events.recv().await {
                        if self.closed.load(Ordering::Acquire) || !self.handle(event) {
                            return;
                        }
                    }
                    self.online.store(false, Ordering::Release);
                }
                Err(e) => warn!("无法连接对局事件流: {:#}", e),
            }
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            let _ = self.commands.send(PlayerCommand::Status {
                side: self.side,
                message: "offline".into(),
            });
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }

    /// 返回 false 表示对局结束
    fn handle(&mut self, event: GameStreamEvent) -> bool {
        match event {
            GameStreamEvent::GameFull(full) => {
                self.initial_fen = if full.initial_fen == "startpos" {
                    STARTING_FEN.to_string()
                } else {
                    full.initial_fen
                };
                if !self.announced {
                    self.announced = true;
                    info!("在线对局 {} 已开始", full.id);
                    let _ = self.commands.send(PlayerCommand::Ready { side: self.side });
                }
                self.state(&full.state)
            }
            GameStreamEvent::GameState(state) => self.state(&state),
            GameStreamEvent::OpponentGone { gone } => {
                if gone {
                    let _ = self.commands.send(PlayerCommand::Status {
                        side: self.side,
                        message: "opponent left the game".into(),
                    });
                }
                true
            }
            GameStreamEvent::ChatLine { username, text } => {
                debug!("聊天 {}: {}", username, text);
                true
            }
            GameStreamEvent::Unknown => true,
        }
    }

    fn state(&mut self, state: &GameState) -> bool {
        if state.is_finished() {
            self.closed.store(true, Ordering::Release);
            let _ = self.commands.send(PlayerCommand::GameEnded {
                result: result_from_status(state),
                termination: state.status.clone(),
            });
            return false;
        }
        if let Some((uci, fen)) = remote_pending(&self.initial_fen, &state.move_list(), self.side) {
            let _ = self.commands.send(PlayerCommand::PendingMove {
                side: self.side,
                uci,
                fen,
            });
        }
        let offers_draw = match self.side {
            Side::White => state.wdraw,
            Side::Black => state.bdraw,
        };
        if offers_draw {
            let _ = self.commands.send(PlayerCommand::DrawOffer { side: self.side });
        }
        true
    }
}

#[async_trait]
impl Player for RemoteServicePlayer {
    fn kind(&self) -> PlayerKind {
        PlayerKind::RemoteService
    }

    fn name(&self) -> String {
        match &self.config.mode {
            RemoteMode::Ai { level } => format!("online AI level {level}"),
            RemoteMode::User { name } => name.clone(),
            RemoteMode::Game { id } => format!("online game {id}"),
        }
    }

    async fn start(&mut self, side: Side, commands: CommandSender) -> Result<()> {
        let game_id = self.create_game(side).await?;
        info!("在线对局 {}，对手执 {}", game_id, side);
        self.closed.store(false, Ordering::Release);
        let task = StreamTask {
            client: self.client.clone(),
            game_id: game_id.clone(),
            side,
            commands: commands.clone(),
            closed: self.closed.clone(),
            online: self.online.clone(),
            initial_fen: STARTING_FEN.to_string(),
            announced: false,
        };
        self.stream = Some(tokio::spawn(task.run()));
        self.game_id = Some(game_id);
        self.side = Some(side);
        self.commands = Some(commands);
        Ok(())
    }

    async fn stop(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.online.store(false, Ordering::Release);
        self.pending = None;
        if let Some(stream) = self.stream.take() {
            stream.abort();
        }
    }

    fn on_turn(&mut self, _position: &Chess) {
        self.pending = None;
    }

    fn on_move_formed(&mut self, _position: &Chess, mv: &Move) -> MoveDecision {
        if self.is_closed() {
            return MoveDecision::Mismatch("online game is over".into());
        }
        match_pending(self.pending.as_ref(), mv, "waiting for the opponent")
    }

    async fn on_move_made(&mut self, before: &Chess, mv: &Move) {
        if self.is_closed() || Some(side(before.turn())) == self.side {
            return;
        }
        let Some(id) = self.game_id.clone() else {
            return;
        };
        let uci = to_uci(mv);
        if let Err(e) = self.client.make_move(&id, &uci).await {
            warn!("无法提交走法 {}: {:#}", uci, e);
            self.report(format!("failed to send move {uci}"));
        }
    }

    fn pending_move(&self) -> Option<&Move> {
        self.pending.as_ref()
    }

    fn set_pending(&mut self, mv: Option<Move>) {
        if self.is_closed() && mv.is_some() {
            debug!("对局已结束，丢弃远端走法");
            return;
        }
        self.pending = mv;
    }

    fn is_ready(&self) -> bool {
        self.online.load(Ordering::Acquire) && !self.is_closed()
    }

    async fn opponent_resigned(&mut self) {
        if self.is_closed() {
            return;
        }
        self.closed.store(true, Ordering::Release);
        self.pending = None;
        if let Some(id) = self.game_id.clone() {
            if let Err(e) = self.client.resign(&id).await {
                warn!("认输请求失败: {:#}", e);
            }
        }
    }

    async fn opponent_offered_draw(&mut self) {
        if let Some(id) = self.game_id.clone() {
            if let Err(e) = self.client.draw(&id, true).await {
                warn!("提和请求失败: {:#}", e);
            }
        }
    }

    async fn abort(&mut self) {
        if self.is_closed() {
            return;
        }
        self.closed.store(true, Ordering::Release);
        self.pending = None;
        if let Some(id) = self.game_id.clone() {
            if let Err(e) = self.client.abort(&id).await {
                warn!("中止请求失败: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use centaur_engine::OnlineConfig;

    fn player() -> RemoteServicePlayer {
        let client = OnlineClient::new(OnlineConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..OnlineConfig::default()
        })
        .unwrap();
        RemoteServicePlayer::new(
            RemoteConfig {
                mode: RemoteMode::Ai { level: 3 },
                clock: Some((600, 5)),
                rated: false,
            },
            Arc::new(client),
        )
    }

    #[test]
    fn test_remote_pending_only_for_own_moves() {
        // 对手执黑：最后一步 e7e5 是黑方走的
        let (uci, fen) = remote_pending(STARTING_FEN, &["e2e4", "e7e5"], Side::Black).unwrap();
        assert_eq!(uci, "e7e5");
        assert_eq!(
            fen,
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"
        );
        assert_eq!(remote_pending(STARTING_FEN, &["e2e4"], Side::Black), None);
        assert_eq!(remote_pending(STARTING_FEN, &[], Side::White), None);
        assert_eq!(remote_pending(STARTING_FEN, &["e2e5", "e7e5"], Side::Black), None);
    }

    #[test]
    fn test_result_from_status() {
        let mut state = GameState {
            status: "mate".into(),
            winner: Some("black".into()),
            ..GameState::default()
        };
        assert_eq!(result_from_status(&state), "0-1");
        state.winner = None;
        state.status = "stalemate".into();
        assert_eq!(result_from_status(&state), "1/2-1/2");
        state.status = "aborted".into();
        assert_eq!(result_from_status(&state), "*");
    }

    #[tokio::test]
    async fn test_stream_state_emits_pending_and_end() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut task = StreamTask {
            client: Arc::new(OnlineClient::new(OnlineConfig::default()).unwrap()),
            game_id: "abc".into(),
            side: Side::Black,
            commands: tx,
            closed: Arc::new(AtomicBool::new(false)),
            online: Arc::new(AtomicBool::new(true)),
            initial_fen: STARTING_FEN.into(),
            announced: false,
        };
        let state = GameState {
            moves: "e2e4 c7c5".into(),
            status: "started".into(),
            bdraw: true,
            ..GameState::default()
        };
        assert!(task.handle(GameStreamEvent::GameState(state)));
        assert!(matches!(
            rx.recv().await,
            Some(PlayerCommand::PendingMove { uci, .. }) if uci == "c7c5"
        ));
        assert_eq!(rx.recv().await, Some(PlayerCommand::DrawOffer { side: Side::Black }));

        let over = GameState {
            moves: "e2e4 c7c5".into(),
            status: "resign".into(),
            winner: Some("white".into()),
            ..GameState::default()
        };
        assert!(!task.handle(GameStreamEvent::GameState(over)));
        assert_eq!(
            rx.recv().await,
            Some(PlayerCommand::GameEnded {
                result: "1-0".into(),
                termination: "resign".into()
            })
        );
        assert!(task.closed.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_moves_after_local_resign_are_discarded() {
        let mut remote = player();
        let pos = Chess::default();
        let mv = parse_uci(&pos, "e2e4").unwrap();
        remote.set_pending(Some(mv.clone()));
        assert_eq!(remote.on_move_formed(&pos, &mv), MoveDecision::Submit(mv.clone()));

        remote.opponent_resigned().await;
        assert!(remote.pending_move().is_none());
        remote.set_pending(Some(mv.clone()));
        assert!(remote.pending_move().is_none());
        assert!(matches!(
            remote.on_move_formed(&pos, &mv),
            MoveDecision::Mismatch(_)
        ));
        assert!(!remote.is_ready());
        assert!(!remote.can_resign());
    }
}
