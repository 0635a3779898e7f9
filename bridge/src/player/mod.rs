//! 玩家与玩家管理器
//!
//! 每种颜色恰有一个玩家。玩家通过命令通道与对局协调器通信，
//! 待走走法由协调器校验（局面已变化的结果直接丢弃）后再写回玩家。

mod engine;
mod hand_brain;
mod human;
mod remote;

use async_trait::async_trait;
use centaur_protocol::{PieceEvent, Side};
use serde::{Deserialize, Serialize};
use shakmaty::{Chess, Move, Position};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::position::{side, to_uci};

pub use engine::{EngineConfig, EnginePlayer};
pub use hand_brain::{moves_with_role, role_name, HandBrainMode, HandBrainPlayer};
pub use human::{HumanPlayer, RemoteAppPlayer};
pub use remote::{remote_pending, result_from_status, RemoteConfig, RemoteMode, RemoteServicePlayer};

/// 玩家类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerKind {
    Human,
    Engine,
    /// 人与引擎合走一方
    HandBrain,
    RemoteService,
    RemoteApp,
}

/// 玩家发往协调器的命令
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerCommand {
    /// 已决定的走法，`fen` 为计算时的局面
    PendingMove { side: Side, uci: String, fen: String },
    Ready { side: Side },
    Resign { side: Side },
    DrawOffer { side: Side },
    Status { side: Side, message: String },
    Failed { side: Side, reason: String },
    /// 远端宣布对局结束
    GameEnded { result: String, termination: String },
}

pub type CommandSender = mpsc::UnboundedSender<PlayerCommand>;

/// 对形成走法的裁决
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MoveDecision {
    Submit(Move),
    Mismatch(String),
}

/// 与待走走法比较：起点终点一致即提交待走走法（升变以待走为准）
pub fn match_pending(pending: Option<&Move>, formed: &Move, waiting: &str) -> MoveDecision {
    match pending {
        Some(p) if p.from() == formed.from() && p.to() == formed.to() => {
            MoveDecision::Submit(p.clone())
        }
        Some(p) => MoveDecision::Mismatch(format!("expected {}", to_uci(p))),
        None => MoveDecision::Mismatch(waiting.to_string()),
    }
}

/// 玩家
#[async_trait]
pub trait Player: Send {
    fn kind(&self) -> PlayerKind;

    fn name(&self) -> String;

    /// 开始为 `side` 下棋
    async fn start(&mut self, side: Side, commands: CommandSender) -> Result<()>;

    async fn stop(&mut self);

    /// 局面变化后调用（无论轮到谁）
    fn on_turn(&mut self, position: &Chess);

    /// 己方回合的物理棋子事件
    fn on_piece_event(&mut self, _event: &PieceEvent) {}

    /// 棋盘上形成了一步走法
    fn on_move_formed(&mut self, position: &Chess, mv: &Move) -> MoveDecision;

    /// 任一方的走法已被接受；`before` 为走子前局面
    async fn on_move_made(&mut self, _before: &Chess, _mv: &Move) {}

    fn pending_move(&self) -> Option<&Move> {
        None
    }

    fn set_pending(&mut self, _mv: Option<Move>) {}

    fn is_ready(&self) -> bool;

    /// 棋盘手势能否为这一方认输
    fn can_resign(&self) -> bool {
        false
    }

    /// 对方（本地）认输，需要时通知远端
    async fn opponent_resigned(&mut self) {}

    /// 对方（本地）提和
    async fn opponent_offered_draw(&mut self) {}

    /// 中止对局
    async fn abort(&mut self) {}
}

/// 玩家管理器
pub struct PlayerManager {
    white: Box<dyn Player>,
    black: Box<dyn Player>,
}

impl PlayerManager {
    pub fn new(white: Box<dyn Player>, black: Box<dyn Player>) -> Self {
        Self { white, black }
    }

    pub fn get(&self, side: Side) -> &dyn Player {
        match side {
            Side::White => self.white.as_ref(),
            Side::Black => self.black.as_ref(),
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut Box<dyn Player> {
        match side {
            Side::White => &mut self.white,
            Side::Black => &mut self.black,
        }
    }

    /// 轮到走子的一方
    pub fn current(&mut self, position: &Chess) -> &mut Box<dyn Player> {
        self.get_mut(side(position.turn()))
    }

    /// 替换玩家并返回旧玩家（调用方负责停止或保存）
    pub fn set_player(&mut self, side: Side, player: Box<dyn Player>) -> Box<dyn Player> {
        std::mem::replace(self.get_mut(side), player)
    }

    pub async fn start_all(&mut self, commands: &CommandSender) -> Result<()> {
        self.white.start(Side::White, commands.clone()).await?;
        self.black.start(Side::Black, commands.clone()).await?;
        Ok(())
    }

    pub async fn stop_all(&mut self) {
        self.white.stop().await;
        self.black.stop().await;
    }

    pub fn is_ready(&self) -> bool {
        self.white.is_ready() && self.black.is_ready()
    }

    /// 通知双方局面变化
    pub fn on_turn(&mut self, position: &Chess) {
        self.white.on_turn(position);
        self.black.on_turn(position);
    }

    pub async fn on_move_made(&mut self, before: &Chess, mv: &Move) {
        self.white.on_move_made(before, mv).await;
        self.black.on_move_made(before, mv).await;
    }

    /// 当前一方的待走走法
    pub fn pending(&self, position: &Chess) -> Option<&Move> {
        self.get(side(position.turn())).pending_move()
    }

    pub fn clear_pending(&mut self) {
        self.white.set_pending(None);
        self.black.set_pending(None);
    }

    /// 把 shakmaty 颜色映射到玩家
    pub fn by_color(&self, c: shakmaty::Color) -> &dyn Player {
        self.get(side(c))
    }

    pub fn describe(&self) -> String {
        format!(
            "{} ({:?}) vs {} ({:?})",
            self.white.name(),
            self.white.kind(),
            self.black.name(),
            self.black.kind()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::parse_uci;

    #[tokio::test]
    async fn test_set_player_returns_previous() {
        let mut players = PlayerManager::new(
            Box::new(HumanPlayer::new("Alice")),
            Box::new(HumanPlayer::new("Bob")),
        );
        assert!(!players.is_ready());

        let (tx, mut rx) = mpsc::unbounded_channel();
        players.start_all(&tx).await.unwrap();
        assert!(players.is_ready());
        assert_eq!(rx.recv().await, Some(PlayerCommand::Ready { side: Side::White }));
        assert_eq!(rx.recv().await, Some(PlayerCommand::Ready { side: Side::Black }));

        let old = players.set_player(Side::Black, Box::new(RemoteAppPlayer::new("millennium")));
        assert_eq!(old.name(), "Bob");
        assert_eq!(players.get(Side::Black).kind(), PlayerKind::RemoteApp);
        // 新玩家尚未启动
        assert!(!players.is_ready());
        players
            .get_mut(Side::Black)
            .start(Side::Black, tx.clone())
            .await
            .unwrap();
        assert!(players.is_ready());
    }

    #[test]
    fn test_match_pending() {
        let pos = Chess::default();
        let pending = parse_uci(&pos, "g1f3").unwrap();
        let formed = parse_uci(&pos, "g1f3").unwrap();
        let other = parse_uci(&pos, "e2e4").unwrap();
        assert_eq!(
            match_pending(Some(&pending), &formed, "wait"),
            MoveDecision::Submit(pending.clone())
        );
        assert_eq!(
            match_pending(Some(&pending), &other, "wait"),
            MoveDecision::Mismatch("expected g1f3".into())
        );
        assert_eq!(
            match_pending(None, &other, "wait"),
            MoveDecision::Mismatch("wait".into())
        );
    }

    #[test]
    fn test_match_pending_keeps_pending_promotion() {
        let pos = crate::position::parse_fen("8/4P3/8/8/8/8/8/k6K w - - 0 1").unwrap();
        let pending = parse_uci(&pos, "e7e8n").unwrap();
        let formed = parse_uci(&pos, "e7e8q").unwrap();
        assert_eq!(
            match_pending(Some(&pending), &formed, "wait"),
            MoveDecision::Submit(pending)
        );
    }
}
