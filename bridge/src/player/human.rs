//! 本地玩家与客户端应用玩家

use async_trait::async_trait;
use centaur_protocol::Side;
use shakmaty::{Chess, Move};
use tracing::debug;

use super::{CommandSender, MoveDecision, Player, PlayerCommand, PlayerKind};
use crate::error::Result;

/// 棋盘前的人：形成什么就提交什么
pub struct HumanPlayer {
    name: String,
    ready: bool,
}

impl HumanPlayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ready: false,
        }
    }
}

#[async_trait]
impl Player for HumanPlayer {
    fn kind(&self) -> PlayerKind {
        PlayerKind::Human
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    async fn start(&mut self, side: Side, commands: CommandSender) -> Result<()> {
        self.ready = true;
        let _ = commands.send(PlayerCommand::Ready { side });
        Ok(())
    }

    async fn stop(&mut self) {
        self.ready = false;
    }

    fn on_turn(&mut self, _position: &Chess) {}

    fn on_move_formed(&mut self, _position: &Chess, mv: &Move) -> MoveDecision {
        MoveDecision::Submit(mv.clone())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn can_resign(&self) -> bool {
        true
    }
}

/// 已连接的客户端应用接管的一方
///
/// 应用通过 LED 指示走法，由人在棋盘上执行；棋盘手势不能替应用认输。
pub struct RemoteAppPlayer {
    protocol: String,
    ready: bool,
}

impl RemoteAppPlayer {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            ready: false,
        }
    }
}

#[async_trait]
impl Player for RemoteAppPlayer {
    fn kind(&self) -> PlayerKind {
        PlayerKind::RemoteApp
    }

    fn name(&self) -> String {
        self.protocol.clone()
    }

    async fn start(&mut self, side: Side, commands: CommandSender) -> Result<()> {
        debug!("{} 应用接管 {}", self.protocol, side);
        self.ready = true;
        let _ = commands.send(PlayerCommand::Ready { side });
        Ok(())
    }

    async fn stop(&mut self) {
        self.ready = false;
    }

    fn on_turn(&mut self, _position: &Chess) {}

    fn on_move_formed(&mut self, _position: &Chess, mv: &Move) -> MoveDecision {
        MoveDecision::Submit(mv.clone())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::parse_uci;

    #[test]
    fn test_human_submits_anything() {
        let pos = Chess::default();
        let mv = parse_uci(&pos, "b1c3").unwrap();
        let mut human = HumanPlayer::new("me");
        assert_eq!(human.on_move_formed(&pos, &mv), MoveDecision::Submit(mv));
        assert!(human.can_resign());
        assert!(human.pending_move().is_none());
    }

    #[test]
    fn test_remote_app_cannot_resign() {
        let app = RemoteAppPlayer::new("pegasus");
        assert!(!app.can_resign());
        assert_eq!(app.kind(), PlayerKind::RemoteApp);
    }
}
