//! 客户端会话与协议自动识别
//!
//! 识别阶段每个字节按优先级依次交给所有候选模拟器；
//! 第一个连续两次返回 `Consumed` 的候选胜出，其余被丢弃。
//! 返回 `NotMine` 的候选连续计数清零；所有候选都拒绝的字节记录警告后丢弃。

use centaur_protocol::GameEvent;
use tracing::{debug, info, warn};

use crate::emulator::{self, Emulator, EmulatorContext, FeedResult, Protocol};

/// 胜出所需的连续完整消息数
pub const DETECTION_STREAK: u32 = 2;

/// 会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Detecting,
    Active,
}

struct Candidate {
    emulator: Box<dyn Emulator>,
    streak: u32,
}

/// 单个客户端连接的模拟器会话
pub struct Session {
    state: SessionState,
    candidates: Vec<Candidate>,
    active: Option<Box<dyn Emulator>>,
}

impl Session {
    /// 自动识别会话
    pub fn detecting(ctx: EmulatorContext) -> Self {
        let candidates = Protocol::PRIORITY
            .iter()
            .map(|&p| Candidate {
                emulator: emulator::create(p, ctx.clone()),
                streak: 0,
            })
            .collect();
        Self {
            state: SessionState::Detecting,
            candidates,
            active: None,
        }
    }

    /// 固定协议会话
    pub fn fixed(protocol: Protocol, ctx: EmulatorContext) -> Self {
        Self {
            state: SessionState::Active,
            candidates: Vec::new(),
            active: Some(emulator::create(protocol, ctx)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 已确定的协议
    pub fn protocol(&self) -> Option<Protocol> {
        self.active.as_ref().map(|e| e.protocol())
    }

    /// 喂入客户端字节；识别成功时返回胜出协议
    pub fn feed(&mut self, byte: u8) -> Option<Protocol> {
        match self.state {
            SessionState::Disconnected => None,
            SessionState::Active => {
                if let Some(active) = self.active.as_mut() {
                    if active.feed(byte) == FeedResult::NotMine {
                        active.reject(byte);
                    }
                }
                None
            }
            SessionState::Detecting => self.detect(byte),
        }
    }

    /// 喂入一段字节，返回其间识别出的协议
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Option<Protocol> {
        let mut detected = None;
        for &b in bytes {
            if let Some(p) = self.feed(b) {
                detected = Some(p);
            }
        }
        detected
    }

    fn detect(&mut self, byte: u8) -> Option<Protocol> {
        let mut accepted = false;
        for candidate in self.candidates.iter_mut() {
            match candidate.emulator.feed(byte) {
                FeedResult::Consumed => {
                    candidate.streak += 1;
                    accepted = true;
                }
                FeedResult::Partial => accepted = true,
                FeedResult::NotMine => candidate.streak = 0,
            }
        }

        if !accepted {
            warn!("没有模拟器接受字节 {:#04x}，丢弃", byte);
            return None;
        }

        let winner = self
            .candidates
            .iter()
            .position(|c| c.streak >= DETECTION_STREAK)?;
        let chosen = self.candidates.swap_remove(winner);
        for other in self.candidates.drain(..) {
            debug!("丢弃候选模拟器: {}", other.emulator.protocol());
        }
        let protocol = chosen.emulator.protocol();
        info!("识别到客户端协议: {}", protocol);
        self.active = Some(chosen.emulator);
        self.state = SessionState::Active;
        Some(protocol)
    }

    /// 对局事件只发给已激活的模拟器
    pub fn on_game_event(&mut self, event: &GameEvent) {
        if let Some(active) = self.active.as_mut() {
            active.on_game_event(event);
        } else if let Some(fen) = event.position_fen() {
            for candidate in self.candidates.iter_mut() {
                candidate.emulator.set_position(fen);
            }
        }
    }

    /// 静默同步局面
    pub fn set_position(&mut self, fen: &str) {
        if let Some(active) = self.active.as_mut() {
            active.set_position(fen);
        }
        for candidate in self.candidates.iter_mut() {
            candidate.emulator.set_position(fen);
        }
    }

    /// 断开：销毁所有模拟器
    pub fn close(&mut self) {
        self.candidates.clear();
        if let Some(mut active) = self.active.take() {
            active.reset();
        }
        self.state = SessionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::testing::Harness;
    use crate::pegasus;
    use centaur_protocol::{parity, PieceEvent};

    #[test]
    fn test_millennium_version_answered_during_detection() {
        let h = Harness::new();
        let mut session = Session::detecting(h.context());
        assert_eq!(session.feed_bytes(&parity::encode_message("V")), None);
        assert_eq!(session.state(), SessionState::Detecting);
        assert_eq!(
            h.take_bytes(),
            parity::encode_message("v3130")
        );

        assert_eq!(
            session.feed_bytes(&parity::encode_message("S")),
            Some(Protocol::Millennium)
        );
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.protocol(), Some(Protocol::Millennium));
    }

    #[test]
    fn test_pegasus_detected() {
        let h = Harness::new();
        let mut session = Session::detecting(h.context());
        assert_eq!(session.feed(b'B'), None);
        assert_eq!(session.feed(b'M'), Some(Protocol::Pegasus));
        let out = h.take_bytes();
        assert_eq!(out[0], pegasus::MSG_BOARD_DUMP);
    }

    #[test]
    fn test_chessnut_detected() {
        let h = Harness::new();
        let mut session = Session::detecting(h.context());
        assert_eq!(session.feed_bytes(&[0x21, 0x01, 0x00]), None);
        assert_eq!(h.take().len(), 1);
        assert_eq!(
            session.feed_bytes(&[0x29, 0x01, 0x00]),
            Some(Protocol::Chessnut)
        );
    }

    #[test]
    fn test_garbage_is_dropped() {
        let h = Harness::new();
        let mut session = Session::detecting(h.context());
        assert_eq!(session.feed_bytes(&[0xff, 0x00, 0xfe]), None);
        assert_eq!(session.state(), SessionState::Detecting);
        assert!(h.take().is_empty());
    }

    #[test]
    fn test_active_pegasus_echoes_unknown() {
        let h = Harness::new();
        let mut session = Session::fixed(Protocol::Pegasus, h.context());
        session.feed(0x31);
        assert_eq!(h.take_bytes(), vec![0x31]);
    }

    #[test]
    fn test_events_only_reach_active_emulator() {
        let h = Harness::new();
        let mut session = Session::detecting(h.context());
        session.on_game_event(&GameEvent::Piece(PieceEvent::lift(12)));
        assert!(h.take().is_empty());

        let mut session = Session::fixed(Protocol::Pegasus, h.context());
        session.on_game_event(&GameEvent::Piece(PieceEvent::lift(12)));
        assert_eq!(h.take_bytes(), pegasus::frame(pegasus::MSG_FIELD_UPDATE, &[52, 0]));
    }

    #[test]
    fn test_close() {
        let h = Harness::new();
        let mut session = Session::fixed(Protocol::Chessnut, h.context());
        session.close();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.feed(0x21), None);
        assert_eq!(session.protocol(), None);
    }
}
