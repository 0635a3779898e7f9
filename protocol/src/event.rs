//! 事件类型
//!
//! 包含:
//! - 棋子拿起/放下事件及其负载解析
//! - 按键事件解析
//! - 对局事件（分发给观察者与客户端模拟器）

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::square::{rotate_field, square_name};
use crate::{EVENT_LIFT, EVENT_PLACE, KEY_SIGNATURE};

// ============================================================================
// 棋子事件
// ============================================================================

/// 棋子事件类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceEventKind {
    Lift,
    Place,
}

/// 棋子事件（逻辑索引）
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PieceEvent {
    pub kind: PieceEventKind,
    pub square: u8,
    /// 硬件时间戳（秒），仅用于日志与回放
    pub timestamp: f64,
}

impl PieceEvent {
    pub fn lift(square: u8) -> Self {
        Self {
            kind: PieceEventKind::Lift,
            square,
            timestamp: 0.0,
        }
    }

    pub fn place(square: u8) -> Self {
        Self {
            kind: PieceEventKind::Place,
            square,
            timestamp: 0.0,
        }
    }

    pub fn is_lift(&self) -> bool {
        self.kind == PieceEventKind::Lift
    }

    /// 线上索引
    pub fn wire_square(&self) -> u8 {
        rotate_field(self.square)
    }
}

impl fmt::Display for PieceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.kind {
            PieceEventKind::Lift => "LIFT",
            PieceEventKind::Place => "PLACE",
        };
        write!(f, "{verb} {} @{:.3}s", square_name(self.square), self.timestamp)
    }
}

/// 解码分层时间戳: 亚秒/秒/分/时
pub fn decode_timestamp(bytes: &[u8]) -> f64 {
    let get = |i: usize| bytes.get(i).copied().unwrap_or(0) as f64;
    get(0) / 256.0 + get(1) + get(2) * 60.0 + get(3) * 3600.0
}

/// 解析变化列表负载
///
/// 负载为时间戳前缀 + 若干 `(0x40|0x41, 线上方格)` 对；
/// 方格在此处转换为逻辑索引。
pub fn parse_piece_events(payload: &[u8]) -> Vec<PieceEvent> {
    let start = payload
        .iter()
        .position(|&b| b == EVENT_LIFT || b == EVENT_PLACE)
        .unwrap_or(payload.len());
    let timestamp = decode_timestamp(&payload[..start.min(4)]);

    let mut events = Vec::new();
    let mut i = start;
    while i + 1 < payload.len() {
        let marker = payload[i];
        let kind = match marker {
            EVENT_LIFT => PieceEventKind::Lift,
            EVENT_PLACE => PieceEventKind::Place,
            _ => {
                i += 1;
                continue;
            }
        };
        let wire = payload[i + 1];
        if wire < 64 {
            events.push(PieceEvent {
                kind,
                square: rotate_field(wire),
                timestamp,
            });
        }
        i += 2;
    }
    events
}

// ============================================================================
// 按键事件
// ============================================================================

/// 棋盘按键
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Back,
    Tick,
    Up,
    Down,
    Help,
    Play,
    LongPlay,
}

impl Key {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Key::Back),
            0x10 => Some(Key::Tick),
            0x08 => Some(Key::Up),
            0x02 => Some(Key::Down),
            0x40 => Some(Key::Help),
            0x04 => Some(Key::Play),
            0x06 => Some(Key::LongPlay),
            _ => None,
        }
    }
}

/// 按键事件
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: Key,
    pub pressed: bool,
}

/// 在负载中查找 `00 14 0a 05 <down> <up>` 序列
pub fn parse_key_event(payload: &[u8]) -> Option<KeyEvent> {
    let idx = payload
        .windows(KEY_SIGNATURE.len())
        .position(|w| w == KEY_SIGNATURE)?
        + KEY_SIGNATURE.len();
    let first = payload.get(idx).copied().unwrap_or(0);
    let second = payload.get(idx + 1).copied().unwrap_or(0);
    if first != 0 {
        Key::from_code(first).map(|key| KeyEvent { key, pressed: true })
    } else if second != 0 {
        Key::from_code(second).map(|key| KeyEvent {
            key,
            pressed: false,
        })
    } else {
        None
    }
}

// ============================================================================
// 对局事件
// ============================================================================

/// 棋方
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opponent(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => write!(f, "white"),
            Side::Black => write!(f, "black"),
        }
    }
}

/// 对局事件，按注册顺序分发给观察者
///
/// 局面以 FEN 字符串携带，观察者无需依赖规则库。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEvent {
    /// 新对局开始
    NewGame { fen: String },
    /// 走法已接受
    MoveAccepted { uci: String, san: String, fen: String },
    /// 悔棋
    Takeback { fen: String },
    /// 物理棋子事件
    Piece(PieceEvent),
    /// 轮到某方
    Turn { side: Side, fen: String },
    /// 非人类玩家已决定的走法（用于 LED 提示）
    PendingMove { side: Side, uci: String },
    /// 进入纠正模式
    CorrectionEntered { reason: String },
    /// 退出纠正模式
    CorrectionExited,
    /// 双王入中心手势
    KingsInCenter,
    /// 客户端应用已连接
    ClientConnected { protocol: String, side: Side },
    /// 客户端应用已断开
    ClientDisconnected { protocol: String },
    /// 状态消息
    Status { message: String },
    /// 对局结束
    GameOver { result: String, termination: String },
}

impl GameEvent {
    /// 事件携带的新局面（若有）
    pub fn position_fen(&self) -> Option<&str> {
        match self {
            GameEvent::NewGame { fen }
            | GameEvent::MoveAccepted { fen, .. }
            | GameEvent::Takeback { fen } => Some(fen),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_decoding() {
        assert_eq!(decode_timestamp(&[]), 0.0);
        assert_eq!(decode_timestamp(&[128]), 0.5);
        assert_eq!(decode_timestamp(&[0, 5, 3]), 185.0);
        assert_eq!(decode_timestamp(&[64, 1, 0, 2]), 7201.25);
    }

    #[test]
    fn test_parse_lift_place() {
        // 时间 00 07 00，拿起线上 52（e2），放下线上 36（e4）
        let payload = [0x00, 0x07, 0x00, 0x40, 52, 0x41, 36];
        let events = parse_piece_events(&payload);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, PieceEventKind::Lift);
        assert_eq!(square_name(events[0].square), "e2");
        assert_eq!(events[1].kind, PieceEventKind::Place);
        assert_eq!(square_name(events[1].square), "e4");
        assert_eq!(events[0].timestamp, 7.0);
    }

    #[test]
    fn test_timestamps_non_decreasing_within_notification() {
        let payload = [0x10, 0x3b, 0x3b, 0x00, 0x40, 0, 0x41, 1, 0x40, 2];
        let events = parse_piece_events(&payload);
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_hour_wrap_resets() {
        let before = parse_piece_events(&[0xff, 59, 59, 0, 0x40, 0]);
        let after = parse_piece_events(&[0x00, 0, 0, 1, 0x40, 0]);
        assert!(after[0].timestamp > before[0].timestamp);
        assert_eq!(after[0].timestamp, 3600.0);
    }

    #[test]
    fn test_skips_noise_and_out_of_range() {
        let payload = [0x40, 0x99, 0x07, 0x41, 0x05];
        let events = parse_piece_events(&payload);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].square, rotate_field(5));
    }

    #[test]
    fn test_empty_payload() {
        assert!(parse_piece_events(&[]).is_empty());
    }

    #[test]
    fn test_key_down_and_up() {
        let down = [0x01, 0x00, 0x14, 0x0a, 0x05, 0x10, 0x00];
        assert_eq!(
            parse_key_event(&down),
            Some(KeyEvent {
                key: Key::Tick,
                pressed: true
            })
        );
        let up = [0x00, 0x14, 0x0a, 0x05, 0x00, 0x01];
        assert_eq!(
            parse_key_event(&up),
            Some(KeyEvent {
                key: Key::Back,
                pressed: false
            })
        );
        assert_eq!(parse_key_event(&[0x00, 0x14]), None);
    }

    #[test]
    fn test_position_fen() {
        let ev = GameEvent::Takeback { fen: "x".into() };
        assert_eq!(ev.position_fen(), Some("x"));
        assert_eq!(GameEvent::KingsInCenter.position_fen(), None);
    }
}
