//! Pegasus 模拟器（Nordic UART 二进制）
//!
//! 出站帧: `type, len_hi, len_lo, payload..`，`len = payload + 3`（14 位）。
//! 入站命令多为单字节 ASCII；LED 控制 (0x60) 与开发者密钥 (0x63)
//! 带长度前缀: `type, len, body[len]`。
//!
//! 方格一律使用线上索引，LED 字段在此转换为逻辑索引。

use centaur_protocol::{rotate_field, GameEvent, PieceEventKind};
use tracing::{debug, info, warn};

use crate::emulator::{Emulator, EmulatorContext, FeedResult, Protocol};

pub const MSG_BOARD_DUMP: u8 = 0x86;
pub const MSG_FIELD_UPDATE: u8 = 0x8e;
pub const MSG_UNKNOWN_143: u8 = 0x8f;
pub const MSG_UNKNOWN_144: u8 = 0x90;
pub const MSG_SERIALNR: u8 = 0x91;
pub const MSG_TRADEMARK: u8 = 0x92;
pub const MSG_VERSION: u8 = 0x93;
pub const MSG_HARDWARE_VERSION: u8 = 0x96;
pub const MSG_BATTERY_STATUS: u8 = 0xa0;
pub const MSG_LONG_SERIALNR: u8 = 0xa2;
pub const MSG_UNKNOWN_163: u8 = 0xa3;
pub const MSG_LOCK_STATE: u8 = 0xa4;
pub const MSG_DEVKEY_STATE: u8 = 0xa5;

/// LED 控制命令
pub const CMD_LED_CONTROL: u8 = 0x60;

/// 开发者密钥注册
pub const CMD_DEVELOPER_KEY: u8 = 0x63;

/// 带长度命令的最大长度
const MAX_FRAMED_LEN: u8 = 64;

/// 电池无法读取时上报的电量
const FALLBACK_BATTERY_LEVEL: u8 = 0x58;

/// 商标字符串（序列号由调用方补全）
const TRADEMARK_PREFIX: &str = "Digital Game Technology\r\nCopyright (c) 2021 DGT\r\nsoftware version: 1.00, build: 210722\r\nhardware version: 1.00, serial no: ";

/// 默认序列号
pub const DEFAULT_SERIAL: &str = "PXXXXXXXXX";

/// 编码出站帧
pub fn frame(kind: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() + 3;
    let mut out = Vec::with_capacity(len);
    out.push(kind);
    out.push(((len >> 7) & 0x7f) as u8);
    out.push((len & 0x7f) as u8);
    out.extend_from_slice(payload);
    out
}

enum RxState {
    Idle,
    Framed { kind: u8, len: Option<u8>, body: Vec<u8> },
}

/// Pegasus 模拟器
pub struct Pegasus {
    ctx: EmulatorContext,
    rx: RxState,
    serial: String,
}

impl Pegasus {
    pub fn new(ctx: EmulatorContext) -> Self {
        Self {
            ctx,
            rx: RxState::Idle,
            serial: DEFAULT_SERIAL.to_string(),
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }

    fn send(&self, kind: u8, payload: &[u8]) {
        debug!("Pegasus 发送: type={:#04x}, len={}", kind, payload.len());
        self.ctx.send(frame(kind, payload));
    }

    fn send_battery(&self) {
        let level = match self.ctx.board.battery() {
            Ok(status) => status.percent(),
            Err(e) => {
                warn!("读取电池失败: {}", e);
                FALLBACK_BATTERY_LEVEL
            }
        };
        self.send(MSG_BATTERY_STATUS, &[level, 0, 0, 0, 0, 0, 0, 0, 2]);
    }

    /// 单字节命令，返回是否已识别
    fn handle_single(&mut self, cmd: u8) -> bool {
        match cmd {
            b'B' | b'b' => {
                let occupancy = self.ctx.board.occupancy();
                self.send(MSG_BOARD_DUMP, &occupancy.to_wire_bytes());
            }
            b'D' => debug!("Pegasus 收到 D"),
            b'E' => self.send(MSG_SERIALNR, b"ABCDE"),
            b'F' => self.send(MSG_UNKNOWN_144, &[0]),
            b'G' => {
                let trademark = format!("{TRADEMARK_PREFIX}{}", self.serial);
                self.send(MSG_TRADEMARK, trademark.as_bytes());
            }
            b'H' => self.send(MSG_HARDWARE_VERSION, &[1, 0]),
            b'I' => self.send(MSG_UNKNOWN_143, &[]),
            b'L' | b'@' => self.send_battery(),
            b'M' => self.send(MSG_VERSION, &[1, 0]),
            b'U' => self.send(MSG_LONG_SERIALNR, b"ABCDEFGHIJ"),
            b'V' => self.send(MSG_UNKNOWN_163, &[0]),
            b'Y' => self.send(MSG_LOCK_STATE, &[0]),
            b'Z' => self.send(MSG_DEVKEY_STATE, &[0]),
            _ => return false,
        }
        true
    }

    fn handle_framed(&mut self, kind: u8, body: &[u8]) {
        match kind {
            CMD_DEVELOPER_KEY => {
                info!("Pegasus 开发者密钥注册 ({} 字节)", body.len());
                self.send(MSG_DEVKEY_STATE, &[1]);
            }
            CMD_LED_CONTROL => self.led_control(body),
            _ => {}
        }
    }

    /// `[05, speed, mode, intensity, fields.., 00]` 或 `[00, 00]`
    fn led_control(&self, body: &[u8]) {
        let board = &self.ctx.board;
        if body == [0x00, 0x00] {
            if let Err(e) = board.leds_off() {
                warn!("熄灭 LED 失败: {}", e);
            }
            self.send_battery();
            return;
        }
        if body.len() < 5 || body[0] != 0x05 {
            debug!("Pegasus 忽略 LED 命令: {:02x?}", body);
            return;
        }

        let (speed, mode) = (body[1], body[2]);
        let intensity = body[3].clamp(1, 10);
        let fields: Vec<u8> = body[4..body.len() - 1]
            .iter()
            .filter(|&&f| f < 64)
            .map(|&f| rotate_field(f))
            .collect();
        debug!(
            "Pegasus LED: speed={} mode={} intensity={} fields={:?}",
            speed, mode, intensity, fields
        );

        let result = match fields.as_slice() {
            [] => board.leds_off(),
            [single] => board.led(*single, intensity),
            _ => board.led_array(&fields, speed, intensity),
        };
        if let Err(e) = result {
            warn!("驱动 LED 失败: {}", e);
        }
    }
}

impl Emulator for Pegasus {
    fn protocol(&self) -> Protocol {
        Protocol::Pegasus
    }

    fn feed(&mut self, byte: u8) -> FeedResult {
        match &mut self.rx {
            RxState::Idle => {
                if byte == CMD_LED_CONTROL || byte == CMD_DEVELOPER_KEY {
                    self.rx = RxState::Framed {
                        kind: byte,
                        len: None,
                        body: Vec::new(),
                    };
                    FeedResult::Partial
                } else if self.handle_single(byte) {
                    FeedResult::Consumed
                } else {
                    FeedResult::NotMine
                }
            }
            RxState::Framed { len: len @ None, .. } => {
                if byte == 0 || byte > MAX_FRAMED_LEN {
                    self.rx = RxState::Idle;
                    return FeedResult::NotMine;
                }
                *len = Some(byte);
                FeedResult::Partial
            }
            RxState::Framed {
                kind,
                len: Some(len),
                body,
            } => {
                if *kind == CMD_LED_CONTROL && body.is_empty() && byte != 0x00 && byte != 0x05 {
                    self.rx = RxState::Idle;
                    return FeedResult::NotMine;
                }
                body.push(byte);
                if body.len() < *len as usize {
                    return FeedResult::Partial;
                }
                let kind = *kind;
                let body = std::mem::take(body);
                self.rx = RxState::Idle;
                self.handle_framed(kind, &body);
                FeedResult::Consumed
            }
        }
    }

    fn on_game_event(&mut self, event: &GameEvent) {
        if let GameEvent::Piece(piece) = event {
            let action = match piece.kind {
                PieceEventKind::Lift => 0,
                PieceEventKind::Place => 1,
            };
            self.send(MSG_FIELD_UPDATE, &[piece.wire_square(), action]);
        }
    }

    fn set_position(&mut self, _fen: &str) {}

    fn reject(&mut self, byte: u8) {
        debug!("Pegasus 未知字节 {:#04x}，原样回显", byte);
        self.ctx.send(vec![byte]);
    }

    fn reset(&mut self) {
        self.rx = RxState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::testing::{feed_all, Harness};
    use centaur_protocol::{BatteryStatus, BoardAction, Occupancy, PieceEvent};

    #[test]
    fn test_frame_layout() {
        assert_eq!(frame(MSG_VERSION, &[1, 0]), vec![0x93, 0x00, 0x05, 1, 0]);
        let long = frame(MSG_TRADEMARK, &[b'x'; 200]);
        assert_eq!(long[1], 1);
        assert_eq!(long[2], (203 & 0x7f) as u8);
    }

    #[test]
    fn test_board_dump() {
        let h = Harness::new();
        h.board.set_occupancy(Occupancy::EMPTY.with(0));
        let mut emu = Pegasus::new(h.context());
        assert_eq!(emu.feed(b'B'), FeedResult::Consumed);
        let out = h.take_bytes();
        assert_eq!(&out[..3], &[0x86, 0x00, 67]);
        let dump = &out[3..];
        assert_eq!(dump.len(), 64);
        // a1 的线上索引为 56
        assert_eq!(dump[56], 1);
        assert_eq!(dump.iter().filter(|&&b| b == 1).count(), 1);
    }

    #[test]
    fn test_fixed_replies() {
        let h = Harness::new();
        let mut emu = Pegasus::new(h.context());
        let cases: &[(u8, Vec<u8>)] = &[
            (b'E', frame(MSG_SERIALNR, b"ABCDE")),
            (b'F', frame(MSG_UNKNOWN_144, &[0])),
            (b'H', frame(MSG_HARDWARE_VERSION, &[1, 0])),
            (b'I', frame(MSG_UNKNOWN_143, &[])),
            (b'M', frame(MSG_VERSION, &[1, 0])),
            (b'U', frame(MSG_LONG_SERIALNR, b"ABCDEFGHIJ")),
            (b'V', frame(MSG_UNKNOWN_163, &[0])),
            (b'Y', frame(MSG_LOCK_STATE, &[0])),
            (b'Z', frame(MSG_DEVKEY_STATE, &[0])),
        ];
        for (cmd, expected) in cases {
            assert_eq!(emu.feed(*cmd), FeedResult::Consumed);
            assert_eq!(&h.take_bytes(), expected, "command {:?}", *cmd as char);
        }
    }

    #[test]
    fn test_trademark_ends_with_serial() {
        let h = Harness::new();
        let mut emu = Pegasus::new(h.context()).with_serial("P123456789");
        emu.feed(b'G');
        let out = h.take_bytes();
        assert_eq!(out[0], MSG_TRADEMARK);
        let text = String::from_utf8(out[3..].to_vec()).unwrap();
        assert!(text.starts_with("Digital Game Technology\r\n"));
        assert!(text.ends_with("serial no: P123456789"));
    }

    #[test]
    fn test_battery_from_board() {
        let h = Harness::new();
        h.board.set_battery(BatteryStatus {
            level: 20,
            charging: false,
        });
        let mut emu = Pegasus::new(h.context());
        emu.feed(b'L');
        assert_eq!(
            h.take_bytes(),
            frame(MSG_BATTERY_STATUS, &[100, 0, 0, 0, 0, 0, 0, 0, 2])
        );
        emu.feed(b'@');
        assert_eq!(h.take_bytes()[0], MSG_BATTERY_STATUS);
    }

    #[test]
    fn test_leds_off_command() {
        let h = Harness::new();
        let mut emu = Pegasus::new(h.context());
        let results = feed_all(&mut emu, &[0x60, 0x02, 0x00, 0x00]);
        assert_eq!(results.last(), Some(&FeedResult::Consumed));
        assert_eq!(h.board.take_actions(), vec![BoardAction::LedsOff]);
        assert_eq!(h.take_bytes()[0], MSG_BATTERY_STATUS);
    }

    #[test]
    fn test_led_fields_map_to_array() {
        let h = Harness::new();
        let mut emu = Pegasus::new(h.context());
        // e2 线上 52，e4 线上 36，亮度 20 被截断为 10
        let cmd = [0x60, 0x07, 0x05, 0x03, 0x00, 20, 52, 36, 0x00];
        let results = feed_all(&mut emu, &cmd);
        assert_eq!(results.last(), Some(&FeedResult::Consumed));
        assert_eq!(
            h.board.take_actions(),
            vec![BoardAction::LedArray {
                squares: vec![12, 28],
                speed: 3,
                intensity: 10
            }]
        );
        assert!(h.take().is_empty());
    }

    #[test]
    fn test_led_lights_every_field() {
        let h = Harness::new();
        let mut emu = Pegasus::new(h.context());
        // 王车易位提示：e1 g1 h1 f1，越界字段 64 被忽略
        let cmd = [0x60, 0x0a, 0x05, 0x03, 0x01, 4, 60, 62, 63, 64, 61, 0x00];
        feed_all(&mut emu, &cmd);
        assert_eq!(
            h.board.take_actions(),
            vec![BoardAction::LedArray {
                squares: vec![4, 6, 7, 5],
                speed: 3,
                intensity: 4
            }]
        );
    }

    #[test]
    fn test_led_single_and_none() {
        let h = Harness::new();
        let mut emu = Pegasus::new(h.context());
        feed_all(&mut emu, &[0x60, 0x06, 0x05, 0x03, 0x00, 0, 63, 0x00]);
        feed_all(&mut emu, &[0x60, 0x05, 0x05, 0x03, 0x00, 5, 0x00]);
        assert_eq!(
            h.board.take_actions(),
            vec![
                BoardAction::Led {
                    square: 7,
                    intensity: 1
                },
                BoardAction::LedsOff
            ]
        );
    }

    #[test]
    fn test_field_update_on_piece_event() {
        let h = Harness::new();
        let mut emu = Pegasus::new(h.context());
        emu.on_game_event(&GameEvent::Piece(PieceEvent::lift(12)));
        emu.on_game_event(&GameEvent::Piece(PieceEvent::place(28)));
        assert_eq!(
            h.take_bytes(),
            [frame(MSG_FIELD_UPDATE, &[52, 0]), frame(MSG_FIELD_UPDATE, &[36, 1])].concat()
        );
    }

    #[test]
    fn test_rejects_foreign_bytes() {
        let h = Harness::new();
        let mut emu = Pegasus::new(h.context());
        assert_eq!(emu.feed(0xd6), FeedResult::NotMine);
        assert_eq!(emu.feed(0x21), FeedResult::NotMine);
        // 长度超限
        assert_eq!(emu.feed(0x60), FeedResult::Partial);
        assert_eq!(emu.feed(0x7f), FeedResult::NotMine);
        // LED 体首字节非法
        assert_eq!(emu.feed(0x60), FeedResult::Partial);
        assert_eq!(emu.feed(0x03), FeedResult::Partial);
        assert_eq!(emu.feed(0x09), FeedResult::NotMine);
        assert!(h.take().is_empty());
    }

    #[test]
    fn test_reject_echoes() {
        let h = Harness::new();
        let mut emu = Pegasus::new(h.context());
        emu.reject(0x31);
        assert_eq!(h.take_bytes(), vec![0x31]);
    }

    #[test]
    fn test_developer_key() {
        let h = Harness::new();
        let mut emu = Pegasus::new(h.context());
        let results = feed_all(&mut emu, &[0x63, 0x03, 0x12, 0x34, 0x00]);
        assert_eq!(results.last(), Some(&FeedResult::Consumed));
        assert_eq!(h.take_bytes(), frame(MSG_DEVKEY_STATE, &[1]));
    }
}
