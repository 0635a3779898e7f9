//! Millennium 模拟器（奇校验 ASCII）
//!
//! 每个字节都带奇校验位；每条消息以两位十六进制 XOR 校验结尾。
//!
//! | 命令 | 负载 | 响应 |
//! |------|------|------|
//! | `V` | 校验 | `v3130` |
//! | `I` | 4 字节 + 校验 | `i0055mm\n` |
//! | `S` | 校验 | `s` + 64 字符局面 |
//! | `W` | 地址 + 值 + 校验 | `w` + 原样 4 个十六进制字符 |
//! | `R` | 地址 + 校验 | `r` + 地址 + 值 |
//! | `X` | 校验 | `x`，熄灭 LED |
//! | `T` | 校验 | `t`，重新开启主动推送 |
//! | `L` | 节拍 + 81 个槽 + 校验 | `l`，驱动 LED |

use centaur_protocol::board::{DEFAULT_INTENSITY, DEFAULT_SPEED};
use centaur_protocol::{parity, GameEvent};
use tracing::{debug, info, warn};

use crate::emulator::{Emulator, EmulatorContext, FeedResult, Protocol};
use crate::position::Placement;

/// E²ROM 中控制主动推送的地址
pub const E2ROM_SEND_MODE_ADDR: usize = 0x02;

/// LED 网格槽数（9×9 个角点）
pub const LED_SLOTS: usize = 81;

/// 各命令的完整消息长度（含命令字与校验）
fn message_len(cmd: u8) -> Option<usize> {
    match cmd {
        b'V' | b'S' | b'X' | b'T' => Some(3),
        b'R' => Some(5),
        b'I' | b'W' => Some(7),
        b'L' => Some(1 + 2 + LED_SLOTS * 2 + 2),
        _ => None,
    }
}

/// Millennium 模拟器
pub struct Millennium {
    ctx: EmulatorContext,
    rx: Vec<u8>,
    e2rom: [u8; 256],
    spontaneous: bool,
    placement: Placement,
    last_sent_snapshot: Option<String>,
}

impl Millennium {
    pub fn new(ctx: EmulatorContext) -> Self {
        Self {
            ctx,
            rx: Vec::with_capacity(message_len(b'L').unwrap_or(167)),
            e2rom: [0; 256],
            spontaneous: true,
            placement: Placement::starting(),
            last_sent_snapshot: None,
        }
    }

    /// 是否主动推送局面
    pub fn sends_spontaneously(&self) -> bool {
        self.spontaneous
    }

    fn reply(&self, body: &str) {
        debug!("Millennium 发送: {:?}", body);
        self.ctx.send(parity::encode_message(body));
    }

    fn send_state(&mut self) {
        let snapshot = format!("s{}", self.placement.to_row_major_string());
        self.reply(&snapshot);
        self.last_sent_snapshot = Some(snapshot);
    }

    fn handle(&mut self, msg: &[u8]) {
        let text = String::from_utf8_lossy(msg).to_string();
        match msg[0] {
            b'V' => self.reply("v3130"),
            b'I' => {
                debug!("Millennium 身份查询: {:?}", &text[1..]);
                self.reply("i0055mm\n");
            }
            b'S' => self.send_state(),
            b'W' => {
                let (Some(addr), Some(value)) = (hex_pair(&msg[1..3]), hex_pair(&msg[3..5])) else {
                    return;
                };
                info!("Millennium 写 E2ROM: 地址={:#04x}, 值={:#04x}", addr, value);
                self.e2rom[addr as usize] = value;
                if addr as usize == E2ROM_SEND_MODE_ADDR {
                    self.spontaneous = value & 0x01 == 0;
                }
                self.reply(&format!("w{}", &text[1..5]));
            }
            b'R' => {
                let Some(addr) = hex_pair(&msg[1..3]) else {
                    return;
                };
                let value = self.e2rom[addr as usize];
                self.reply(&format!("r{}{:02X}", &text[1..3], value));
            }
            b'X' => {
                if let Err(e) = self.ctx.board.leds_off() {
                    warn!("熄灭 LED 失败: {}", e);
                }
                self.reply("x");
            }
            b'T' => {
                self.spontaneous = true;
                self.reply("t");
            }
            b'L' => {
                let mut slots = [0u8; LED_SLOTS];
                for (i, slot) in slots.iter_mut().enumerate() {
                    let at = 3 + i * 2;
                    *slot = hex_pair(&msg[at..at + 2]).unwrap_or(0);
                }
                let squares = translate_led_grid(&slots);
                let board = &self.ctx.board;
                let result = board.leds_off().and_then(|_| {
                    if squares.is_empty() {
                        Ok(())
                    } else {
                        board.led_array(&squares, DEFAULT_SPEED, DEFAULT_INTENSITY)
                    }
                });
                if let Err(e) = result {
                    warn!("驱动 LED 失败: {}", e);
                }
                self.reply("l");
            }
            other => debug!("Millennium 未处理命令: {:?}", other as char),
        }
    }
}

impl Emulator for Millennium {
    fn protocol(&self) -> Protocol {
        Protocol::Millennium
    }

    fn feed(&mut self, byte: u8) -> FeedResult {
        let c = parity::decode(byte);

        if self.rx.is_empty() {
            if !parity::is_odd_parity(byte) || message_len(c).is_none() {
                return FeedResult::NotMine;
            }
            self.rx.push(c);
            return FeedResult::Partial;
        }

        if !parity::is_odd_parity(byte) {
            warn!("Millennium 校验位错误: {:#04x}", byte);
        }

        let cmd = self.rx[0];
        let pos = self.rx.len();
        let free_text = cmd == b'I' && pos < 5;
        if !free_text && !c.is_ascii_hexdigit() {
            debug!("Millennium 非法字符 {:#04x}，丢弃 {:?}", c, cmd as char);
            self.rx.clear();
            return FeedResult::NotMine;
        }
        self.rx.push(c);

        let len = message_len(cmd).unwrap_or(usize::MAX);
        if self.rx.len() < len {
            return FeedResult::Partial;
        }

        let msg = std::mem::take(&mut self.rx);
        let (body, cs) = msg.split_at(len - 2);
        let expected = body.iter().fold(0u8, |acc, b| acc ^ b);
        if hex_pair(cs) != Some(expected) {
            warn!(
                "Millennium 校验和不匹配: 命令 {:?}, 期望 {:02x}",
                cmd as char, expected
            );
            return FeedResult::NotMine;
        }

        self.handle(body);
        FeedResult::Consumed
    }

    fn on_game_event(&mut self, event: &GameEvent) {
        let Some(fen) = event.position_fen() else {
            return;
        };
        match Placement::from_fen(fen) {
            Ok(placement) => self.placement = placement,
            Err(e) => {
                warn!("Millennium 无法解析局面: {}", e);
                return;
            }
        }
        match event {
            GameEvent::NewGame { .. } => {
                if let Err(e) = self.ctx.board.leds_off() {
                    warn!("熄灭 LED 失败: {}", e);
                }
                self.send_state();
            }
            _ if self.spontaneous => self.send_state(),
            _ => {}
        }
    }

    fn set_position(&mut self, fen: &str) {
        if let Ok(placement) = Placement::from_fen(fen) {
            self.placement = placement;
        }
    }

    fn reject(&mut self, byte: u8) {
        debug!("Millennium 丢弃字节 {:#04x}", byte);
    }

    fn reset(&mut self) {
        self.rx.clear();
    }
}

fn hex_pair(chars: &[u8]) -> Option<u8> {
    let text = std::str::from_utf8(chars).ok()?;
    u8::from_str_radix(text, 16).ok()
}

/// 81 角点网格 -> 逻辑方格
///
/// 方格点亮当且仅当四个角点都点亮；同一行或列连续三格时去掉中间一格。
pub fn translate_led_grid(slots: &[u8; LED_SLOTS]) -> Vec<u8> {
    let mut lit = [false; 64];
    for (x, on) in lit.iter_mut().enumerate() {
        let (r, t) = (x / 8, x % 8);
        let corners = [
            (7 - r) + 9 * t,
            (8 - r) + 9 * t,
            (16 - r) + 9 * t,
            (17 - r) + 9 * t,
        ];
        *on = corners.iter().all(|&c| slots[c] > 0);
    }

    let full = lit;
    for r in 0..8 {
        for t in 0..6 {
            let base = r * 8 + t;
            if full[base] && full[base + 1] && full[base + 2] {
                lit[base + 1] = false;
            }
        }
    }
    for r in 0..6 {
        for t in 0..8 {
            let base = r * 8 + t;
            if full[base] && full[base + 8] && full[base + 16] {
                lit[base + 8] = false;
            }
        }
    }

    lit.iter()
        .enumerate()
        .filter(|(_, &on)| on)
        .map(|(sq, _)| sq as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::testing::{feed_all, Harness};
    use centaur_protocol::BoardAction;

    fn request(body: &str) -> Vec<u8> {
        parity::encode_message(body)
    }

    fn decoded(bytes: &[u8]) -> String {
        parity::decode_bytes(bytes)
    }

    #[test]
    fn test_version_request() {
        let h = Harness::new();
        let mut emu = Millennium::new(h.context());
        let results = feed_all(&mut emu, &request("V"));
        assert_eq!(
            results,
            vec![FeedResult::Partial, FeedResult::Partial, FeedResult::Consumed]
        );
        let out = h.take_bytes();
        assert_eq!(out, parity::encode_str("v313077"));
        assert!(out.iter().all(|&b| parity::is_odd_parity(b)));
    }

    #[test]
    fn test_identity() {
        let h = Harness::new();
        let mut emu = Millennium::new(h.context());
        feed_all(&mut emu, &request("I0055"));
        assert_eq!(decoded(&h.take_bytes()), format!("i0055mm\n{}", parity::checksum_hex("i0055mm\n")));
    }

    #[test]
    fn test_state_initial_position() {
        let h = Harness::new();
        let mut emu = Millennium::new(h.context());
        feed_all(&mut emu, &request("S"));
        let text = decoded(&h.take_bytes());
        assert_eq!(text.len(), 1 + 64 + 2);
        assert!(text.starts_with("srnbqkbnrpppppppp........"));
        assert_eq!(&text[49..65], "PPPPPPPPRNBQKBNR");
    }

    #[test]
    fn test_write_and_read_e2rom() {
        let h = Harness::new();
        let mut emu = Millennium::new(h.context());
        feed_all(&mut emu, &request("W1A7F"));
        assert!(decoded(&h.take_bytes()).starts_with("w1A7F"));
        feed_all(&mut emu, &request("R1A"));
        assert!(decoded(&h.take_bytes()).starts_with("r1A7F"));
    }

    #[test]
    fn test_send_mode_flag() {
        let h = Harness::new();
        let mut emu = Millennium::new(h.context());
        assert!(emu.sends_spontaneously());
        feed_all(&mut emu, &request("W0201"));
        assert!(!emu.sends_spontaneously());
        h.take();

        let fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
        emu.on_game_event(&GameEvent::MoveAccepted {
            uci: "e2e4".into(),
            san: "e4".into(),
            fen: fen.into(),
        });
        assert!(h.take().is_empty());

        feed_all(&mut emu, &request("T"));
        assert!(emu.sends_spontaneously());
        assert!(decoded(&h.take_bytes()).starts_with('t'));
    }

    #[test]
    fn test_spontaneous_send_after_move() {
        let h = Harness::new();
        let mut emu = Millennium::new(h.context());
        let fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
        emu.on_game_event(&GameEvent::MoveAccepted {
            uci: "e2e4".into(),
            san: "e4".into(),
            fen: fen.into(),
        });
        let text = decoded(&h.take_bytes());
        assert!(text.starts_with('s'));
        // e4 是 a8..h1 顺序中的第 36 格
        assert_eq!(&text[37..38], "P");
    }

    #[test]
    fn test_extinguish() {
        let h = Harness::new();
        let mut emu = Millennium::new(h.context());
        feed_all(&mut emu, &request("X"));
        assert!(decoded(&h.take_bytes()).starts_with('x'));
        assert_eq!(h.board.take_actions(), vec![BoardAction::LedsOff]);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let h = Harness::new();
        let mut emu = Millennium::new(h.context());
        let results = feed_all(&mut emu, &parity::encode_str("V00"));
        assert_eq!(results[2], FeedResult::NotMine);
        assert!(h.take().is_empty());
    }

    #[test]
    fn test_rejects_non_command_and_even_parity() {
        let h = Harness::new();
        let mut emu = Millennium::new(h.context());
        assert_eq!(emu.feed(parity::encode(b'Q')), FeedResult::NotMine);
        // 未编码的 'V' 为偶校验
        assert_eq!(emu.feed(b'V'), FeedResult::NotMine);
        // Chessnut 使能命令
        assert_eq!(emu.feed(0x21), FeedResult::NotMine);
    }

    fn grid_for(squares: &[u8]) -> [u8; LED_SLOTS] {
        let mut slots = [0u8; LED_SLOTS];
        for &sq in squares {
            let (r, t) = (sq as usize / 8, sq as usize % 8);
            for c in [(7 - r) + 9 * t, (8 - r) + 9 * t, (16 - r) + 9 * t, (17 - r) + 9 * t] {
                slots[c] = 0x40;
            }
        }
        slots
    }

    #[test]
    fn test_led_grid_single_square() {
        assert_eq!(translate_led_grid(&grid_for(&[28])), vec![28]);
        assert!(translate_led_grid(&[0; LED_SLOTS]).is_empty());
    }

    #[test]
    fn test_led_grid_two_square_move_drops_middle() {
        // e2 -> e4：e3 被两端的角点同时点亮后去掉
        let lit = translate_led_grid(&grid_for(&[12, 28]));
        assert_eq!(lit, vec![12, 28]);
        let slots = grid_for(&[12, 20, 28]);
        assert_eq!(translate_led_grid(&slots), vec![12, 28]);
    }

    #[test]
    fn test_led_command_drives_board() {
        let h = Harness::new();
        let mut emu = Millennium::new(h.context());
        let slots = grid_for(&[12, 28]);
        let mut body = String::from("L05");
        for s in slots {
            body.push_str(&format!("{s:02X}"));
        }
        let results = feed_all(&mut emu, &request(&body));
        assert_eq!(results.last(), Some(&FeedResult::Consumed));
        assert!(decoded(&h.take_bytes()).starts_with('l'));
        assert_eq!(
            h.board.take_actions(),
            vec![
                BoardAction::LedsOff,
                BoardAction::LedArray {
                    squares: vec![12, 28],
                    speed: DEFAULT_SPEED,
                    intensity: DEFAULT_INTENSITY
                }
            ]
        );
    }

    #[test]
    fn test_deterministic_output() {
        let stream: Vec<u8> = ["V", "S", "W0200", "R02", "X"]
            .iter()
            .flat_map(|b| request(b))
            .collect();
        let run = || {
            let h = Harness::new();
            let mut emu = Millennium::new(h.context());
            feed_all(&mut emu, &stream);
            h.take_bytes()
        };
        assert_eq!(run(), run());
    }
}
