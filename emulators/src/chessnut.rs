//! Chessnut 模拟器（4 位压缩局面）
//!
//! FEN 服务推送 36 字节局面包 `[0x01, 0x24, 32 字节, 0x00, 0x00]`；
//! 操作服务接收 `[cmd, len, payload..]` 命令。

use centaur_protocol::board::{DEFAULT_INTENSITY, DEFAULT_SPEED};
use centaur_protocol::GameEvent;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::emulator::{Emulator, EmulatorContext, FeedResult, Protocol};
use crate::position::Placement;

pub const CMD_LED_CONTROL: u8 = 0x0a;
pub const CMD_INIT: u8 = 0x0b;
pub const CMD_ENABLE_REPORTING: u8 = 0x21;
pub const CMD_HAPTIC: u8 = 0x27;
pub const CMD_BATTERY_REQUEST: u8 = 0x29;
pub const CMD_SOUND: u8 = 0x31;

pub const RESP_BATTERY: u8 = 0x2a;

/// 局面包头
pub const FEN_PACKET_HEADER: [u8; 2] = [0x01, 0x24];

/// 局面包总长
pub const FEN_PACKET_LEN: usize = 36;

/// 命令负载最大长度
const MAX_PAYLOAD_LEN: u8 = 64;

/// 压缩局面解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackError {
    #[error("Invalid piece code {code} at index {index}")]
    InvalidCode { code: u8, index: usize },
}

fn piece_code(piece: Option<char>) -> u8 {
    match piece {
        None => 0,
        Some('q') => 1,
        Some('k') => 2,
        Some('b') => 3,
        Some('p') => 4,
        Some('n') => 5,
        Some('R') => 6,
        Some('P') => 7,
        Some('r') => 8,
        Some('B') => 9,
        Some('N') => 10,
        Some('Q') => 11,
        Some('K') => 12,
        Some(_) => 0,
    }
}

fn code_piece(code: u8) -> Option<Option<char>> {
    let piece = match code {
        0 => None,
        1 => Some('q'),
        2 => Some('k'),
        3 => Some('b'),
        4 => Some('p'),
        5 => Some('n'),
        6 => Some('R'),
        7 => Some('P'),
        8 => Some('r'),
        9 => Some('B'),
        10 => Some('N'),
        11 => Some('Q'),
        12 => Some('K'),
        _ => return None,
    };
    Some(piece)
}

/// 压缩局面：顺序 h8, g8 .. a8, h7 .. a1，每字节低半字节为先
pub fn pack_position(placement: &Placement) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, slot) in out.iter_mut().enumerate() {
        let first = piece_code(placement.at(63 - (2 * i) as u8));
        let second = piece_code(placement.at(63 - (2 * i + 1) as u8));
        *slot = first | (second << 4);
    }
    out
}

/// 解压局面
pub fn unpack_position(bytes: &[u8; 32]) -> Result<Placement, PackError> {
    let mut squares = [None; 64];
    for (i, &byte) in bytes.iter().enumerate() {
        for (half, code) in [(0, byte & 0x0f), (1, byte >> 4)] {
            let index = 2 * i + half;
            let piece = code_piece(code).ok_or(PackError::InvalidCode { code, index })?;
            squares[63 - index] = piece;
        }
    }
    Ok(Placement::from_squares(squares))
}

/// 完整局面包
pub fn fen_packet(placement: &Placement) -> Vec<u8> {
    let mut packet = Vec::with_capacity(FEN_PACKET_LEN);
    packet.extend_from_slice(&FEN_PACKET_HEADER);
    packet.extend_from_slice(&pack_position(placement));
    packet.extend_from_slice(&[0x00, 0x00]);
    packet
}

/// LED 行字节 -> 逻辑方格；第一字节为第 8 行，最高位为 a 列
pub fn led_rows_to_squares(rows: &[u8]) -> Vec<u8> {
    let mut squares = Vec::new();
    for (r, &row) in rows.iter().take(8).enumerate() {
        let rank = 7 - r as u8;
        for file in 0..8u8 {
            if row & (0x80 >> file) != 0 {
                squares.push(rank * 8 + file);
            }
        }
    }
    squares.sort_unstable();
    squares
}

/// Chessnut 模拟器
pub struct Chessnut {
    ctx: EmulatorContext,
    rx: Vec<u8>,
    placement: Placement,
    reporting: bool,
    last_sent_snapshot: Option<[u8; 32]>,
}

impl Chessnut {
    pub fn new(ctx: EmulatorContext) -> Self {
        Self {
            ctx,
            rx: Vec::new(),
            placement: Placement::starting(),
            reporting: false,
            last_sent_snapshot: None,
        }
    }

    fn push_position(&mut self, force: bool) {
        let packed = pack_position(&self.placement);
        if !force && self.last_sent_snapshot == Some(packed) {
            return;
        }
        debug!("Chessnut 推送局面");
        self.ctx.send(fen_packet(&self.placement));
        self.last_sent_snapshot = Some(packed);
    }

    fn handle(&mut self, cmd: u8, payload: &[u8]) {
        match cmd {
            CMD_ENABLE_REPORTING => {
                info!("Chessnut 开启局面上报");
                self.reporting = true;
                self.push_position(true);
            }
            CMD_BATTERY_REQUEST => {
                let (level, charging) = match self.ctx.board.battery() {
                    Ok(status) => (status.percent(), status.charging),
                    Err(e) => {
                        warn!("读取电池失败: {}", e);
                        (85, false)
                    }
                };
                let value = (level & 0x7f) | if charging { 0x80 } else { 0 };
                self.ctx.send_control(vec![RESP_BATTERY, 0x02, value, 0x00]);
            }
            CMD_LED_CONTROL => {
                let squares = led_rows_to_squares(payload);
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
            }
            CMD_INIT | CMD_HAPTIC | CMD_SOUND => {
                debug!("Chessnut 命令 {:#04x} 已确认: {:02x?}", cmd, payload);
            }
            _ => {}
        }
    }
}

fn is_command(byte: u8) -> bool {
    matches!(
        byte,
        CMD_LED_CONTROL
            | CMD_INIT
            | CMD_ENABLE_REPORTING
            | CMD_HAPTIC
            | CMD_BATTERY_REQUEST
            | CMD_SOUND
    )
}

impl Emulator for Chessnut {
    fn protocol(&self) -> Protocol {
        Protocol::Chessnut
    }

    fn feed(&mut self, byte: u8) -> FeedResult {
        match self.rx.len() {
            0 => {
                if !is_command(byte) {
                    return FeedResult::NotMine;
                }
                self.rx.push(byte);
                FeedResult::Partial
            }
            1 => {
                if byte > MAX_PAYLOAD_LEN {
                    self.rx.clear();
                    return FeedResult::NotMine;
                }
                self.rx.push(byte);
                if byte == 0 {
                    let cmd = self.rx[0];
                    self.rx.clear();
                    self.handle(cmd, &[]);
                    return FeedResult::Consumed;
                }
                FeedResult::Partial
            }
            _ => {
                self.rx.push(byte);
                let len = self.rx[1] as usize;
                if self.rx.len() < len + 2 {
                    return FeedResult::Partial;
                }
                let msg = std::mem::take(&mut self.rx);
                self.handle(msg[0], &msg[2..]);
                FeedResult::Consumed
            }
        }
    }

    fn on_game_event(&mut self, event: &GameEvent) {
        let Some(fen) = event.position_fen() else {
            return;
        };
        match Placement::from_fen(fen) {
            Ok(placement) => self.placement = placement,
            Err(e) => {
                warn!("Chessnut 无法解析局面: {}", e);
                return;
            }
        }
        if self.reporting {
            self.push_position(false);
        }
    }

    fn set_position(&mut self, fen: &str) {
        if let Ok(placement) = Placement::from_fen(fen) {
            self.placement = placement;
        }
    }

    fn reject(&mut self, byte: u8) {
        debug!("Chessnut 丢弃字节 {:#04x}", byte);
    }

    fn reset(&mut self) {
        self.rx.clear();
    }
}
