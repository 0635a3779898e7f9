//! 方格索引
//!
//! 逻辑索引: 0 = a1, 63 = h8（走法引擎与规则使用）。
//! 线上索引: 行序颠倒，0 = a8, 63 = h1（硬件与客户端协议使用）。
//! 两者之间只通过 [`rotate_field`] 转换。

use crate::error::{ProtocolError, Result};

/// 逻辑索引与线上索引互转（自反）
pub const fn rotate_field(field: u8) -> u8 {
    (7 - field / 8) * 8 + field % 8
}

/// 文件（列）0..8
pub const fn file_of(square: u8) -> u8 {
    square % 8
}

/// 行 0..8
pub const fn rank_of(square: u8) -> u8 {
    square / 8
}

/// 逻辑索引 -> 方格名（如 "e4"）
pub fn square_name(square: u8) -> String {
    let file = (b'a' + file_of(square)) as char;
    let rank = (b'1' + rank_of(square)) as char;
    format!("{file}{rank}")
}

/// 方格名 -> 逻辑索引
pub fn parse_square(name: &str) -> Result<u8> {
    let bytes = name.as_bytes();
    match bytes {
        [file @ b'a'..=b'h', rank @ b'1'..=b'8'] => Ok((rank - b'1') * 8 + (file - b'a')),
        _ => Err(ProtocolError::InvalidSquare(name.to_string())),
    }
}

/// 两格之间的曼哈顿距离
pub fn manhattan(a: u8, b: u8) -> u32 {
    let df = (file_of(a) as i32 - file_of(b) as i32).unsigned_abs();
    let dr = (rank_of(a) as i32 - rank_of(b) as i32).unsigned_abs();
    df + dr
}
