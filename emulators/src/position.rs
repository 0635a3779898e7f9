//! FEN 摆子解析
//!
//! 模拟器只需要棋子摆放，不依赖规则库。

use thiserror::Error;

/// 标准开局 FEN
pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// 摆子解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("Invalid FEN placement: {0}")]
    Invalid(String),
}

/// 64 格摆子，逻辑索引（0 = a1）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement([Option<char>; 64]);

impl Placement {
    /// 解析 FEN（只取第一个字段）
    pub fn from_fen(fen: &str) -> Result<Self, PlacementError> {
        let board = fen.split_whitespace().next().unwrap_or("");
        let ranks: Vec<&str> = board.split('/').collect();
        if ranks.len() != 8 {
            return Err(PlacementError::Invalid(fen.to_string()));
        }

        let mut squares = [None; 64];
        for (i, rank_text) in ranks.iter().enumerate() {
            let rank = 7 - i;
            let mut file = 0usize;
            for c in rank_text.chars() {
                if let Some(skip) = c.to_digit(10) {
                    file += skip as usize;
                } else if "pnbrqkPNBRQK".contains(c) {
                    if file >= 8 {
                        return Err(PlacementError::Invalid(fen.to_string()));
                    }
                    squares[rank * 8 + file] = Some(c);
                    file += 1;
                } else {
                    return Err(PlacementError::Invalid(fen.to_string()));
                }
            }
            if file != 8 {
                return Err(PlacementError::Invalid(fen.to_string()));
            }
        }
        Ok(Self(squares))
    }

    pub fn starting() -> Self {
        // 常量 FEN 必定合法
        Self::from_fen(STARTING_FEN).unwrap_or(Self([None; 64]))
    }

    pub fn from_squares(squares: [Option<char>; 64]) -> Self {
        Self(squares)
    }

    /// 逻辑索引处的棋子
    pub fn at(&self, square: u8) -> Option<char> {
        self.0.get(square as usize).copied().flatten()
    }

    /// a8..h1 行优先，空格为 '.'
    pub fn to_row_major_string(&self) -> String {
        (0..8u8)
            .rev()
            .flat_map(|rank| (0..8u8).map(move |file| rank * 8 + file))
            .map(|sq| self.at(sq).unwrap_or('.'))
            .collect()
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::starting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starting_placement() {
        let p = Placement::starting();
        assert_eq!(p.at(0), Some('R'));
        assert_eq!(p.at(4), Some('K'));
        assert_eq!(p.at(60), Some('k'));
        assert_eq!(p.at(28), None);
    }

    #[test]
    fn test_row_major_string() {
        let s = Placement::starting().to_row_major_string();
        assert_eq!(s.len(), 64);
        assert!(s.starts_with("rnbqkbnrpppppppp"));
        assert!(s.ends_with("PPPPPPPPRNBQKBNR"));
        assert_eq!(&s[16..48], ".".repeat(32));
    }

    #[test]
    fn test_invalid_fen() {
        assert!(Placement::from_fen("8/8/8").is_err());
        assert!(Placement::from_fen("9/8/8/8/8/8/8/8 w - - 0 1").is_err());
        assert!(Placement::from_fen("x7/8/8/8/8/8/8/8 w - - 0 1").is_err());
    }
}
