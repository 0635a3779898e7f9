//! 规则库适配
//!
//! 逻辑方格索引与 shakmaty 的 `Square` 一致（a1 = 0, h8 = 63）。

use centaur_protocol::{Occupancy, Side};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{
    CastlingMode, CastlingSide, Chess, Color, EnPassantMode, Move, Outcome, Position, Role, Square,
};

use crate::error::{BridgeError, Result};

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

pub fn square(index: u8) -> Square {
    Square::new(u32::from(index & 63))
}

pub fn index(square: Square) -> u8 {
    square as u8
}

pub fn side(color: Color) -> Side {
    match color {
        Color::White => Side::White,
        Color::Black => Side::Black,
    }
}

pub fn color(side: Side) -> Color {
    match side {
        Side::White => Color::White,
        Side::Black => Color::Black,
    }
}

/// 局面的占位位图
pub fn occupancy(pos: &Chess) -> Occupancy {
    Occupancy(u64::from(pos.board().occupied()))
}

pub fn parse_fen(fen: &str) -> Result<Chess> {
    let parsed: Fen = fen
        .trim()
        .parse()
        .map_err(|e| BridgeError::Chess(format!("invalid FEN '{fen}': {e}")))?;
    parsed
        .into_position(CastlingMode::Standard)
        .map_err(|e| BridgeError::Chess(format!("illegal position '{fen}': {e}")))
}

pub fn to_fen(pos: &Chess) -> String {
    Fen::from_position(pos.clone(), EnPassantMode::Legal).to_string()
}

/// 只比较棋子布局
pub fn placement(fen: &str) -> &str {
    fen.split_whitespace().next().unwrap_or("")
}

pub fn to_uci(mv: &Move) -> String {
    mv.to_uci(CastlingMode::Standard).to_string()
}

/// 解析 UCI 走法；升变未指定棋子时默认升后
pub fn parse_uci(pos: &Chess, uci: &str) -> Result<Move> {
    let parsed: UciMove = uci
        .trim()
        .parse()
        .map_err(|e| BridgeError::Chess(format!("invalid UCI '{uci}': {e}")))?;
    if let Ok(mv) = parsed.to_move(pos) {
        return Ok(mv);
    }
    if let UciMove::Normal {
        from,
        to,
        promotion: None,
    } = parsed
    {
        let queen = UciMove::Normal {
            from,
            to,
            promotion: Some(Role::Queen),
        };
        if let Ok(mv) = queen.to_move(pos) {
            return Ok(mv);
        }
    }
    Err(BridgeError::Chess(format!("illegal move '{uci}'")))
}

/// SAN 记法
pub fn to_san(pos: &Chess, mv: &Move) -> String {
    let mut scratch = pos.clone();
    SanPlus::from_move_and_play_unchecked(&mut scratch, mv).to_string()
}

/// 走法的物理落点：王车易位取王的目标格
pub fn destination(mv: &Move, turn: Color) -> Square {
    match mv.castling_side() {
        Some(side) => side.king_to(turn),
        None => mv.to(),
    }
}

/// 走法腾空的方格（起点、易位车、吃过路兵）
pub fn vacated(mv: &Move, turn: Color) -> Vec<Square> {
    match mv {
        Move::Castle { king, rook } => {
            let side = CastlingSide::from_king_side(rook > king);
            let mut squares = vec![*king, *rook];
            squares.retain(|&sq| sq != side.king_to(turn) && sq != side.rook_to(turn));
            squares
        }
        Move::EnPassant { from, to } => vec![*from, Square::from_coords(to.file(), from.rank())],
        Move::Normal { from, .. } => vec![*from],
        Move::Put { .. } => Vec::new(),
    }
}

/// 被吃棋子所在格
pub fn capture_square(mv: &Move) -> Option<Square> {
    match mv {
        Move::EnPassant { from, to } => Some(Square::from_coords(to.file(), from.rank())),
        Move::Normal {
            capture: Some(_),
            to,
            ..
        } => Some(*to),
        _ => None,
    }
}

/// 对局结束: (结果, 终局原因)
pub fn outcome(pos: &Chess) -> Option<(String, String)> {
    let outcome = pos.outcome()?;
    let termination = if pos.is_checkmate() {
        "checkmate"
    } else if pos.is_stalemate() {
        "stalemate"
    } else if pos.is_insufficient_material() {
        "insufficient material"
    } else {
        "draw"
    };
    Some((result_string(outcome), termination.to_string()))
}

pub fn result_string(outcome: Outcome) -> String {
    match outcome {
        Outcome::Decisive {
            winner: Color::White,
        } => "1-0".to_string(),
        Outcome::Decisive {
            winner: Color::Black,
        } => "0-1".to_string(),
        Outcome::Draw => "1/2-1/2".to_string(),
    }
}
