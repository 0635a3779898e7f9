//! 纠正模式
//!
//! 物理占位与期望占位不一致时给出逐格指引与 LED 提示。
//! 多个缺失/多余棋子时按曼哈顿距离做最优匹配（匈牙利算法）。

use centaur_protocol::square::{manhattan, square_name};
use centaur_protocol::Occupancy;
use shakmaty::{Board, Piece};

use crate::position::square;

/// 单格指引
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// 在该格放上棋子（棋子字母已知时给出）
    Place { square: u8, piece: Option<char> },
    /// 拿走该格上的棋子
    Remove { square: u8 },
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::Place {
                square,
                piece: Some(p),
            } => write!(f, "place {} on {}", p, square_name(*square)),
            Instruction::Place { square, piece: None } => {
                write!(f, "place a piece on {}", square_name(*square))
            }
            Instruction::Remove { square } => {
                write!(f, "remove the piece on {}", square_name(*square))
            }
        }
    }
}

/// LED 提示
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedHint {
    None,
    FromTo { from: u8, to: u8 },
    Squares(Vec<u8>),
}

/// 纠正指引
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Guidance {
    pub missing: Vec<u8>,
    pub extra: Vec<u8>,
    pub instructions: Vec<Instruction>,
    pub hint: LedHint,
}

impl Guidance {
    pub fn is_resolved(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// (缺失, 多余)
pub fn compute_deltas(physical: Occupancy, expected: Occupancy) -> (Vec<u8>, Vec<u8>) {
    let (missing, extra) = physical.diff(expected);
    (missing.squares().collect(), extra.squares().collect())
}

/// 生成指引；`board` 提供期望局面以给出棋子名称
pub fn guidance(physical: Occupancy, expected: Occupancy, board: Option<&Board>) -> Guidance {
    let (missing, extra) = compute_deltas(physical, expected);

    let piece_at = |sq: u8| {
        board
            .and_then(|b| b.piece_at(square(sq)))
            .map(|p: Piece| p.char())
    };
    let instructions = extra
        .iter()
        .map(|&sq| Instruction::Remove { square: sq })
        .chain(missing.iter().map(|&sq| Instruction::Place {
            square: sq,
            piece: piece_at(sq),
        }))
        .collect();

    let hint = led_hint(&missing, &extra);
    Guidance {
        missing,
        extra,
        instructions,
        hint,
    }
}

fn led_hint(missing: &[u8], extra: &[u8]) -> LedHint {
    match (missing, extra) {
        ([], []) => LedHint::None,
        ([to], [from]) => LedHint::FromTo {
            from: *from,
            to: *to,
        },
        (_, []) => LedHint::Squares(missing.to_vec()),
        ([], _) => LedHint::Squares(extra.to_vec()),
        _ => {
            let pairs = assign(extra, missing);
            match pairs.first() {
                Some(&(from, to)) => LedHint::FromTo { from, to },
                None => LedHint::None,
            }
        }
    }
}

/// 最小总曼哈顿距离匹配，返回 (多余格, 缺失格) 对
pub fn assign(extra: &[u8], missing: &[u8]) -> Vec<(u8, u8)> {
    if extra.is_empty() || missing.is_empty() {
        return Vec::new();
    }
    let transpose = extra.len() > missing.len();
    let (rows, cols) = if transpose {
        (missing, extra)
    } else {
        (extra, missing)
    };
    let cost: Vec<Vec<i64>> = rows
        .iter()
        .map(|&r| cols.iter().map(|&c| i64::from(manhattan(r, c))).collect())
        .collect();

    hungarian(&cost)
        .into_iter()
        .enumerate()
        .map(|(i, j)| {
            if transpose {
                (cols[j], rows[i])
            } else {
                (rows[i], cols[j])
            }
        })
        .collect()
}

/// 匈牙利算法（行数 <= 列数），返回每行分配的列
fn hungarian(cost: &[Vec<i64>]) -> Vec<usize> {
    let n = cost.len();
    let m = cost[0].len();
    const INF: i64 = i64::MAX / 4;

    let mut u = vec![0i64; n + 1];
    let mut v = vec![0i64; m + 1];
    let mut p = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![INF; m + 1];
        let mut used = vec![false; m + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = INF;
            let mut j1 = 0usize;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0usize; n];
    for j in 1..=m {
        if p[j] != 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}
