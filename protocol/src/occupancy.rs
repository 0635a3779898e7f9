//! 物理占位位图
//!
//! 64 位，按逻辑索引编号（bit 0 = a1）。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::square::{rotate_field, square_name};

/// 占位位图
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Occupancy(pub u64);

impl Occupancy {
    pub const EMPTY: Occupancy = Occupancy(0);

    /// 标准开局: 第 1、2、7、8 行
    pub const STARTING: Occupancy = Occupancy(0xffff_0000_0000_ffff);

    pub fn is_set(self, square: u8) -> bool {
        square < 64 && self.0 & (1 << square) != 0
    }

    pub fn set(&mut self, square: u8) {
        self.0 |= 1 << square;
    }

    pub fn clear(&mut self, square: u8) {
        self.0 &= !(1 << square);
    }

    pub fn with(mut self, square: u8) -> Self {
        self.set(square);
        self
    }

    pub fn without(mut self, square: u8) -> Self {
        self.clear(square);
        self
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// 所有被占方格（升序）
    pub fn squares(self) -> impl Iterator<Item = u8> {
        (0u8..64).filter(move |&sq| self.is_set(sq))
    }

    /// 相对期望位图的差异: (缺失, 多余)
    pub fn diff(self, expected: Occupancy) -> (Occupancy, Occupancy) {
        let missing = Occupancy(expected.0 & !self.0);
        let extra = Occupancy(self.0 & !expected.0);
        (missing, extra)
    }

    /// 从线上顺序的 64 字节快照构造（非零即有子）
    pub fn from_wire_dump(dump: &[u8]) -> Self {
        dump.iter()
            .take(64)
            .enumerate()
            .filter(|(_, &v)| v != 0)
            .fold(Occupancy::EMPTY, |occ, (wire, _)| {
                occ.with(rotate_field(wire as u8))
            })
    }

    /// 线上顺序的 64 字节（0/1）
    pub fn to_wire_bytes(self) -> [u8; 64] {
        let mut out = [0u8; 64];
        for (wire, slot) in out.iter_mut().enumerate() {
            *slot = self.is_set(rotate_field(wire as u8)) as u8;
        }
        out
    }
}

impl fmt::Debug for Occupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Occupancy({:#018x})", self.0)
    }
}

impl fmt::Display for Occupancy {
    /// 8 行文本视图，第 8 行在上
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rank in (0..8u8).rev() {
            for file in 0..8u8 {
                let c = if self.is_set(rank * 8 + file) { '1' } else { '.' };
                write!(f, "{c}")?;
            }
            if rank > 0 {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// 方格列表的可读形式
pub fn describe_squares(occ: Occupancy) -> String {
    occ.squares().map(square_name).collect::<Vec<_>>().join(",")
}

/// 原子快照，读线程写、其他线程读
#[derive(Debug, Default)]
pub struct SharedOccupancy(AtomicU64);

impl SharedOccupancy {
    pub fn new(occ: Occupancy) -> Self {
        Self(AtomicU64::new(occ.0))
    }

    pub fn load(&self) -> Occupancy {
        Occupancy(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, occ: Occupancy) {
        self.0.store(occ.0, Ordering::Release);
    }
}
