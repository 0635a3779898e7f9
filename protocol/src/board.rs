//! 棋盘控制抽象
//!
//! 上层（对局协调器、客户端模拟器）通过 [`BoardControl`] 驱动 LED 与蜂鸣器，
//! 方格一律使用逻辑索引；线上索引的转换由链路实现负责。

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::command::{self, CommandSpec};
use crate::error::Result;
use crate::occupancy::{Occupancy, SharedOccupancy};

/// 提示音
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sound {
    General,
    Factory,
    PowerOff,
    PowerOn,
    Wrong,
    WrongMove,
}

impl Sound {
    pub fn command(self) -> CommandSpec {
        match self {
            Sound::General => command::SOUND_GENERAL,
            Sound::Factory => command::SOUND_FACTORY,
            Sound::PowerOff => command::SOUND_POWER_OFF,
            Sound::PowerOn => command::SOUND_POWER_ON,
            Sound::Wrong => command::SOUND_WRONG,
            Sound::WrongMove => command::SOUND_WRONG_MOVE,
        }
    }
}

/// 电池状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryStatus {
    /// 电量等级 0..=20
    pub level: u8,
    pub charging: bool,
}

impl BatteryStatus {
    /// 从电池响应字节解析
    pub fn from_byte(value: u8) -> Self {
        let state = (value >> 5) & 0x07;
        Self {
            level: value & 0x1f,
            charging: state == 1 || state == 2,
        }
    }

    /// 百分比
    pub fn percent(&self) -> u8 {
        (self.level.min(20) as u16 * 5) as u8
    }
}

impl Default for BatteryStatus {
    fn default() -> Self {
        Self {
            level: 17,
            charging: false,
        }
    }
}

/// LED 默认亮度
pub const DEFAULT_INTENSITY: u8 = 5;

/// LED 默认闪烁速度
pub const DEFAULT_SPEED: u8 = 5;

/// 棋盘控制
pub trait BoardControl: Send + Sync {
    /// 熄灭全部 LED
    fn leds_off(&self) -> Result<()>;

    /// 点亮一组方格
    fn led_array(&self, squares: &[u8], speed: u8, intensity: u8) -> Result<()>;

    /// 起点到终点提示
    fn led_from_to(&self, from: u8, to: u8, intensity: u8) -> Result<()>;

    /// 单格
    fn led(&self, square: u8, intensity: u8) -> Result<()>;

    /// 播放提示音
    fn beep(&self, sound: Sound) -> Result<()>;

    /// 查询电池
    fn battery(&self) -> Result<BatteryStatus>;

    /// 当前物理占位
    fn occupancy(&self) -> Occupancy;
}

// ============================================================================
// 内存实现
// ============================================================================

/// 记录下来的棋盘动作
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoardAction {
    LedsOff,
    LedArray { squares: Vec<u8>, speed: u8, intensity: u8 },
    LedFromTo { from: u8, to: u8, intensity: u8 },
    Led { square: u8, intensity: u8 },
    Beep(Sound),
}

/// 内存棋盘：记录所有动作，占位由调用方设置
///
/// 用于无硬件运行与测试。
#[derive(Debug, Default)]
pub struct RecordingBoard {
    actions: Mutex<Vec<BoardAction>>,
    occupancy: SharedOccupancy,
    battery: Mutex<BatteryStatus>,
}

impl RecordingBoard {
    pub fn new(occupancy: Occupancy) -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            occupancy: SharedOccupancy::new(occupancy),
            battery: Mutex::new(BatteryStatus::default()),
        }
    }

    pub fn set_occupancy(&self, occupancy: Occupancy) {
        self.occupancy.store(occupancy);
    }

    pub fn set_battery(&self, status: BatteryStatus) {
        if let Ok(mut battery) = self.battery.lock() {
            *battery = status;
        }
    }

    /// 取出并清空已记录动作
    pub fn take_actions(&self) -> Vec<BoardAction> {
        self.actions
            .lock()
            .map(|mut actions| std::mem::take(&mut *actions))
            .unwrap_or_default()
    }

    fn record(&self, action: BoardAction) -> Result<()> {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(action);
        }
        Ok(())
    }
}

impl BoardControl for RecordingBoard {
    fn leds_off(&self) -> Result<()> {
        self.record(BoardAction::LedsOff)
    }

    fn led_array(&self, squares: &[u8], speed: u8, intensity: u8) -> Result<()> {
        self.record(BoardAction::LedArray {
            squares: squares.to_vec(),
            speed,
            intensity,
        })
    }

    fn led_from_to(&self, from: u8, to: u8, intensity: u8) -> Result<()> {
        self.record(BoardAction::LedFromTo {
            from,
            to,
            intensity,
        })
    }

    fn led(&self, square: u8, intensity: u8) -> Result<()> {
        self.record(BoardAction::Led { square, intensity })
    }

    fn beep(&self, sound: Sound) -> Result<()> {
        self.record(BoardAction::Beep(sound))
    }

    fn battery(&self) -> Result<BatteryStatus> {
        Ok(self.battery.lock().map(|b| *b).unwrap_or_default())
    }

    fn occupancy(&self) -> Occupancy {
        self.occupancy.load()
    }
}
