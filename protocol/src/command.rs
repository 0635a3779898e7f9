//! 板载命令注册表
//!
//! 静态映射: 符号名 -> {操作码, 期望响应类型, 默认负载}。
//! 带负载的命令以长帧发送，不带负载的以短帧发送。

use crate::packet::FrameForm;

/// 命令规格
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub opcode: u8,
    pub response: Option<u8>,
    pub default_payload: Option<&'static [u8]>,
}

impl CommandSpec {
    /// 发送形式由负载是否存在决定
    pub fn form(&self, payload: &[u8]) -> FrameForm {
        if payload.is_empty() {
            FrameForm::Short { payload_len: 0 }
        } else {
            FrameForm::Long
        }
    }

    /// 是否为单向命令
    pub fn is_fire_and_forget(&self) -> bool {
        self.response.is_none()
    }
}

const fn spec(
    name: &'static str,
    opcode: u8,
    response: Option<u8>,
    default_payload: Option<&'static [u8]>,
) -> CommandSpec {
    CommandSpec {
        name,
        opcode,
        response,
        default_payload,
    }
}

pub const DGT_BUS_SEND_STATE: CommandSpec = spec("DGT_BUS_SEND_STATE", 0x82, Some(0x83), None);
pub const DGT_BUS_SEND_CHANGES: CommandSpec =
    spec("DGT_BUS_SEND_CHANGES", 0x83, Some(0x85), None);
pub const DGT_BUS_POLL_KEYS: CommandSpec = spec("DGT_BUS_POLL_KEYS", 0x94, Some(0xb1), None);
pub const DGT_SEND_BATTERY_INFO: CommandSpec =
    spec("DGT_SEND_BATTERY_INFO", 0x98, Some(0xb5), None);
pub const LED_OFF_CMD: CommandSpec = spec("LED_OFF_CMD", 0xb0, None, Some(&[0x00]));
pub const LED_FLASH_CMD: CommandSpec =
    spec("LED_FLASH_CMD", 0xb0, None, Some(&[0x05, 0x0a, 0x00, 0x01]));
pub const LED_PATTERN: CommandSpec = spec("LED_PATTERN", 0xb0, None, None);
pub const SOUND_GENERAL: CommandSpec = spec("SOUND_GENERAL", 0xb1, None, Some(&[0x4c, 0x08]));
pub const SOUND_FACTORY: CommandSpec = spec("SOUND_FACTORY", 0xb1, None, Some(&[0x4c, 0x40]));
pub const SOUND_POWER_OFF: CommandSpec =
    spec("SOUND_POWER_OFF", 0xb1, None, Some(&[0x4c, 0x08, 0x48, 0x08]));
pub const SOUND_POWER_ON: CommandSpec =
    spec("SOUND_POWER_ON", 0xb1, None, Some(&[0x48, 0x08, 0x4c, 0x08]));
pub const SOUND_WRONG: CommandSpec =
    spec("SOUND_WRONG", 0xb1, None, Some(&[0x4e, 0x0c, 0x48, 0x10]));
pub const SOUND_WRONG_MOVE: CommandSpec =
    spec("SOUND_WRONG_MOVE", 0xb1, None, Some(&[0x48, 0x08]));
pub const DGT_SLEEP: CommandSpec = spec("DGT_SLEEP", 0xb2, Some(0xb1), Some(&[0x0a]));
pub const DGT_NOTIFY_EVENTS: CommandSpec = spec("DGT_NOTIFY_EVENTS", 0x58, None, None);
pub const DGT_RETURN_BUSADRES: CommandSpec =
    spec("DGT_RETURN_BUSADRES", 0x46, Some(0x90), None);
pub const DGT_RETURN_LONG_SERIAL: CommandSpec =
    spec("DGT_RETURN_LONG_SERIAL", 0x55, Some(0xa2), None);
pub const DGT_SEND_VERSION: CommandSpec = spec("DGT_SEND_VERSION", 0x4d, Some(0x93), None);
pub const DGT_SEND_TRADEMARK: CommandSpec =
    spec("DGT_SEND_TRADEMARK", 0x97, Some(0xb4), None);

/// 全部已注册命令
pub const COMMANDS: &[CommandSpec] = &[
    DGT_BUS_SEND_STATE,
    DGT_BUS_SEND_CHANGES,
    DGT_BUS_POLL_KEYS,
    DGT_SEND_BATTERY_INFO,
    LED_OFF_CMD,
    LED_FLASH_CMD,
    LED_PATTERN,
    SOUND_GENERAL,
    SOUND_FACTORY,
    SOUND_POWER_OFF,
    SOUND_POWER_ON,
    SOUND_WRONG,
    SOUND_WRONG_MOVE,
    DGT_SLEEP,
    DGT_NOTIFY_EVENTS,
    DGT_RETURN_BUSADRES,
    DGT_RETURN_LONG_SERIAL,
    DGT_SEND_VERSION,
    DGT_SEND_TRADEMARK,
];

/// 棋子事件通知（需要随后请求变化列表）
pub const PIECE_NOTIFICATION: u8 = 0x8e;

/// 按键事件通知
pub const KEY_NOTIFICATION: u8 = 0xa3;

/// 棋盘可能发出的全部包类型
pub const INBOUND_TYPES: &[u8] = &[
    0x83, 0x85, 0x87, 0x8e, 0x90, 0x93, 0xa2, 0xa3, 0xb1, 0xb4, 0xb5,
];

/// 按名称查找命令
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}
