//! 协议常量定义

use std::time::Duration;

/// 串口设备默认路径
pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/serial0";

/// 串口波特率
pub const SERIAL_BAUD_RATE: u32 = 1_000_000;

/// 串口单字节读取超时（毫秒）
pub const SERIAL_READ_TIMEOUT_MS: u64 = 200;

/// 命令默认超时（毫秒）
pub const COMMAND_TIMEOUT_MS: u64 = 2_000;

/// 地址发现最大尝试次数
pub const DISCOVERY_ATTEMPTS: usize = 10;

/// 帧错误升级窗口（毫秒）
pub const FRAMING_ERROR_WINDOW_MS: u64 = 2_000;

/// 窗口内帧错误次数达到此值时重置链路
pub const FRAMING_ERROR_LIMIT: usize = 32;

/// 板载包最大长度（14 位长度字段）
pub const MAX_PACKET_LEN: usize = 0x3fff;

/// 长帧固定开销: 类型 + 长度高 + 长度低 + 地址1 + 地址2 + 校验
pub const LONG_FRAME_OVERHEAD: usize = 6;

/// 短帧固定开销: 类型 + 地址1 + 地址2 + 校验
pub const SHORT_FRAME_OVERHEAD: usize = 4;

/// 事件标记: 拿起
pub const EVENT_LIFT: u8 = 0x40;

/// 事件标记: 放下
pub const EVENT_PLACE: u8 = 0x41;

/// 按键事件签名
pub const KEY_SIGNATURE: [u8; 4] = [0x00, 0x14, 0x0a, 0x05];

/// 王离盘认输判定时长（秒）
pub const KING_LIFT_RESIGN_SECS: u64 = 3;

/// TCP 服务默认端口
pub const DEFAULT_TCP_PORT: u16 = 5123;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 串口读取超时 Duration
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(SERIAL_READ_TIMEOUT_MS);

/// 命令超时 Duration
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(COMMAND_TIMEOUT_MS);

/// 帧错误窗口 Duration
pub const FRAMING_ERROR_WINDOW: Duration = Duration::from_millis(FRAMING_ERROR_WINDOW_MS);

/// 王离盘认输 Duration
pub const KING_LIFT_RESIGN: Duration = Duration::from_secs(KING_LIFT_RESIGN_SECS);

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);
