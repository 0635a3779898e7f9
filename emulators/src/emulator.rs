//! 客户端模拟器公共契约
//!
//! 模拟器是纯字节状态机：不打开任何套接字，由传输服务驱动。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use centaur_protocol::{BoardControl, GameEvent};
use serde::{Deserialize, Serialize};

/// 单字节喂入结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedResult {
    /// 字节完成了一条消息并已处理
    Consumed,
    /// 字节被接受，消息尚未完整
    Partial,
    /// 字节不属于本协议
    NotMine,
}

/// 出站通道
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// 主数据通道（UART tx / Chessnut FEN 通知）
    Data,
    /// 控制通道（Chessnut op-RX）
    Control,
}

/// 出站消息
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    pub channel: Channel,
    pub bytes: Vec<u8>,
}

/// 传输注入的发送函数
pub type MessageSink = Arc<dyn Fn(Outbound) + Send + Sync>;

/// 客户端协议
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Millennium,
    Pegasus,
    Chessnut,
}

impl Protocol {
    /// 自动识别的优先级顺序
    pub const PRIORITY: [Protocol; 3] = [Protocol::Millennium, Protocol::Pegasus, Protocol::Chessnut];

    /// BLE 广播名称
    pub fn local_name(self) -> &'static str {
        match self {
            Protocol::Millennium => "MILLENNIUM CHESS",
            Protocol::Pegasus => "DGT_PEGASUS",
            Protocol::Chessnut => "Chessnut Air",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Millennium => write!(f, "millennium"),
            Protocol::Pegasus => write!(f, "pegasus"),
            Protocol::Chessnut => write!(f, "chessnut"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "millennium" => Ok(Protocol::Millennium),
            "pegasus" => Ok(Protocol::Pegasus),
            "chessnut" => Ok(Protocol::Chessnut),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// 模拟器运行所需的外部依赖
#[derive(Clone)]
pub struct EmulatorContext {
    pub board: Arc<dyn BoardControl>,
    pub sink: MessageSink,
}

impl EmulatorContext {
    pub fn new(board: Arc<dyn BoardControl>, sink: MessageSink) -> Self {
        Self { board, sink }
    }

    /// 主通道发送
    pub fn send(&self, bytes: Vec<u8>) {
        (self.sink)(Outbound {
            channel: Channel::Data,
            bytes,
        });
    }

    /// 控制通道发送
    pub fn send_control(&self, bytes: Vec<u8>) {
        (self.sink)(Outbound {
            channel: Channel::Control,
            bytes,
        });
    }
}

/// 模拟器契约
pub trait Emulator: Send {
    fn protocol(&self) -> Protocol;

    /// 喂入一个来自客户端的字节
    fn feed(&mut self, byte: u8) -> FeedResult;

    /// 对局状态变化
    fn on_game_event(&mut self, event: &GameEvent);

    /// 静默同步当前局面（不触发主动推送）
    fn set_position(&mut self, fen: &str);

    /// 会话激活后被拒绝的字节
    fn reject(&mut self, byte: u8);

    /// 清空接收缓冲
    fn reset(&mut self);
}

/// 按协议创建模拟器
pub fn create(protocol: Protocol, ctx: EmulatorContext) -> Box<dyn Emulator> {
    match protocol {
        Protocol::Millennium => Box::new(crate::millennium::Millennium::new(ctx)),
        Protocol::Pegasus => Box::new(crate::pegasus::Pegasus::new(ctx)),
        Protocol::Chessnut => Box::new(crate::chessnut::Chessnut::new(ctx)),
    }
}
