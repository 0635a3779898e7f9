//! 错误类型定义

use thiserror::Error;

/// 帧解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// 未注册的类型字节
    #[error("Unknown packet type: 0x{0:02x}")]
    UnknownType(u8),

    /// 声明长度非法
    #[error("Invalid declared length: {declared} (max: {max})")]
    BadLength { declared: usize, max: usize },

    /// 校验和不匹配
    #[error("Checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    Checksum { expected: u8, actual: u8 },
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 帧错误
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// 请求超时
    #[error("Request timeout")]
    Timeout,

    /// 地址不匹配
    #[error("Address mismatch: expected {expected:02x?}, got {actual:02x?}")]
    AddressMismatch { expected: (u8, u8), actual: (u8, u8) },

    /// 请求被取消（链路关闭）
    #[error("Request cancelled")]
    Cancelled,

    /// 链路尚未完成地址发现
    #[error("Board link not ready")]
    NotReady,

    /// 已有请求在等待响应
    #[error("Another request is already in flight")]
    Busy,

    /// 响应负载无法解析
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// 未知命令
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 非法方格
    #[error("Invalid square: {0}")]
    InvalidSquare(String),
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
