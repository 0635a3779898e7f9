//! 错误类型定义

use centaur_engine::EngineError;
use centaur_protocol::ProtocolError;
use thiserror::Error;

/// 桥接层错误
#[derive(Error, Debug)]
pub enum BridgeError {
    /// 板载协议错误
    #[error("Board protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 串口错误
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// 引擎错误
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// 配置文件错误
    #[error("Config error: {0}")]
    Config(#[from] ini::Error),

    /// 在线服务错误
    #[error("Online service error: {0}")]
    Remote(String),

    /// 非法 FEN / 走法
    #[error("Chess error: {0}")]
    Chess(String),

    /// 蓝牙错误
    #[cfg(feature = "bluetooth")]
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 对局协调器已停止
    #[error("Game coordinator stopped")]
    Stopped,
}

/// 桥接层结果类型
pub type Result<T> = std::result::Result<T, BridgeError>;
