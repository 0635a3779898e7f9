//! 引擎错误类型

use std::path::PathBuf;

use thiserror::Error;

/// 引擎错误
#[derive(Error, Debug)]
pub enum EngineError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 引擎可执行文件无法启动
    #[error("Failed to spawn engine {path}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    /// 引擎进程已退出
    #[error("Engine process closed")]
    Closed,

    /// 等待引擎应答超时
    #[error("Engine did not answer '{0}' in time")]
    Timeout(&'static str),

    /// 无法解析的引擎输出
    #[error("Unexpected engine output: {0}")]
    Protocol(String),

    /// 配置文件错误
    #[error("Engine profile error: {0}")]
    Profile(String),
}

/// 引擎操作结果类型
pub type Result<T> = std::result::Result<T, EngineError>;
