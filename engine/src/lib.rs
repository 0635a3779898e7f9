//! 对手后端
//!
//! 包含:
//! - UCI 引擎子进程
//! - 共享引擎注册表（句柄计数，最后释放时结束进程）
//! - `.uci` 难度配置
//! - 在线对弈服务客户端（需启用 `online` feature）

mod error;
pub mod online;
pub mod profile;
mod registry;
pub mod uci;

pub use error::{EngineError, Result};
pub use online::{
    Account, ChallengeRequest, GameFull, GameState, GameStreamEvent, OnlineClient, OnlineConfig,
};
pub use profile::{ProfileSection, UciProfile};
pub use registry::{EngineHandle, EngineRegistry};
pub use uci::{Analysis, BestMove, Score, UciEngine};
