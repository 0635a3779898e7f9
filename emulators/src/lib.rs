//! 第三方客户端协议模拟器
//!
//! 包含:
//! - Millennium (奇校验 ASCII)
//! - Pegasus (Nordic UART 二进制)
//! - Chessnut Air (压缩局面通知)
//! - 会话状态与协议自动识别 (Session)

pub mod chessnut;
mod detect;
mod emulator;
pub mod millennium;
pub mod pegasus;
mod position;

pub use chessnut::Chessnut;
pub use detect::{Session, SessionState, DETECTION_STREAK};
pub use emulator::{
    create, Channel, Emulator, EmulatorContext, FeedResult, MessageSink, Outbound, Protocol,
};
pub use millennium::Millennium;
pub use pegasus::Pegasus;
pub use position::{Placement, PlacementError, STARTING_FEN};
