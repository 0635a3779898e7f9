//! DGT Centaur 桥接服务
//!
//! 包含:
//! - 串口板载链路（地址发现、请求/响应、棋子与按键事件）
//! - 物理走棋状态机与纠正模式
//! - 玩家（人类、引擎、Hand+Brain、在线服务、客户端应用）与对局协调器
//! - 客户端传输服务（TCP、BLE、RFCOMM）
//! - 配置、棋局存储

pub mod config;
pub mod correction;
mod error;
pub mod game;
pub mod link;
pub mod move_state;
pub mod player;
pub mod position;
pub mod server;
pub mod storage;

pub use config::{PlayerSetting, Settings};
pub use error::{BridgeError, Result};
pub use game::{CoordinatorConfig, GameCoordinator, GameHandle, GameInput, GameSetup};
pub use link::BoardLink;
pub use move_state::{MoveConfig, MoveOutput, MoveState};
pub use player::{Player, PlayerKind, PlayerManager};
pub use server::{ServerContext, TcpServer};
pub use storage::{FenLog, GameStore};
