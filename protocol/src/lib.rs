//! Centaur 棋盘共享协议库
//!
//! 包含:
//! - 板载链路帧编解码 (Packet, FrameDecoder) 与命令注册表
//! - 奇校验 ASCII 编解码（Millennium 客户端协议使用）
//! - 方格索引转换 (rotate_field) 与占位位图
//! - 棋子、按键、对局事件
//! - 棋盘控制抽象 (BoardControl)
//! - 传输层抽象 (Connector, Connection, Listener traits)

pub mod board;
pub mod command;
mod constants;
mod error;
pub mod event;
pub mod occupancy;
pub mod packet;
pub mod parity;
pub mod square;
mod transport;

pub use board::{BatteryStatus, BoardAction, BoardControl, RecordingBoard, Sound};
pub use command::CommandSpec;
pub use constants::*;
pub use error::{FramingError, ProtocolError, Result};
pub use event::{GameEvent, Key, KeyEvent, PieceEvent, PieceEventKind, Side};
pub use occupancy::{Occupancy, SharedOccupancy};
pub use packet::{Decoded, FrameDecoder, FrameForm, FrameTable, Packet};
pub use square::rotate_field;
pub use transport::{
    Connection, Connector, Listener, RawReader, RawWriter, TcpConnection, TcpConnector,
    TcpListener, TransportType, READ_CHUNK_SIZE,
};
