//! 传输层抽象
//!
//! 提供 Connector/Connection/Listener traits 使客户端模拟器与具体传输解耦。
//! 传输只负责字节进出与连接生命周期，不理解任何棋盘协议语义。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{ProtocolError, Result};
use crate::CONNECT_TIMEOUT;

/// 单次读取缓冲大小
pub const READ_CHUNK_SIZE: usize = 512;

/// 传输类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportType {
    /// 本地 TCP（中性 UART，自动识别协议）
    Tcp,
    /// BLE GATT 外设
    Ble,
    /// RFCOMM 串口服务
    Rfcomm,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Tcp => write!(f, "tcp"),
            TransportType::Ble => write!(f, "ble"),
            TransportType::Rfcomm => write!(f, "rfcomm"),
        }
    }
}

/// 字节连接 trait
#[async_trait]
pub trait Connection: Send {
    /// 读取一段字节；对端关闭时返回 `ConnectionClosed`
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// 写出全部字节
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// 获取远端地址
    fn peer_addr(&self) -> Option<String>;
}

/// 连接器 trait（客户端使用）
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection;

    /// 建立连接
    async fn connect(&self, addr: &str) -> Result<Self::Conn>;
}

/// 监听器 trait（服务端使用）
#[async_trait]
pub trait Listener: Send + Sync + Sized {
    type Conn: Connection;

    /// 绑定地址
    async fn bind(addr: &str) -> Result<Self>;

    /// 接受连接
    async fn accept(&mut self) -> Result<Self::Conn>;

    /// 获取本地地址
    fn local_addr(&self) -> Option<String>;
}

// ============================================================================
// TCP 实现
// ============================================================================

/// TCP 连接器
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpConnection;

    async fn connect(&self, addr: &str) -> Result<Self::Conn> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)?
            .map_err(ProtocolError::Io)?;
        TcpConnection::from_stream(stream)
    }
}

/// TCP 连接
pub struct TcpConnection {
    reader: RawReader<OwnedReadHalf>,
    writer: RawWriter<OwnedWriteHalf>,
    peer_addr: Option<String>,
}

impl TcpConnection {
    /// 从 TcpStream 创建
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr().ok().map(|a| a.to_string());
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: RawReader::new(read_half),
            writer: RawWriter::new(write_half),
            peer_addr,
        })
    }

    /// 分离读写端
    pub fn split(self) -> (RawReader<OwnedReadHalf>, RawWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reader.read_chunk(buf).await
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_bytes(bytes).await
    }

    fn peer_addr(&self) -> Option<String> {
        self.peer_addr.clone()
    }
}

/// TCP 监听器
pub struct TcpListener {
    listener: tokio::net::TcpListener,
}

#[async_trait]
impl Listener for TcpListener {
    type Conn = TcpConnection;

    async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(ProtocolError::Io)?;
        Ok(Self { listener })
    }

    async fn accept(&mut self) -> Result<Self::Conn> {
        let (stream, _addr) = self.listener.accept().await.map_err(ProtocolError::Io)?;
        TcpConnection::from_stream(stream)
    }

    fn local_addr(&self) -> Option<String> {
        self.listener.local_addr().ok().map(|a| a.to_string())
    }
}

// ============================================================================
// 原始字节读写
// ============================================================================

/// 原始字节读取器
pub struct RawReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin + Send> RawReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// 读取一段字节
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.reader.read(buf).await {
            Ok(0) => Err(ProtocolError::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ProtocolError::ConnectionClosed)
            }
            Err(e) => Err(ProtocolError::Io(e)),
        }
    }
}

/// 原始字节写入器
pub struct RawWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> RawWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 写出并刷新
    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
