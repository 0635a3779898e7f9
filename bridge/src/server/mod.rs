//! 客户端传输服务
//!
//! 包含:
//! - 传输无关的会话循环（字节 -> 模拟器，对局事件 -> 模拟器）
//! - TCP 服务（中性 UART，自动识别协议）
//! - BLE GATT 与 RFCOMM（需启用 `bluetooth` feature）
//!
//! 每个客户端一个写任务；积压的局面推送合并为最新局面。

#[cfg(feature = "bluetooth")]
pub mod bluetooth;

use std::sync::Arc;
use std::time::Duration;

use centaur_emulators::{EmulatorContext, MessageSink, Outbound, Protocol, Session};
use centaur_protocol::{
    BoardControl, Connection, GameEvent, Listener, ProtocolError, RawReader, RawWriter, TcpListener,
    TransportType, READ_CHUNK_SIZE,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::game::GameHandle;

/// accept 失败后的等待
const ACCEPT_BACKOFF: Duration = Duration::from_millis(500);

/// 会话所需的共享依赖
#[derive(Clone)]
pub struct ServerContext {
    pub board: Arc<dyn BoardControl>,
    pub game: GameHandle,
}

impl ServerContext {
    pub fn new(board: Arc<dyn BoardControl>, game: GameHandle) -> Self {
        Self { board, game }
    }
}

/// 合并一批事件：只保留最后一个携带局面的事件，其余事件保持顺序
pub fn coalesce_positions(events: Vec<GameEvent>) -> Vec<GameEvent> {
    let last = events.iter().rposition(|e| e.position_fen().is_some());
    events
        .into_iter()
        .enumerate()
        .filter(|(i, e)| e.position_fen().is_none() || Some(*i) == last)
        .map(|(_, e)| e)
        .collect()
}

/// 单个客户端的会话循环，`incoming` 关闭即视为断开
///
/// `fixed` 为空时自动识别协议；识别成功（或固定协议会话开始）时通知协调器接管。
pub async fn run_session(
    ctx: ServerContext,
    fixed: Option<Protocol>,
    sink: MessageSink,
    mut incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    label: &str,
) {
    let emulator_ctx = EmulatorContext::new(ctx.board.clone(), sink);
    let mut session = match fixed {
        Some(protocol) => Session::fixed(protocol, emulator_ctx),
        None => Session::detecting(emulator_ctx),
    };
    session.set_position(&ctx.game.fen());
    let mut events = ctx.game.subscribe();

    let mut connected = session.protocol();
    if let Some(protocol) = connected {
        ctx.game.client_connected(&protocol.to_string());
    }
    info!("客户端 {} 会话开始", label);

    loop {
        tokio::select! {
            bytes = incoming.recv() => {
                let Some(bytes) = bytes else {
                    break;
                };
                debug!("{} <- {:02x?}", label, bytes);
                if let Some(protocol) = session.feed_bytes(&bytes) {
                    if connected.is_none() {
                        connected = Some(protocol);
                        ctx.game.client_connected(&protocol.to_string());
                    }
                }
            }
            event = events.recv() => match event {
                Ok(first) => {
                    let mut batch = vec![first];
                    loop {
                        match events.try_recv() {
                            Ok(event) => batch.push(event),
                            Err(TryRecvError::Lagged(_)) => continue,
                            Err(_) => break,
                        }
                    }
                    for event in coalesce_positions(batch) {
                        session.on_game_event(&event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("客户端 {} 落后 {} 个事件，重新同步局面", label, skipped);
                    session.set_position(&ctx.game.fen());
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    session.close();
    if let Some(protocol) = connected {
        ctx.game.client_disconnected(&protocol.to_string());
    }
    info!("客户端 {} 会话结束", label);
}

/// 以字节流承载的会话（TCP、RFCOMM）
pub async fn serve_stream<R, W>(
    ctx: ServerContext,
    fixed: Option<Protocol>,
    mut reader: RawReader<R>,
    mut writer: RawWriter<W>,
    label: String,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let sink: MessageSink = Arc::new(move |message| {
        let _ = out_tx.send(message);
    });

    let writer_label = label.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(e) = writer.write_bytes(&message.bytes).await {
                warn!("写入客户端 {} 失败: {}", writer_label, e);
                break;
            }
        }
    });

    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let reader_label = label.clone();
    let reader_task = tokio::spawn(async move {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read_chunk(&mut buf).await {
                Ok(n) => {
                    if in_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(ProtocolError::ConnectionClosed) => {
                    debug!("客户端 {} 关闭连接", reader_label);
                    break;
                }
                Err(e) => {
                    warn!("读取客户端 {} 失败: {}", reader_label, e);
                    break;
                }
            }
        }
    });

    run_session(ctx, fixed, sink, in_rx, &label).await;
    reader_task.abort();
    writer_task.abort();
}

// ============================================================================
// TCP
// ============================================================================

/// TCP 客户端服务
pub struct TcpServer {
    listener: TcpListener,
    ctx: ServerContext,
    protocol: Option<Protocol>,
}

impl TcpServer {
    /// `protocol` 为空时每个连接自动识别
    pub async fn bind(addr: &str, ctx: ServerContext, protocol: Option<Protocol>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "TCP 客户端服务监听 {}",
            listener.local_addr().unwrap_or_else(|| addr.to_string())
        );
        Ok(Self {
            listener,
            ctx,
            protocol,
        })
    }

    pub fn local_addr(&self) -> Option<String> {
        self.listener.local_addr()
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            let conn = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("接受连接失败: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let label = format!("{}:{}", TransportType::Tcp, conn.peer_addr().unwrap_or_default());
            info!("新客户端连接: {}", label);
            let (reader, writer) = conn.split();
            tokio::spawn(serve_stream(
                self.ctx.clone(),
                self.protocol,
                reader,
                writer,
                label,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{CoordinatorConfig, GameCoordinator, GameSetup};
    use crate::player::HumanPlayer;
    use centaur_protocol::{parity, Connector, Occupancy, RecordingBoard, Side, TcpConnector};

    const WAIT: Duration = Duration::from_secs(2);

    fn coordinator() -> (ServerContext, tokio::task::JoinHandle<Result<()>>) {
        let board = Arc::new(RecordingBoard::new(Occupancy::STARTING));
        let setup = GameSetup {
            white: Box::new(HumanPlayer::new("white")),
            black: Box::new(HumanPlayer::new("black")),
            time_control: None,
            initial_fen: None,
        };
        let coordinator =
            GameCoordinator::new(setup, board.clone(), CoordinatorConfig::default()).unwrap();
        let handle = coordinator.handle();
        let task = tokio::spawn(coordinator.run());
        (ServerContext::new(board, handle), task)
    }

    async fn wait_for(
        events: &mut tokio::sync::broadcast::Receiver<GameEvent>,
        pred: impl Fn(&GameEvent) -> bool,
    ) -> GameEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("closed"),
                }
            }
        })
        .await
        .expect("timed out")
    }

    #[test]
    fn test_coalesce_keeps_latest_position() {
        let events = vec![
            GameEvent::MoveAccepted {
                uci: "e2e4".into(),
                san: "e4".into(),
                fen: "a".into(),
            },
            GameEvent::Status {
                message: "x".into(),
            },
            GameEvent::MoveAccepted {
                uci: "e7e5".into(),
                san: "e5".into(),
                fen: "b".into(),
            },
            GameEvent::Turn {
                side: Side::White,
                fen: "b".into(),
            },
        ];
        let merged = coalesce_positions(events);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0], GameEvent::Status { message: "x".into() });
        assert_eq!(merged[1].position_fen(), Some("b"));
        assert!(matches!(merged[2], GameEvent::Turn { .. }));
    }

    #[test]
    fn test_coalesce_without_positions() {
        let events = vec![GameEvent::KingsInCenter, GameEvent::CorrectionExited];
        assert_eq!(coalesce_positions(events.clone()), events);
        assert!(coalesce_positions(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn test_tcp_client_detected_as_millennium() {
        let (ctx, game_task) = coordinator();
        let mut events = ctx.game.subscribe();
        let game = ctx.game.clone();
        let server = TcpServer::bind("127.0.0.1:0", ctx, None).await.unwrap();
        let addr = server.local_addr().unwrap();
        let server_task = tokio::spawn(server.run());

        let mut client = TcpConnector.connect(&addr).await.unwrap();
        let version_request = parity::encode_message("V");
        client.send(&version_request).await.unwrap();
        client.send(&version_request).await.unwrap();

        let expected = parity::encode_message("v3130");
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        tokio::time::timeout(WAIT, async {
            while !received.windows(expected.len()).any(|w| w == expected.as_slice()) {
                let n = client.recv(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
            }
        })
        .await
        .expect("no version reply");

        let connected = wait_for(&mut events, |e| matches!(e, GameEvent::ClientConnected { .. })).await;
        assert_eq!(
            connected,
            GameEvent::ClientConnected {
                protocol: "millennium".into(),
                side: Side::Black
            }
        );

        drop(client);
        wait_for(&mut events, |e| matches!(e, GameEvent::ClientDisconnected { .. })).await;

        server_task.abort();
        game.shutdown();
        game_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_fixed_protocol_connects_immediately() {
        let (ctx, game_task) = coordinator();
        let mut events = ctx.game.subscribe();
        let game = ctx.game.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: MessageSink = Arc::new(|_| {});
        let session = tokio::spawn({
            let ctx = ctx.clone();
            async move { run_session(ctx, Some(Protocol::Pegasus), sink, rx, "test").await }
        });

        let connected = wait_for(&mut events, |e| matches!(e, GameEvent::ClientConnected { .. })).await;
        assert_eq!(
            connected,
            GameEvent::ClientConnected {
                protocol: "pegasus".into(),
                side: Side::Black
            }
        );
        drop(tx);
        session.await.unwrap();
        wait_for(&mut events, |e| matches!(e, GameEvent::ClientDisconnected { .. })).await;

        game.shutdown();
        game_task.await.unwrap().unwrap();
    }
}
