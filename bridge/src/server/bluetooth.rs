//! 蓝牙传输：BLE GATT 与 RFCOMM SPP
//!
//! BLE 只服务一个客户端，订阅数据通知即视为连接，订阅停止即断开。
//! RFCOMM 只承载 Millennium 协议。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bluer::adv::Advertisement;
use bluer::gatt::local::{
    Application, Characteristic, CharacteristicNotifier, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicWrite, CharacteristicWriteMethod, Service,
};
use bluer::rfcomm::{Profile, Role};
use bluer::Uuid;
use centaur_emulators::{Channel, MessageSink, Outbound, Protocol};
use centaur_protocol::{RawReader, RawWriter, TransportType};
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::{run_session, serve_stream, ServerContext};
use crate::error::Result;

/// Serial Port Profile
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);

pub const MILLENNIUM_SERVICE: Uuid = Uuid::from_u128(0x49535343_fe7d_4ae5_8fa9_9fafd205e455);
pub const MILLENNIUM_RX: Uuid = Uuid::from_u128(0x49535343_8841_43f4_a8d4_ecbe34729bb3);
pub const MILLENNIUM_TX: Uuid = Uuid::from_u128(0x49535343_1e4d_4bd9_ba61_23c647249616);

pub const NORDIC_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
pub const NORDIC_RX: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
pub const NORDIC_TX: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

pub const CHESSNUT_FEN_SERVICE: Uuid = Uuid::from_u128(0x1b7e8261_2877_41c3_b46e_cf057c562023);
pub const CHESSNUT_FEN_NOTIFY: Uuid = Uuid::from_u128(0x1b7e8262_2877_41c3_b46e_cf057c562023);
pub const CHESSNUT_OP_SERVICE: Uuid = Uuid::from_u128(0x1b7e8271_2877_41c3_b46e_cf057c562023);
pub const CHESSNUT_OP_WRITE: Uuid = Uuid::from_u128(0x1b7e8272_2877_41c3_b46e_cf057c562023);
pub const CHESSNUT_OP_NOTIFY: Uuid = Uuid::from_u128(0x1b7e8273_2877_41c3_b46e_cf057c562023);

/// 订阅状态检查间隔
const WATCH_INTERVAL: Duration = Duration::from_millis(500);

// ============================================================================
// GATT 布局
// ============================================================================

/// 特征的用途
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CharRole {
    /// 客户端写入，字节送入模拟器
    Write,
    /// 向客户端通知指定通道的出站消息
    Notify(Channel),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceLayout {
    pub uuid: Uuid,
    pub characteristics: Vec<(Uuid, CharRole)>,
}

/// 协议对应的 GATT 服务集合
pub fn gatt_layout(protocol: Protocol) -> Vec<ServiceLayout> {
    match protocol {
        Protocol::Millennium => vec![ServiceLayout {
            uuid: MILLENNIUM_SERVICE,
            characteristics: vec![
                (MILLENNIUM_RX, CharRole::Write),
                (MILLENNIUM_TX, CharRole::Notify(Channel::Data)),
            ],
        }],
        Protocol::Pegasus => vec![ServiceLayout {
            uuid: NORDIC_SERVICE,
            characteristics: vec![
                (NORDIC_RX, CharRole::Write),
                (NORDIC_TX, CharRole::Notify(Channel::Data)),
            ],
        }],
        Protocol::Chessnut => vec![
            ServiceLayout {
                uuid: CHESSNUT_FEN_SERVICE,
                characteristics: vec![(CHESSNUT_FEN_NOTIFY, CharRole::Notify(Channel::Data))],
            },
            ServiceLayout {
                uuid: CHESSNUT_OP_SERVICE,
                characteristics: vec![
                    (CHESSNUT_OP_WRITE, CharRole::Write),
                    (CHESSNUT_OP_NOTIFY, CharRole::Notify(Channel::Control)),
                ],
            },
        ],
    }
}

// ============================================================================
// BLE 服务
// ============================================================================

/// 当前 BLE 客户端
#[derive(Default)]
struct Link {
    incoming: Option<mpsc::UnboundedSender<Vec<u8>>>,
    notifiers: HashMap<Channel, CharacteristicNotifier>,
}

impl Link {
    fn disconnect(&mut self) {
        self.notifiers.clear();
        // 关闭输入通道即结束会话
        self.incoming = None;
    }
}

/// BLE GATT 外设
pub struct BleServer {
    ctx: ServerContext,
    protocol: Protocol,
}

impl BleServer {
    pub fn new(ctx: ServerContext, protocol: Protocol) -> Self {
        Self { ctx, protocol }
    }

    /// 广播并服务 GATT 应用，直到任务被取消
    pub async fn run(self) -> Result<()> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;

        let layout = gatt_layout(self.protocol);
        let advertisement = Advertisement {
            service_uuids: layout.iter().map(|s| s.uuid).collect(),
            local_name: Some(self.protocol.local_name().to_string()),
            discoverable: Some(true),
            ..Default::default()
        };
        let _advertisement = adapter.advertise(advertisement).await?;
        info!(
            "BLE 广播 {} ({}) 于适配器 {}",
            self.protocol.local_name(),
            self.protocol,
            adapter.name()
        );

        let link = Arc::new(Mutex::new(Link::default()));
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();
        let sink: MessageSink = Arc::new(move |message| {
            let _ = out_tx.send(message);
        });

        let application = Application {
            services: layout
                .iter()
                .map(|service| self.service(service, &link, &sink))
                .collect(),
            ..Default::default()
        };
        let _application = adapter.serve_gatt_application(application).await?;

        tokio::spawn(forward_notifications(link.clone(), out_rx));

        let mut ticker = tokio::time::interval(WATCH_INTERVAL);
        loop {
            ticker.tick().await;
            let mut link = link.lock().await;
            let stopped = link
                .notifiers
                .get(&Channel::Data)
                .is_some_and(|n| n.is_stopped());
            if stopped {
                info!("BLE 客户端取消订阅，断开");
                link.disconnect();
            }
        }
    }

    fn service(&self, layout: &ServiceLayout, link: &Arc<Mutex<Link>>, sink: &MessageSink) -> Service {
        let characteristics = layout
            .characteristics
            .iter()
            .map(|&(uuid, role)| match role {
                CharRole::Write => write_characteristic(uuid, link.clone()),
                CharRole::Notify(channel) => notify_characteristic(
                    uuid,
                    channel,
                    link.clone(),
                    self.ctx.clone(),
                    self.protocol,
                    sink.clone(),
                ),
            })
            .collect();
        Service {
            uuid: layout.uuid,
            primary: true,
            characteristics,
            ..Default::default()
        }
    }
}

fn write_characteristic(uuid: Uuid, link: Arc<Mutex<Link>>) -> Characteristic {
    Characteristic {
        uuid,
        write: Some(CharacteristicWrite {
            write: true,
            write_without_response: true,
            method: CharacteristicWriteMethod::Fun(Box::new(move |value, _request| {
                let link = link.clone();
                async move {
                    match link.lock().await.incoming.as_ref() {
                        Some(tx) => {
                            let _ = tx.send(value);
                        }
                        None => debug!("未订阅前的写入被丢弃: {:02x?}", value),
                    }
                    Ok(())
                }
                .boxed()
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn notify_characteristic(
    uuid: Uuid,
    channel: Channel,
    link: Arc<Mutex<Link>>,
    ctx: ServerContext,
    protocol: Protocol,
    sink: MessageSink,
) -> Characteristic {
    Characteristic {
        uuid,
        notify: Some(CharacteristicNotify {
            notify: true,
            method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                let link = link.clone();
                let ctx = ctx.clone();
                let sink = sink.clone();
                async move {
                    let mut link = link.lock().await;
                    link.notifiers.insert(channel, notifier);
                    if channel != Channel::Data || link.incoming.is_some() {
                        return;
                    }
                    info!("BLE 客户端订阅通知，会话开始");
                    let (tx, rx) = mpsc::unbounded_channel();
                    link.incoming = Some(tx);
                    tokio::spawn(async move {
                        run_session(ctx, Some(protocol), sink, rx, &TransportType::Ble.to_string()).await;
                    });
                }
                .boxed()
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 把模拟器出站消息写到对应通道的通知特征
async fn forward_notifications(link: Arc<Mutex<Link>>, mut out_rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(message) = out_rx.recv().await {
        let mut link = link.lock().await;
        let Some(notifier) = link.notifiers.get_mut(&message.channel) else {
            debug!("{:?} 通道未订阅，丢弃 {} 字节", message.channel, message.bytes.len());
            continue;
        };
        if let Err(e) = notifier.notify(message.bytes).await {
            warn!("BLE 通知失败: {}", e);
            if message.channel == Channel::Data {
                link.disconnect();
            }
        }
    }
}

// ============================================================================
// RFCOMM
// ============================================================================

/// RFCOMM 串口服务（Millennium）
pub struct RfcommServer {
    ctx: ServerContext,
    name: String,
    channel: u16,
}

impl RfcommServer {
    pub fn new(ctx: ServerContext, name: impl Into<String>, channel: u16) -> Self {
        Self {
            ctx,
            name: name.into(),
            channel,
        }
    }

    pub async fn run(self) -> Result<()> {
        let session = bluer::Session::new().await?;
        let profile = Profile {
            uuid: SPP_UUID,
            name: Some(self.name.clone()),
            channel: Some(self.channel),
            role: Some(Role::Server),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };
        let mut requests = session.register_profile(profile).await?;
        info!("RFCOMM 服务 \"{}\" 注册于通道 {}", self.name, self.channel);

        while let Some(request) = requests.next().await {
            let label = format!("{}:{}", TransportType::Rfcomm, request.device());
            let stream = match request.accept() {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("接受 RFCOMM 连接失败: {}", e);
                    continue;
                }
            };
            info!("新客户端连接: {}", label);
            let (reader, writer) = tokio::io::split(stream);
            tokio::spawn(serve_stream(
                self.ctx.clone(),
                Some(Protocol::Millennium),
                RawReader::new(reader),
                RawWriter::new(writer),
                label,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_protocol() {
        let millennium = gatt_layout(Protocol::Millennium);
        assert_eq!(millennium.len(), 1);
        assert_eq!(millennium[0].uuid, MILLENNIUM_SERVICE);

        let pegasus = gatt_layout(Protocol::Pegasus);
        assert_eq!(pegasus[0].uuid, NORDIC_SERVICE);
        assert_eq!(
            pegasus[0].characteristics,
            vec![(NORDIC_RX, CharRole::Write), (NORDIC_TX, CharRole::Notify(Channel::Data))]
        );
    }

    #[test]
    fn test_chessnut_uses_control_channel() {
        let layout = gatt_layout(Protocol::Chessnut);
        assert_eq!(layout.len(), 2);
        let notifies: Vec<Channel> = layout
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .filter_map(|&(_, role)| match role {
                CharRole::Notify(channel) => Some(channel),
                CharRole::Write => None,
            })
            .collect();
        assert_eq!(notifies, vec![Channel::Data, Channel::Control]);
        assert_eq!(SPP_UUID.to_string(), "00001101-0000-1000-8000-00805f9b34fb");
    }
}
