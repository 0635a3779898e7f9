use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use centaur_bridge::config::{PlayerSetting, Settings};
use centaur_bridge::player::{
    EngineConfig, EnginePlayer, HandBrainMode, HandBrainPlayer, HumanPlayer, Player,
    RemoteServicePlayer,
};
use centaur_bridge::position::parse_fen;
use centaur_bridge::{
    BoardLink, CoordinatorConfig, FenLog, GameCoordinator, GameSetup, GameStore, ServerContext,
    TcpServer,
};
use centaur_engine::{EngineRegistry, OnlineClient};
use centaur_protocol::{BoardControl, Side};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 构造玩家时共享的后端
struct Backends {
    registry: Arc<EngineRegistry>,
    online: Option<Arc<OnlineClient>>,
}

fn engine_config(settings: &Settings) -> EngineConfig {
    EngineConfig {
        path: settings.engine.path.clone(),
        profile: settings.engine.profile.clone(),
        difficulty: settings.engine.difficulty.clone(),
        think: Duration::from_secs(settings.engine.think_secs),
    }
}

fn build_player(
    setting: PlayerSetting,
    side: Side,
    settings: &Settings,
    backends: &Backends,
) -> Result<Box<dyn Player>> {
    let player: Box<dyn Player> = match setting {
        PlayerSetting::Human => Box::new(HumanPlayer::new(match side {
            Side::White if !settings.game.player_name.is_empty() => settings.game.player_name.clone(),
            _ => side.to_string(),
        })),
        PlayerSetting::Engine => {
            Box::new(EnginePlayer::new(engine_config(settings), backends.registry.clone()))
        }
        PlayerSetting::HandBrain => Box::new(HandBrainPlayer::new(
            HandBrainMode::Normal,
            engine_config(settings),
            backends.registry.clone(),
        )),
        PlayerSetting::HandBrainReverse => Box::new(HandBrainPlayer::new(
            HandBrainMode::Reverse,
            engine_config(settings),
            backends.registry.clone(),
        )),
        PlayerSetting::Online => {
            let client = backends
                .online
                .clone()
                .context("在线客户端未初始化")?;
            Box::new(RemoteServicePlayer::new(settings.remote_config(), client))
        }
    };
    Ok(player)
}

/// 续局：读取上次记录的局面，无效时从头开始
async fn resume_fen(settings: &Settings, log: &FenLog) -> Option<String> {
    if !settings.game.resume {
        return None;
    }
    let fen = log.read().await?;
    match parse_fen(&fen) {
        Ok(_) => {
            info!("从上次局面继续: {}", fen);
            Some(fen)
        }
        Err(e) => {
            warn!("上次局面无效 ({})，从初始局面开始", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("centaur_bridge=debug".parse()?))
        .init();

    info!("DGT Centaur 桥接服务启动中...");
    let settings = Settings::load();

    // 棋盘
    let link = Arc::new(
        BoardLink::open(&settings.board.device)
            .with_context(|| format!("无法打开串口 {}", settings.board.device))?,
    );
    let occupancy = tokio::task::spawn_blocking({
        let link = link.clone();
        move || link.start()
    })
    .await?
    .context("棋盘地址发现失败")?;
    info!("棋盘就绪，{} 个格子有棋子", occupancy.count());

    // 存储
    let store = GameStore::open(&settings.game.database).await?;
    let fen_log = FenLog::new(settings.game.fen_log.clone());

    // 玩家
    let uses_online =
        settings.game.white == PlayerSetting::Online || settings.game.black == PlayerSetting::Online;
    let backends = Backends {
        registry: Arc::new(EngineRegistry::new()),
        online: if uses_online {
            Some(Arc::new(OnlineClient::new(settings.online_config())?))
        } else {
            None
        },
    };
    let setup = GameSetup {
        white: build_player(settings.game.white, Side::White, &settings, &backends)?,
        black: build_player(settings.game.black, Side::Black, &settings, &backends)?,
        time_control: if uses_online { settings.remote_config().clock } else { None },
        initial_fen: resume_fen(&settings, &fen_log).await,
    };

    // 对局协调器
    let board: Arc<dyn BoardControl> = link.clone();
    let coordinator = GameCoordinator::new(setup, board.clone(), CoordinatorConfig::from_settings(&settings))?
        .with_store(store)
        .with_fen_log(fen_log);
    let handle = coordinator.handle();
    link.subscribe_piece_events(Arc::new({
        let handle = handle.clone();
        move |event| handle.piece_event(event)
    }));
    link.subscribe_button_events(Arc::new({
        let handle = handle.clone();
        move |event| handle.key_event(event)
    }));
    let mut game_task = tokio::spawn(coordinator.run());

    // 客户端传输
    let ctx = ServerContext::new(board, handle.clone());
    let mut servers = Vec::new();
    if settings.server.tcp_enabled {
        let addr = format!("0.0.0.0:{}", settings.server.tcp_port);
        let server = TcpServer::bind(&addr, ctx.clone(), settings.server.protocol).await?;
        servers.push(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("TCP 服务退出: {}", e);
            }
        }));
    }
    #[cfg(feature = "bluetooth")]
    if settings.bluetooth.enabled {
        use centaur_bridge::server::bluetooth::{BleServer, RfcommServer};

        let ble = BleServer::new(ctx.clone(), settings.bluetooth.protocol);
        servers.push(tokio::spawn(async move {
            if let Err(e) = ble.run().await {
                error!("BLE 服务退出: {}", e);
            }
        }));
        if settings.bluetooth.rfcomm {
            let rfcomm = RfcommServer::new(
                ctx.clone(),
                settings.bluetooth.rfcomm_name.clone(),
                u16::from(settings.bluetooth.rfcomm_channel),
            );
            servers.push(tokio::spawn(async move {
                if let Err(e) = rfcomm.run().await {
                    error!("RFCOMM 服务退出: {}", e);
                }
            }));
        }
    }
    #[cfg(not(feature = "bluetooth"))]
    if settings.bluetooth.enabled {
        warn!("蓝牙已启用但未编译 bluetooth feature，跳过");
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("无法监听退出信号")?;
            info!("收到退出信号");
            handle.shutdown();
        }
        result = &mut game_task => {
            warn!("对局协调器提前退出");
            result?.context("对局协调器异常")?;
        }
    }

    for server in servers {
        server.abort();
    }
    if !game_task.is_finished() {
        if let Ok(Err(e)) = game_task.await {
            error!("对局协调器退出时出错: {}", e);
        }
    }
    link.shutdown();
    info!("已退出");
    Ok(())
}
