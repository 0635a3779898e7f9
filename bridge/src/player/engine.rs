//! 引擎玩家
//!
//! 从注册表获取共享引擎句柄，按 `.uci` 难度配置设置选项；
//! 轮到己方时在后台任务中计算，结果作为待走走法发给协调器。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use centaur_engine::profile::{self, UciProfile};
use centaur_engine::{EngineError, EngineHandle, EngineRegistry};
use centaur_protocol::Side;
use shakmaty::{Chess, Move, Position};
use tracing::{debug, info, warn};

use super::{match_pending, CommandSender, MoveDecision, Player, PlayerCommand, PlayerKind};
use crate::error::Result;
use crate::position::{side, to_fen};

/// 超时后的重试次数
const ENGINE_RETRIES: usize = 2;

/// 引擎玩家配置
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub path: PathBuf,
    /// `.uci` 文件；为空时在引擎所在目录查找 `<engine>.uci`
    pub profile: Option<PathBuf>,
    pub difficulty: String,
    pub think: Duration,
}

impl EngineConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            profile: None,
            difficulty: profile::DEFAULT_SECTION.to_string(),
            think: Duration::from_secs(5),
        }
    }

    pub(super) fn engine_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "engine".to_string())
    }

    /// 读取难度选项；找不到配置文件时不设置任何选项
    pub(super) fn load_options(&self) -> HashMap<String, String> {
        let path = self.profile.clone().or_else(|| {
            let dirs: Vec<PathBuf> = self.path.parent().map(Path::to_path_buf).into_iter().collect();
            profile::locate(&self.engine_name(), &dirs)
        });
        let Some(path) = path else {
            debug!("{} 没有 .uci 配置", self.engine_name());
            return HashMap::new();
        };
        match UciProfile::load(&path) {
            Ok(profile) => profile.options_for(&self.difficulty),
            Err(e) => {
                warn!("读取引擎配置失败: {}", e);
                HashMap::new()
            }
        }
    }
}

pub struct EnginePlayer {
    config: EngineConfig,
    registry: Arc<EngineRegistry>,
    handle: Option<EngineHandle>,
    options: Arc<HashMap<String, String>>,
    side: Option<Side>,
    commands: Option<CommandSender>,
    pending: Option<Move>,
    /// 每次局面变化加一；旧搜索的结果被丢弃
    generation: Arc<AtomicU64>,
}

impl EnginePlayer {
    pub fn new(config: EngineConfig, registry: Arc<EngineRegistry>) -> Self {
        Self {
            config,
            registry,
            handle: None,
            options: Arc::new(HashMap::new()),
            side: None,
            commands: None,
            pending: None,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn options(&self) -> &HashMap<String, String> {
        &self.options
    }
}

#[async_trait]
impl Player for EnginePlayer {
    fn kind(&self) -> PlayerKind {
        PlayerKind::Engine
    }

    fn name(&self) -> String {
        format!("{} ({})", self.config.engine_name(), self.config.difficulty)
    }

    async fn start(&mut self, side: Side, commands: CommandSender) -> Result<()> {
        let handle = self.registry.acquire(&self.config.path).await?;
        let options = self.config.load_options();
        handle.configure(&options).await?;
        handle.new_game().await?;
        info!("{} 执 {}", self.name(), side);

        self.handle = Some(handle);
        self.options = Arc::new(options);
        self.side = Some(side);
        let _ = commands.send(PlayerCommand::Ready { side });
        self.commands = Some(commands);
        Ok(())
    }

    async fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.pending = None;
        self.commands = None;
        if self.handle.take().is_some() {
            debug!("{} 释放引擎句柄", self.name());
        }
    }

    fn on_turn(&mut self, position: &Chess) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.pending = None;

        let (Some(me), Some(handle), Some(commands)) =
            (self.side, self.handle.clone(), self.commands.clone())
        else {
            return;
        };
        if side(position.turn()) != me || position.is_game_over() {
            return;
        }

        let fen = to_fen(position);
        let think = self.config.think;
        let options = self.options.clone();
        let current = self.generation.clone();
        tokio::spawn(async move {
            let stale = || current.load(Ordering::Acquire) != generation;
            for attempt in 0..=ENGINE_RETRIES {
                let result = handle.play(&fen, think, Some(options.as_ref())).await;
                if stale() {
                    debug!("局面已变化，丢弃引擎结果");
                    return;
                }
                let command = match result {
                    Ok(Some(best)) => PlayerCommand::PendingMove {
                        side: me,
                        uci: best.uci,
                        fen,
                    },
                    Ok(None) => PlayerCommand::Failed {
                        side: me,
                        reason: "engine has no move".into(),
                    },
                    Err(EngineError::Timeout(what)) if attempt < ENGINE_RETRIES => {
                        warn!("引擎 '{}' 超时，重新请求", what);
                        let _ = commands.send(PlayerCommand::Status {
                            side: me,
                            message: "engine timed out, retrying".into(),
                        });
                        continue;
                    }
                    Err(e) => PlayerCommand::Failed {
                        side: me,
                        reason: e.to_string(),
                    },
                };
                let _ = commands.send(command);
                return;
            }
        });
    }

    fn on_move_formed(&mut self, _position: &Chess, mv: &Move) -> MoveDecision {
        match_pending(self.pending.as_ref(), mv, "engine is still thinking")
    }

    fn pending_move(&self) -> Option<&Move> {
        self.pending.as_ref()
    }

    fn set_pending(&mut self, mv: Option<Move>) {
        self.pending = mv;
    }

    fn is_ready(&self) -> bool {
        self.handle.is_some()
    }
}
