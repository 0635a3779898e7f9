//! Hand+Brain 玩家
//!
//! 人与引擎合作走一方:
//! - `Normal`: 引擎（大脑）指定棋子类型，人（手）用该类型的棋子任走一步
//! - `Reverse`: 人拿起一枚己方棋子再放回原格以指定类型，引擎在该类型的走法中
//!   选出最佳一步作为待走走法，由人在棋盘上执行
//!
//! 引擎句柄与难度配置同 [`EnginePlayer`](super::EnginePlayer)。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use centaur_engine::{EngineHandle, EngineRegistry};
use centaur_protocol::{PieceEvent, Side};
use shakmaty::{Chess, Move, Position, Role, Square};
use tracing::{debug, info, warn};

use super::{
    match_pending, CommandSender, EngineConfig, MoveDecision, Player, PlayerCommand, PlayerKind,
};
use crate::error::Result;
use crate::position::{parse_uci, side, square, to_fen, to_uci};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandBrainMode {
    /// 引擎指定类型，人走
    Normal,
    /// 人指定类型，引擎选走法
    Reverse,
}

impl fmt::Display for HandBrainMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandBrainMode::Normal => write!(f, "normal"),
            HandBrainMode::Reverse => write!(f, "reverse"),
        }
    }
}

pub fn role_name(role: Role) -> &'static str {
    match role {
        Role::Pawn => "Pawn",
        Role::Knight => "Knight",
        Role::Bishop => "Bishop",
        Role::Rook => "Rook",
        Role::Queen => "Queen",
        Role::King => "King",
    }
}

/// 由某类型棋子走出的全部合法走法（易位算王）
pub fn moves_with_role(pos: &Chess, role: Role) -> Vec<Move> {
    pos.legal_moves()
        .into_iter()
        .filter(|m| m.role() == role)
        .collect()
}

pub struct HandBrainPlayer {
    mode: HandBrainMode,
    config: EngineConfig,
    registry: Arc<EngineRegistry>,
    handle: Option<EngineHandle>,
    options: Arc<HashMap<String, String>>,
    side: Option<Side>,
    commands: Option<CommandSender>,
    /// 每次局面变化或重新选择加一；旧搜索的结果被丢弃
    generation: Arc<AtomicU64>,
    /// 己方回合的局面
    position: Option<Chess>,
    /// 引擎建议的类型及其代次
    hint: Arc<Mutex<Option<(u64, Role)>>>,
    /// 已拿起、等待放回确认的方格
    selecting: Option<Square>,
    pending: Option<Move>,
}

impl HandBrainPlayer {
    pub fn new(mode: HandBrainMode, config: EngineConfig, registry: Arc<EngineRegistry>) -> Self {
        Self {
            mode,
            config,
            registry,
            handle: None,
            options: Arc::new(HashMap::new()),
            side: None,
            commands: None,
            generation: Arc::new(AtomicU64::new(0)),
            position: None,
            hint: Arc::new(Mutex::new(None)),
            selecting: None,
            pending: None,
        }
    }

    pub fn mode(&self) -> HandBrainMode {
        self.mode
    }

    /// 本回合引擎建议的棋子类型
    pub fn hint(&self) -> Option<Role> {
        let current = self.generation.load(Ordering::Acquire);
        match self.hint.lock() {
            Ok(hint) => hint.and_then(|(g, role)| (g == current).then_some(role)),
            Err(_) => None,
        }
    }

    fn status(&self, message: impl Into<String>) {
        if let (Some(side), Some(commands)) = (self.side, &self.commands) {
            let _ = commands.send(PlayerCommand::Status {
                side,
                message: message.into(),
            });
        }
    }

    /// 后台求最佳走法，取其棋子类型作为提示
    fn suggest(&self, position: &Chess, generation: u64) {
        let (Some(me), Some(handle), Some(commands)) =
            (self.side, self.handle.clone(), self.commands.clone())
        else {
            return;
        };
        let pos = position.clone();
        let think = self.config.think;
        let options = self.options.clone();
        let current = self.generation.clone();
        let hint = self.hint.clone();
        tokio::spawn(async move {
            let result = handle.play(&to_fen(&pos), think, Some(options.as_ref())).await;
            if current.load(Ordering::Acquire) != generation {
                debug!("局面已变化，丢弃类型提示");
                return;
            }
            let role = match result {
                Ok(Some(best)) => parse_uci(&pos, &best.uci).ok().map(|mv| mv.role()),
                Ok(None) => None,
                Err(e) => {
                    warn!("Hand+Brain 引擎出错: {}", e);
                    None
                }
            };
            let message = match role {
                Some(role) => {
                    if let Ok(mut slot) = hint.lock() {
                        *slot = Some((generation, role));
                    }
                    info!("大脑建议: {}", role_name(role));
                    format!("move your {}", role_name(role))
                }
                None => "no hint, move any piece".to_string(),
            };
            let _ = commands.send(PlayerCommand::Status { side: me, message });
        });
    }

    /// 人选定类型后，在该类型的走法中求待走走法
    fn choose(&mut self, position: &Chess, role: Role) {
        let candidates = moves_with_role(position, role);
        let name = role_name(role);
        info!("选定类型: {} ({} 步可走)", name, candidates.len());
        let (Some(me), Some(commands)) = (self.side, self.commands.clone()) else {
            return;
        };
        let fen = to_fen(position);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        match candidates.as_slice() {
            [] => self.status(format!("no {name} moves, choose another")),
            [only] => {
                let _ = commands.send(PlayerCommand::PendingMove {
                    side: me,
                    uci: to_uci(only),
                    fen,
                });
            }
            _ => {
                let Some(handle) = self.handle.clone() else {
                    return;
                };
                self.status(format!("finding best {name} move"));
                let think = self.config.think;
                let options = self.options.clone();
                let current = self.generation.clone();
                let searchmoves: Vec<String> = candidates.iter().map(to_uci).collect();
                tokio::spawn(async move {
                    let result = handle
                        .play_among(&fen, think, Some(options.as_ref()), &searchmoves)
                        .await;
                    if current.load(Ordering::Acquire) != generation {
                        debug!("选择已变化，丢弃引擎结果");
                        return;
                    }
                    let command = match result {
                        Ok(best) => {
                            let uci = match best {
                                Some(best) if searchmoves.contains(&best.uci) => best.uci,
                                other => {
                                    warn!("引擎走法 {:?} 不属于所选类型，改用第一个候选", other.map(|b| b.uci));
                                    searchmoves[0].clone()
                                }
                            };
                            PlayerCommand::PendingMove { side: me, uci, fen }
                        }
                        Err(e) => PlayerCommand::Failed {
                            side: me,
                            reason: format!("{e}, choose again"),
                        },
                    };
                    let _ = commands.send(command);
                });
            }
        }
    }
}

#[async_trait]
impl Player for HandBrainPlayer {
    fn kind(&self) -> PlayerKind {
        PlayerKind::HandBrain
    }

    fn name(&self) -> String {
        format!("H+B {} ({})", self.mode, self.config.engine_name())
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
        self.position = None;
        self.commands = None;
        if self.handle.take().is_some() {
            debug!("{} 释放引擎句柄", self.name());
        }
    }

    fn on_turn(&mut self, position: &Chess) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.pending = None;
        self.selecting = None;
        self.position = None;

        let Some(me) = self.side else {
            return;
        };
        if side(position.turn()) != me || position.is_game_over() {
            return;
        }
        self.position = Some(position.clone());
        match self.mode {
            HandBrainMode::Normal => self.suggest(position, generation),
            HandBrainMode::Reverse => self.status("lift a piece to choose its type"),
        }
    }

    fn on_piece_event(&mut self, event: &PieceEvent) {
        if self.mode != HandBrainMode::Reverse || self.pending.is_some() {
            return;
        }
        let Some(pos) = self.position.clone() else {
            return;
        };
        let sq = square(event.square);

        if event.is_lift() {
            match pos.board().piece_at(sq) {
                Some(piece) if piece.color == pos.turn() => {
                    self.selecting = Some(sq);
                    self.status(format!("{}: put it back to confirm", role_name(piece.role)));
                }
                Some(_) => self.status("choose your own piece"),
                None => {}
            }
            return;
        }

        match self.selecting.take() {
            Some(lifted) if lifted == sq => {
                if let Some(role) = pos.board().role_at(sq) {
                    self.choose(&pos, role);
                }
            }
            Some(_) => self.status("lift a piece to choose its type"),
            None => {}
        }
    }

    fn on_move_formed(&mut self, _position: &Chess, mv: &Move) -> MoveDecision {
        match self.mode {
            HandBrainMode::Normal => match self.hint() {
                Some(role) if mv.role() != role => {
                    MoveDecision::Mismatch(format!("use your {}", role_name(role)))
                }
                _ => MoveDecision::Submit(mv.clone()),
            },
            HandBrainMode::Reverse => {
                match_pending(self.pending.as_ref(), mv, "choose a piece type first")
            }
        }
    }

    fn pending_move(&self) -> Option<&Move> {
        self.pending.as_ref()
    }

    fn set_pending(&mut self, mv: Option<Move>) {
        if self.mode == HandBrainMode::Reverse {
            self.pending = mv;
        }
    }

    fn is_ready(&self) -> bool {
        self.handle.is_some()
    }

    fn can_resign(&self) -> bool {
        true
    }
}
