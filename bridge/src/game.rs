//! 对局协调器
//!
//! 单个任务独占局面：消费棋子/按键事件、玩家命令与客户端连接变化，
//! 应用被接受的走法后按注册顺序广播 [`GameEvent`]，并通过 watch 通道发布最新 FEN。
//!
//! 菜单按键: TICK 确认，BACK 取消，UP/DOWN 切换选项。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use centaur_protocol::board::DEFAULT_SPEED;
use centaur_protocol::{
    BoardControl, GameEvent, Key, KeyEvent, Occupancy, PieceEvent, ProtocolError, Side, Sound,
};
use shakmaty::{Chess, Move, Position};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::correction::{Guidance, LedHint};
use crate::error::{BridgeError, Result};
use crate::move_state::{MoveConfig, MoveContext, MoveOutput, MoveState};
use crate::player::{
    CommandSender, MoveDecision, Player, PlayerCommand, PlayerKind, PlayerManager,
    RemoteAppPlayer,
};
use crate::position::{
    index, occupancy, outcome, parse_fen, parse_uci, side, to_fen, to_san, to_uci,
};
use crate::storage::{build_pgn, FenLog, GameStore, PgnInfo};

/// 事件广播容量
const EVENT_CAPACITY: usize = 256;

/// 计时手势的检查间隔
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// 电量轮询间隔；LED 与声音命令不等待响应，棋盘掉线只能靠有响应的命令发现
const BOARD_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// 对局参数
pub struct GameSetup {
    pub white: Box<dyn Player>,
    pub black: Box<dyn Player>,
    /// 基础时间（秒）与加秒，仅记录
    pub time_control: Option<(u32, u32)>,
    /// 为空时从标准初始局面开始
    pub initial_fen: Option<String>,
}

/// 协调器配置
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// 客户端应用接管的一方
    pub app_color: Side,
    pub intensity: u8,
    pub sound: bool,
    pub moves: MoveConfig,
    /// 电量轮询间隔，超时即视为棋盘故障
    pub health_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            app_color: Side::Black,
            intensity: centaur_protocol::board::DEFAULT_INTENSITY,
            sound: true,
            moves: MoveConfig::default(),
            health_interval: BOARD_HEALTH_INTERVAL,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            app_color: settings.game.app_color,
            intensity: settings.board.intensity,
            sound: settings.board.sound,
            moves: MoveConfig {
                kings_in_center: settings.board.kings_in_center,
                king_lift_resign: settings.king_lift_resign(),
            },
            health_interval: BOARD_HEALTH_INTERVAL,
        }
    }
}

/// 协调器输入
#[derive(Clone, Debug, PartialEq)]
pub enum GameInput {
    Piece(PieceEvent),
    Key(KeyEvent),
    ClientConnected { protocol: String },
    ClientDisconnected { protocol: String },
    /// 棋盘命令超时等链路故障
    BoardFault(String),
    NewGame { fen: Option<String> },
    Abort,
    Shutdown,
}

/// 协调器句柄，可在任意线程使用
#[derive(Clone)]
pub struct GameHandle {
    inputs: mpsc::UnboundedSender<GameInput>,
    events: broadcast::Sender<GameEvent>,
    position: watch::Receiver<String>,
}

impl GameHandle {
    /// 协调器已停止时返回 false
    pub fn send(&self, input: GameInput) -> bool {
        self.inputs.send(input).is_ok()
    }

    pub fn piece_event(&self, event: PieceEvent) {
        self.send(GameInput::Piece(event));
    }

    pub fn key_event(&self, event: KeyEvent) {
        self.send(GameInput::Key(event));
    }

    pub fn client_connected(&self, protocol: &str) {
        self.send(GameInput::ClientConnected {
            protocol: protocol.to_string(),
        });
    }

    pub fn client_disconnected(&self, protocol: &str) {
        self.send(GameInput::ClientDisconnected {
            protocol: protocol.to_string(),
        });
    }

    pub fn board_fault(&self, reason: &str) {
        self.send(GameInput::BoardFault(reason.to_string()));
    }

    pub fn new_game(&self, fen: Option<String>) {
        self.send(GameInput::NewGame { fen });
    }

    pub fn abort(&self) {
        self.send(GameInput::Abort);
    }

    pub fn shutdown(&self) {
        self.send(GameInput::Shutdown);
    }

    /// 订阅对局事件
    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    /// 当前局面 FEN
    pub fn fen(&self) -> String {
        self.position.borrow().clone()
    }

    pub fn watch_position(&self) -> watch::Receiver<String> {
        self.position.clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MenuChoice {
    Draw,
    WhiteResigns,
    BlackResigns,
}

const MENU_CHOICES: [MenuChoice; 3] = [
    MenuChoice::Draw,
    MenuChoice::WhiteResigns,
    MenuChoice::BlackResigns,
];

impl MenuChoice {
    fn label(self) -> &'static str {
        match self {
            MenuChoice::Draw => "draw",
            MenuChoice::WhiteResigns => "white resigns",
            MenuChoice::BlackResigns => "black resigns",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Menu {
    KingsInCenter { choice: usize },
    ResignConfirm { side: Side },
}

/// 应用接管前的原玩家
struct Takeover {
    protocol: String,
    side: Side,
    saved: Box<dyn Player>,
}

/// 对局协调器
pub struct GameCoordinator {
    board: Arc<dyn BoardControl>,
    config: CoordinatorConfig,
    players: PlayerManager,
    state: MoveState,
    position: Chess,
    /// (走子前局面, 走法)
    history: Vec<(Chess, Move)>,
    time_control: Option<(u32, u32)>,
    over: Option<(String, String)>,
    menu: Option<Menu>,
    takeover: Option<Takeover>,

    events: broadcast::Sender<GameEvent>,
    position_tx: watch::Sender<String>,
    position_rx: watch::Receiver<String>,
    input_tx: mpsc::UnboundedSender<GameInput>,
    input_rx: Option<mpsc::UnboundedReceiver<GameInput>>,
    commands_tx: CommandSender,
    commands_rx: Option<mpsc::UnboundedReceiver<PlayerCommand>>,

    store: Option<GameStore>,
    fen_log: Option<FenLog>,
    game_id: Option<i64>,
    health_check: Option<tokio::task::JoinHandle<()>>,
}

impl GameCoordinator {
    pub fn new(
        setup: GameSetup,
        board: Arc<dyn BoardControl>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        let position = match setup.initial_fen.as_deref() {
            Some(fen) => parse_fen(fen)?,
            None => Chess::default(),
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (position_tx, position_rx) = watch::channel(to_fen(&position));
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let state = MoveState::new(config.moves.clone(), board.occupancy());

        Ok(Self {
            board,
            config,
            players: PlayerManager::new(setup.white, setup.black),
            state,
            position,
            history: Vec::new(),
            time_control: setup.time_control,
            over: None,
            menu: None,
            takeover: None,
            events,
            position_tx,
            position_rx,
            input_tx,
            input_rx: Some(input_rx),
            commands_tx,
            commands_rx: Some(commands_rx),
            store: None,
            fen_log: None,
            game_id: None,
            health_check: None,
        })
    }

    pub fn with_store(mut self, store: GameStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_fen_log(mut self, log: FenLog) -> Self {
        self.fen_log = Some(log);
        self
    }

    pub fn handle(&self) -> GameHandle {
        GameHandle {
            inputs: self.input_tx.clone(),
            events: self.events.clone(),
            position: self.position_rx.clone(),
        }
    }

    /// 启动玩家并处理输入，直到收到 `Shutdown`
    ///
    /// 玩家启动失败（如引擎不存在）时对局不会开始。
    pub async fn run(mut self) -> Result<()> {
        let mut inputs = self.input_rx.take().ok_or(BridgeError::Stopped)?;
        let mut commands = self.commands_rx.take().ok_or(BridgeError::Stopped)?;

        self.players.start_all(&self.commands_tx).await?;
        info!("对局开始: {}", self.players.describe());
        self.begin().await;

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        let period = self.config.health_interval;
        let mut health = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    None | Some(GameInput::Shutdown) => break,
                    Some(input) => self.on_input(input).await,
                },
                Some(command) = commands.recv() => self.on_command(command).await,
                _ = ticker.tick() => {
                    let outputs = self.state.tick(Instant::now());
                    if !outputs.is_empty() {
                        self.apply(outputs).await;
                    }
                }
                _ = health.tick() => self.check_board(),
            }
        }

        if let Some(check) = self.health_check.take() {
            check.abort();
        }

        self.players.stop_all().await;
        if let Some(mut takeover) = self.takeover.take() {
            takeover.saved.stop().await;
        }
        info!("对局协调器已停止");
        Ok(())
    }

    // ========================================================================
    // 输入
    // ========================================================================

    async fn on_input(&mut self, input: GameInput) {
        match input {
            GameInput::Piece(event) => self.on_piece(event).await,
            GameInput::Key(event) if event.pressed => self.on_key(event.key).await,
            GameInput::Key(_) => {}
            GameInput::ClientConnected { protocol } => self.client_connected(protocol).await,
            GameInput::ClientDisconnected { protocol } => {
                self.client_disconnected(protocol).await
            }
            GameInput::BoardFault(reason) => {
                warn!("棋盘故障: {}", reason);
                self.state.set_physical(self.board.occupancy());
                let pos = self.position.clone();
                let outputs = self.state.force_correction(&pos, &reason);
                self.apply(outputs).await;
            }
            GameInput::NewGame { fen } => self.new_game(fen).await,
            GameInput::Abort => self.abort().await,
            GameInput::Shutdown => {}
        }
    }

    async fn on_piece(&mut self, event: PieceEvent) {
        self.emit(GameEvent::Piece(event));

        if self.over.is_some() {
            let mut physical = self.state.physical();
            if event.is_lift() {
                physical.clear(event.square);
            } else {
                physical.set(event.square);
            }
            self.state.set_physical(physical);
            if physical == Occupancy::STARTING {
                info!("终局后棋盘摆回初始局面，开始新对局");
                self.new_game(None).await;
            }
            return;
        }

        self.players
            .current(&self.position)
            .on_piece_event(&event);

        let pending = self.players.pending(&self.position).cloned();
        let ctx = MoveContext {
            position: &self.position,
            pending: pending.as_ref(),
            previous: self.history.last().map(|(before, _)| occupancy(before)),
            game_over: false,
            initial: self.history.is_empty(),
        };
        let outputs = self.state.handle(event, &ctx);
        self.apply(outputs).await;
    }

    async fn on_key(&mut self, key: Key) {
        debug!("按键 {:?}", key);
        match self.menu {
            Some(Menu::KingsInCenter { choice }) => match key {
                Key::Up => self.select((choice + MENU_CHOICES.len() - 1) % MENU_CHOICES.len()),
                Key::Down => self.select((choice + 1) % MENU_CHOICES.len()),
                Key::Tick => {
                    self.close_menu();
                    self.menu_confirmed(MENU_CHOICES[choice]).await;
                }
                Key::Back => {
                    self.close_menu();
                    let pos = self.position.clone();
                    let outputs = self.state.leave_menu(&pos);
                    self.apply(outputs).await;
                }
                _ => {}
            },
            Some(Menu::ResignConfirm { side }) => match key {
                Key::Tick => {
                    self.menu = None;
                    self.resign(side).await;
                }
                Key::Back => {
                    self.menu = None;
                    self.status(format!("{side} resignation cancelled"));
                }
                _ => {}
            },
            None => match key {
                Key::Help => self.show_pending(),
                Key::Tick if self.over.is_some() => self.new_game(None).await,
                _ => {}
            },
        }
    }

    async fn on_command(&mut self, command: PlayerCommand) {
        match command {
            PlayerCommand::PendingMove { side, uci, fen } => self.pending_move(side, uci, fen),
            PlayerCommand::Ready { side } => {
                debug!("{} 已就绪", side);
                if self.players.is_ready() {
                    self.status("players ready".to_string());
                }
            }
            PlayerCommand::Resign { side } => {
                if self.over.is_none() {
                    self.finish(resign_result(side), "resignation".to_string())
                        .await;
                }
            }
            PlayerCommand::DrawOffer { side } => self.status(format!("{side} offers a draw")),
            PlayerCommand::Status { side, message } => self.status(format!("{side}: {message}")),
            PlayerCommand::Failed { side, reason } => {
                warn!("{} 玩家失败: {}", side, reason);
                self.beep(Sound::Wrong);
                self.status(format!("{side}: {reason}"));
            }
            PlayerCommand::GameEnded {
                result,
                termination,
            } => {
                if self.over.is_none() {
                    self.finish(result, termination).await;
                }
            }
        }
    }

    /// 校验并登记待走走法；局面已变化的结果直接丢弃
    fn pending_move(&mut self, mover: Side, uci: String, fen: String) {
        if self.over.is_some() {
            return;
        }
        if fen != to_fen(&self.position) {
            debug!("丢弃过期的待走走法 {} ({})", uci, mover);
            return;
        }
        if mover != side(self.position.turn()) {
            debug!("丢弃非当前方的待走走法 {} ({})", uci, mover);
            return;
        }
        if self.players.get(mover).kind() == PlayerKind::RemoteApp {
            debug!("{} 由客户端应用控制，忽略待走走法", mover);
            return;
        }
        let mv = match parse_uci(&self.position, &uci) {
            Ok(mv) => mv,
            Err(e) => {
                warn!("{} 给出非法走法 {}: {}", mover, uci, e);
                return;
            }
        };
        info!("{} 待走走法: {}", mover, uci);
        self.players.get_mut(mover).set_pending(Some(mv));
        self.emit(GameEvent::PendingMove { side: mover, uci });
        if !self.state.in_correction() {
            self.show_pending();
        }
    }

    // ========================================================================
    // 状态机输出
    // ========================================================================

    async fn apply(&mut self, outputs: Vec<MoveOutput>) {
        let mut queue: VecDeque<MoveOutput> = outputs.into();
        while let Some(output) = queue.pop_front() {
            match output {
                MoveOutput::MoveAccepted(mv) => {
                    let pos = self.position.clone();
                    let mover = side(pos.turn());
                    match self.players.get_mut(mover).on_move_formed(&pos, &mv) {
                        MoveDecision::Submit(mv) => self.commit(mv).await,
                        MoveDecision::Mismatch(reason) => {
                            info!("{} 拒绝走法 {}: {}", mover, to_uci(&mv), reason);
                            self.beep(Sound::WrongMove);
                            queue.clear();
                            queue.extend(self.state.reject(&pos, &reason));
                        }
                    }
                }
                MoveOutput::TakebackDetected => self.takeback().await,
                MoveOutput::LateCastle(castle) => {
                    if self.undo_for_castle(&castle).await {
                        queue.push_front(MoveOutput::MoveAccepted(castle));
                    }
                }
                MoveOutput::NewGameRequested => {
                    let _ = self.input_tx.send(GameInput::NewGame { fen: None });
                }
                MoveOutput::KingsInCenter => {
                    self.emit(GameEvent::KingsInCenter);
                    self.menu = Some(Menu::KingsInCenter { choice: 0 });
                    self.select(0);
                }
                MoveOutput::MenuCancelled => {
                    debug!("双王回位，菜单关闭");
                    self.close_menu();
                }
                MoveOutput::KingLiftResign(color) => {
                    let resigning = side(color);
                    if self.players.get(resigning).can_resign() && self.menu.is_none() {
                        self.menu = Some(Menu::ResignConfirm { side: resigning });
                        self.beep(Sound::General);
                        self.status(format!("{resigning} resigns? TICK to confirm"));
                    }
                }
                other => self.present(other),
            }
        }
    }

    /// 只影响显示的输出
    fn present(&mut self, output: MoveOutput) {
        match output {
            MoveOutput::MoveRejected(reason) => self.status(format!("move rejected: {reason}")),
            MoveOutput::CorrectionEntered { reason, .. } => {
                self.emit(GameEvent::CorrectionEntered { reason });
            }
            MoveOutput::CorrectionGuidance(guidance) => self.show_guidance(&guidance),
            MoveOutput::CorrectionExited => {
                self.emit(GameEvent::CorrectionExited);
                self.leds_off();
                self.show_pending();
            }
            MoveOutput::CastlingArmed(castle) => debug!("易位待定: {:?}", castle),
            MoveOutput::KingLifted(color) => debug!("{:?} 王离盘", color),
            MoveOutput::Sound(sound) => self.beep(sound),
            MoveOutput::MoveAccepted(_)
            | MoveOutput::TakebackDetected
            | MoveOutput::LateCastle(_)
            | MoveOutput::NewGameRequested
            | MoveOutput::KingsInCenter
            | MoveOutput::MenuCancelled
            | MoveOutput::KingLiftResign(_) => {}
        }
    }

    // ========================================================================
    // 局面变化
    // ========================================================================

    async fn begin(&mut self) {
        self.history.clear();
        self.over = None;
        self.menu = None;
        self.state.reset(self.board.occupancy());

        let fen = to_fen(&self.position);
        self.game_id = match &self.store {
            Some(store) => {
                let white = self.players.get(Side::White).name();
                let black = self.players.get(Side::Black).name();
                match store.start_game(&white, &black, &fen).await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!("无法记录新对局: {:#}", e);
                        None
                    }
                }
            }
            None => None,
        };
        self.publish(fen.clone()).await;
        self.emit(GameEvent::NewGame { fen });

        self.leds_off();
        if self.state.physical() != occupancy(&self.position) {
            let pos = self.position.clone();
            for output in self.state.force_correction(&pos, "board differs from game") {
                self.present(output);
            }
        }
        self.announce_turn();
    }

    async fn commit(&mut self, mv: Move) {
        let before = self.position.clone();
        let after = match before.clone().play(&mv) {
            Ok(after) => after,
            Err(e) => {
                warn!("无法应用走法 {}: {}", to_uci(&mv), e);
                return;
            }
        };
        let uci = to_uci(&mv);
        let san = to_san(&before, &mv);
        let fen = to_fen(&after);
        info!("走法 {} ({})", san, uci);

        self.history.push((before.clone(), mv.clone()));
        self.position = after;
        self.players.clear_pending();
        self.menu = None;
        if !self.state.in_correction() {
            self.leds_off();
        }
        self.beep(Sound::General);

        if let (Some(store), Some(id)) = (&self.store, self.game_id) {
            if let Err(e) = store
                .record_move(id, self.history.len() as i64, &uci, &fen)
                .await
            {
                warn!("无法记录走法: {:#}", e);
            }
        }
        self.publish(fen.clone()).await;
        self.emit(GameEvent::MoveAccepted { uci, san, fen });
        self.players.on_move_made(&before, &mv).await;

        if let Some((result, termination)) = outcome(&self.position) {
            self.finish(result, termination).await;
            return;
        }
        self.announce_turn();
    }

    async fn takeback(&mut self) {
        if self.has_remote_service() {
            warn!("在线对局不支持棋盘悔棋");
            let pos = self.position.clone();
            let outputs = self.state.force_correction(&pos, "takeback not allowed online");
            for output in outputs {
                self.present(output);
            }
            return;
        }
        let Some((before, mv)) = self.history.pop() else {
            return;
        };
        info!("悔棋: {}", to_uci(&mv));
        self.position = before;
        self.players.clear_pending();
        if let (Some(store), Some(id)) = (&self.store, self.game_id) {
            if let Err(e) = store.takeback(id).await {
                warn!("无法删除走法记录: {:#}", e);
            }
        }
        let fen = to_fen(&self.position);
        self.publish(fen.clone()).await;
        self.emit(GameEvent::Takeback { fen });
        self.leds_off();
        self.announce_turn();
    }

    /// 车先走、王再补走易位：撤回车的走法，易位按正常走法交给当前玩家
    async fn undo_for_castle(&mut self, castle: &Move) -> bool {
        let legal = self
            .history
            .last()
            .is_some_and(|(before, _)| before.is_legal(castle));
        if !legal || self.has_remote_service() {
            warn!("无法补走易位 {}", to_uci(castle));
            let pos = self.position.clone();
            for output in self.state.force_correction(&pos, "castling not possible") {
                self.present(output);
            }
            return false;
        }
        info!("车先行后补走易位 {}", to_uci(castle));
        self.takeback().await;
        true
    }

    async fn new_game(&mut self, fen: Option<String>) {
        if self.over.is_none() && !self.history.is_empty() {
            self.store_result("*", "abandoned").await;
        }
        let position = match fen.as_deref().map(parse_fen) {
            Some(Ok(pos)) => pos,
            Some(Err(e)) => {
                warn!("新对局 FEN 无效: {}，使用初始局面", e);
                Chess::default()
            }
            None => Chess::default(),
        };
        info!("新对局");
        self.position = position;
        self.players.stop_all().await;
        if let Err(e) = self.players.start_all(&self.commands_tx).await {
            warn!("玩家重新启动失败: {}", e);
            self.status(format!("player failed to start: {e}"));
        }
        self.beep(Sound::General);
        self.begin().await;
    }

    async fn abort(&mut self) {
        if self.over.is_some() {
            return;
        }
        self.players.get_mut(Side::White).abort().await;
        self.players.get_mut(Side::Black).abort().await;
        self.finish("*".to_string(), "aborted".to_string()).await;
    }

    // ========================================================================
    // 菜单与终局
    // ========================================================================

    fn select(&mut self, choice: usize) {
        if let Some(Menu::KingsInCenter { choice: current }) = &mut self.menu {
            *current = choice;
            let label = MENU_CHOICES[choice].label();
            self.status(format!("menu: {label}"));
        }
    }

    fn close_menu(&mut self) {
        self.menu = None;
    }

    async fn menu_confirmed(&mut self, choice: MenuChoice) {
        let pos = self.position.clone();
        // 双王仍在中心，终局后不再纠正
        let _ = self.state.leave_menu(&pos);
        match choice {
            MenuChoice::Draw => {
                if self.has_remote_service() {
                    self.players.get_mut(Side::White).opponent_offered_draw().await;
                    self.players.get_mut(Side::Black).opponent_offered_draw().await;
                    self.status("draw offered".to_string());
                    let outputs = self.state.leave_menu(&pos);
                    self.apply(outputs).await;
                } else {
                    self.finish("1/2-1/2".to_string(), "agreement".to_string())
                        .await;
                }
            }
            MenuChoice::WhiteResigns => self.resign(Side::White).await,
            MenuChoice::BlackResigns => self.resign(Side::Black).await,
        }
    }

    async fn resign(&mut self, resigning: Side) {
        if self.over.is_some() {
            return;
        }
        if !self.players.get(resigning).can_resign() {
            self.status(format!("{resigning} cannot resign from the board"));
            let pos = self.position.clone();
            let outputs = self.state.leave_menu(&pos);
            self.apply(outputs).await;
            return;
        }
        info!("{} 认输", resigning);
        self.players
            .get_mut(resigning.opponent())
            .opponent_resigned()
            .await;
        self.finish(resign_result(resigning), "resignation".to_string())
            .await;
    }

    async fn finish(&mut self, result: String, termination: String) {
        info!("对局结束: {} ({})", result, termination);
        self.menu = None;
        self.players.clear_pending();
        self.store_result(&result, &termination).await;
        self.over = Some((result.clone(), termination.clone()));
        self.beep(Sound::General);
        self.emit(GameEvent::GameOver {
            result,
            termination,
        });
    }

    async fn store_result(&mut self, result: &str, termination: &str) {
        let (Some(store), Some(id)) = (&self.store, self.game_id) else {
            return;
        };
        let sans: Vec<String> = self
            .history
            .iter()
            .map(|(before, mv)| to_san(before, mv))
            .collect();
        let white = self.players.get(Side::White).name();
        let black = self.players.get(Side::Black).name();
        let initial_fen = self
            .history
            .first()
            .map(|(before, _)| to_fen(before))
            .unwrap_or_else(|| to_fen(&self.position));
        let pgn = build_pgn(
            &PgnInfo {
                white: &white,
                black: &black,
                initial_fen: &initial_fen,
                result,
                termination: Some(termination),
                time_control: self.time_control,
            },
            &sans,
        );
        if let Err(e) = store.finish_game(id, result, termination, &pgn).await {
            warn!("无法保存对局结果: {:#}", e);
        }
    }

    // ========================================================================
    // 客户端应用
    // ========================================================================

    async fn client_connected(&mut self, protocol: String) {
        if let Some(takeover) = &self.takeover {
            debug!("{} 已接管，忽略 {}", takeover.protocol, protocol);
            return;
        }
        let app_side = self.config.app_color;
        let mut app: Box<dyn Player> = Box::new(RemoteAppPlayer::new(protocol.clone()));
        if let Err(e) = app.start(app_side, self.commands_tx.clone()).await {
            warn!("客户端玩家启动失败: {}", e);
            return;
        }
        let mut saved = self.players.set_player(app_side, app);
        saved.set_pending(None);
        info!("{} 接管 {}", protocol, app_side);
        self.takeover = Some(Takeover {
            protocol: protocol.clone(),
            side: app_side,
            saved,
        });
        self.leds_off();
        self.emit(GameEvent::ClientConnected {
            protocol,
            side: app_side,
        });
        self.status("Connected".to_string());
    }

    async fn client_disconnected(&mut self, protocol: String) {
        if !self
            .takeover
            .as_ref()
            .is_some_and(|t| t.protocol == protocol)
        {
            debug!("未接管的客户端断开: {}", protocol);
            return;
        }
        let Some(takeover) = self.takeover.take() else {
            return;
        };
        let mut app = self.players.set_player(takeover.side, takeover.saved);
        app.stop().await;
        info!("{} 断开，恢复 {} 原玩家", protocol, takeover.side);
        self.emit(GameEvent::ClientDisconnected { protocol });
        if self.over.is_none() {
            self.players
                .get_mut(takeover.side)
                .on_turn(&self.position);
        }
    }

    // ========================================================================
    // 输出辅助
    // ========================================================================

    fn announce_turn(&mut self) {
        let fen = to_fen(&self.position);
        self.emit(GameEvent::Turn {
            side: side(self.position.turn()),
            fen,
        });
        self.players.on_turn(&self.position);
    }

    fn has_remote_service(&self) -> bool {
        [Side::White, Side::Black]
            .iter()
            .any(|&s| self.players.get(s).kind() == PlayerKind::RemoteService)
            || self
                .takeover
                .as_ref()
                .is_some_and(|t| t.saved.kind() == PlayerKind::RemoteService)
    }

    fn emit(&self, event: GameEvent) {
        let _ = self.events.send(event);
    }

    fn status(&self, message: String) {
        debug!("状态: {}", message);
        self.emit(GameEvent::Status { message });
    }

    async fn publish(&mut self, fen: String) {
        if let Some(log) = &self.fen_log {
            if let Err(e) = log.write(&fen).await {
                warn!("{:#}", e);
            }
        }
        self.position_tx.send_replace(fen);
    }

    fn show_pending(&self) {
        let Some(mv) = self.players.pending(&self.position) else {
            return;
        };
        let Some(from) = mv.from() else {
            return;
        };
        let to = crate::position::destination(mv, self.position.turn());
        self.board_result(
            "led_from_to",
            self.board
                .led_from_to(index(from), index(to), self.config.intensity),
        );
    }

    fn show_guidance(&self, guidance: &Guidance) {
        for instruction in &guidance.instructions {
            debug!("纠正: {}", instruction);
        }
        let result = match &guidance.hint {
            LedHint::None => self.board.leds_off(),
            LedHint::FromTo { from, to } => {
                self.board.led_from_to(*from, *to, self.config.intensity)
            }
            LedHint::Squares(squares) => {
                self.board
                    .led_array(squares, DEFAULT_SPEED, self.config.intensity)
            }
        };
        self.board_result("correction leds", result);
    }

    fn leds_off(&self) {
        self.board_result("leds_off", self.board.leds_off());
    }

    fn beep(&self, sound: Sound) {
        if self.config.sound {
            self.board_result("beep", self.board.beep(sound));
        }
    }

    /// 在阻塞线程上查询电量；上一次查询未结束时跳过
    fn check_board(&mut self) {
        if self
            .health_check
            .as_ref()
            .is_some_and(|check| !check.is_finished())
        {
            return;
        }
        let board = self.board.clone();
        let inputs = self.input_tx.clone();
        self.health_check = Some(tokio::task::spawn_blocking(move || match board.battery() {
            Ok(status) => debug!("棋盘电量 {}%", status.percent()),
            Err(ProtocolError::Timeout) => {
                warn!("棋盘电量查询超时");
                let _ = inputs.send(GameInput::BoardFault("battery poll timed out".to_string()));
            }
            Err(e) => warn!("棋盘电量查询失败: {}", e),
        }));
    }

    /// 棋盘命令超时转为链路故障输入
    fn board_result(&self, what: &str, result: centaur_protocol::Result<()>) {
        match result {
            Ok(()) => {}
            Err(ProtocolError::Timeout) => {
                warn!("棋盘命令 {} 超时", what);
                let _ = self
                    .input_tx
                    .send(GameInput::BoardFault(format!("{what} timed out")));
            }
            Err(e) => warn!("棋盘命令 {} 失败: {}", what, e),
        }
    }
}

fn resign_result(resigning: Side) -> String {
    match resigning {
        Side::White => "0-1".to_string(),
        Side::Black => "1-0".to_string(),
    }
}
