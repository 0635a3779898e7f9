//! 物理棋盘状态机
//!
//! 按到达顺序消费棋子事件，结合当前局面与当前玩家的待走走法，
//! 产出走法、纠正、易位、手势等输出。每个事件的处理是同步且有界的。
//!
//! 状态:
//! - `Idle`: 等待拿起
//! - `OneLifted`: 己方一枚棋子离盘
//! - `Castling`: 王与车同时离盘，等待二者落到易位格（顺序不限）
//! - `Correction`: 物理占位与期望不符
//! - `Menu`: 双王入中心手势触发的菜单
//!
//! 车单独走到易位格时先作为普通走法接受；若对方未动而王随即走到易位格，
//! 输出 `LateCastle`，由协调器撤回车的走法并改为易位。

use std::time::{Duration, Instant};

use centaur_protocol::{Occupancy, PieceEvent, PieceEventKind, Sound, KING_LIFT_RESIGN};
use shakmaty::{Board, CastlingSide, Chess, Color, Move, Piece, Position, Role, Square};
use tracing::{debug, info, warn};

use crate::correction::{self, Guidance};
use crate::position::{capture_square, destination, index, occupancy, square, to_uci, vacated};

/// 中心四格 d4 e4 d5 e5
const CENTER: [u8; 4] = [27, 28, 35, 36];

/// 状态机输出
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MoveOutput {
    /// 形成了一步合法走法
    MoveAccepted(Move),
    MoveRejected(String),
    CorrectionEntered { expected: Occupancy, reason: String },
    CorrectionGuidance(Guidance),
    CorrectionExited,
    CastlingArmed(CastlingSide),
    /// 上一步车已走到易位格，王随即补走易位；上一步应被替换为该易位
    LateCastle(Move),
    KingsInCenter,
    MenuCancelled,
    KingLifted(Color),
    KingLiftResign(Color),
    TakebackDetected,
    NewGameRequested,
    Sound(Sound),
}

/// 单次事件处理所需的只读上下文
#[derive(Clone, Copy)]
pub struct MoveContext<'a> {
    pub position: &'a Chess,
    /// 当前（非人类）玩家已决定的走法
    pub pending: Option<&'a Move>,
    /// 上一步之前的占位（悔棋检测）
    pub previous: Option<Occupancy>,
    pub game_over: bool,
    /// 尚未走过任何一步
    pub initial: bool,
}

impl<'a> MoveContext<'a> {
    pub fn new(position: &'a Chess) -> Self {
        Self {
            position,
            pending: None,
            previous: None,
            game_over: false,
            initial: true,
        }
    }
}

/// 升变棋子选择
pub trait PromotionChooser: Send {
    fn choose(&mut self, from: Square, to: Square, options: &[Role]) -> Role;
}

/// 总是升后
pub struct AlwaysQueen;

impl PromotionChooser for AlwaysQueen {
    fn choose(&mut self, _from: Square, _to: Square, _options: &[Role]) -> Role {
        Role::Queen
    }
}

/// 状态机配置
#[derive(Clone, Debug)]
pub struct MoveConfig {
    /// 双王入中心手势
    pub kings_in_center: bool,
    /// 王离盘多久视为认输；`None` 关闭
    pub king_lift_resign: Option<Duration>,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            kings_in_center: true,
            king_lift_resign: Some(KING_LIFT_RESIGN),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    OneLifted {
        source: Square,
        bump: Option<Square>,
        castle: Option<CastlingSide>,
    },
    Castling {
        side: CastlingSide,
        king_placed: bool,
        rook_placed: bool,
    },
    Correction {
        expected: Occupancy,
        board: Board,
    },
    Menu,
}

/// 车已走到易位格后可补走的易位
#[derive(Clone, Debug)]
struct LateCastle {
    color: Color,
    king: Square,
    king_to: Square,
    castle: Move,
    king_lifted: bool,
    /// 易位后的局面
    expected: Occupancy,
    board: Board,
}

/// 物理棋盘状态机
pub struct MoveState {
    config: MoveConfig,
    phase: Phase,
    physical: Occupancy,
    pre_lifted: Vec<Square>,
    /// 上一步之后被拿起过的方格
    touched: Occupancy,
    king_lift: Option<(Color, Instant)>,
    late: Option<LateCastle>,
    chooser: Box<dyn PromotionChooser>,
}

impl MoveState {
    pub fn new(config: MoveConfig, physical: Occupancy) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            physical,
            pre_lifted: Vec::new(),
            touched: Occupancy::EMPTY,
            king_lift: None,
            late: None,
            chooser: Box::new(AlwaysQueen),
        }
    }

    pub fn with_chooser(mut self, chooser: Box<dyn PromotionChooser>) -> Self {
        self.chooser = chooser;
        self
    }

    /// 由事件推导的物理占位
    pub fn physical(&self) -> Occupancy {
        self.physical
    }

    /// 用棋盘快照重新同步
    pub fn set_physical(&mut self, physical: Occupancy) {
        self.physical = physical;
    }

    pub fn in_correction(&self) -> bool {
        matches!(self.phase, Phase::Correction { .. })
    }

    pub fn in_menu(&self) -> bool {
        self.phase == Phase::Menu
    }

    /// 纠正模式下期望的占位
    pub fn expected(&self) -> Option<Occupancy> {
        match &self.phase {
            Phase::Correction { expected, .. } => Some(*expected),
            _ => None,
        }
    }

    /// 新对局
    pub fn reset(&mut self, physical: Occupancy) {
        self.phase = Phase::Idle;
        self.physical = physical;
        self.clear_transient();
    }

    fn clear_transient(&mut self) {
        self.pre_lifted.clear();
        self.touched = Occupancy::EMPTY;
        self.king_lift = None;
        self.late = None;
    }

    /// 处理一个棋子事件
    pub fn handle(&mut self, event: PieceEvent, ctx: &MoveContext<'_>) -> Vec<MoveOutput> {
        let sq = square(event.square);
        match event.kind {
            PieceEventKind::Lift => {
                self.physical.clear(event.square);
                self.touched.set(event.square);
            }
            PieceEventKind::Place => {
                self.physical.set(event.square);
                self.king_lift = None;
            }
        }
        debug!("棋子事件 {} -> 物理占位 {:?}", event, self.physical);

        let mut out = Vec::new();
        self.process(event.kind, sq, ctx, &mut out);
        out
    }

    /// 推进计时手势
    pub fn tick(&mut self, now: Instant) -> Vec<MoveOutput> {
        let (Some((color, since)), Some(limit)) = (self.king_lift, self.config.king_lift_resign)
        else {
            return Vec::new();
        };
        if now.saturating_duration_since(since) < limit {
            return Vec::new();
        }
        self.king_lift = None;
        info!("{:?} 王离盘超时，视为认输请求", color);
        vec![MoveOutput::KingLiftResign(color)]
    }

    /// 玩家拒绝了形成的走法：以当前局面为期望进入纠正
    pub fn reject(&mut self, pos: &Chess, reason: &str) -> Vec<MoveOutput> {
        let mut out = vec![MoveOutput::MoveRejected(reason.to_string())];
        self.enter_correction(occupancy(pos), pos.board().clone(), reason, &mut out);
        out
    }

    /// 外部触发纠正（棋盘无响应、局面被替换等）
    pub fn force_correction(&mut self, pos: &Chess, reason: &str) -> Vec<MoveOutput> {
        let mut out = Vec::new();
        self.enter_correction(occupancy(pos), pos.board().clone(), reason, &mut out);
        out
    }

    /// 结束菜单；棋盘与局面不符时进入纠正
    pub fn leave_menu(&mut self, pos: &Chess) -> Vec<MoveOutput> {
        self.phase = Phase::Idle;
        self.clear_transient();
        let mut out = Vec::new();
        if self.physical != occupancy(pos) {
            self.enter_correction(occupancy(pos), pos.board().clone(), "board differs from game", &mut out);
        }
        out
    }

    fn process(
        &mut self,
        kind: PieceEventKind,
        sq: Square,
        ctx: &MoveContext<'_>,
        out: &mut Vec<MoveOutput>,
    ) {
        let pos = ctx.position;

        if self.phase == Phase::Idle && self.late_castle_event(kind, sq, ctx, out) {
            return;
        }

        if kind == PieceEventKind::Place && self.phase != Phase::Menu {
            if self.kings_in_center(ctx) {
                info!("检测到双王入中心手势");
                self.phase = Phase::Menu;
                self.clear_transient();
                out.push(MoveOutput::KingsInCenter);
                return;
            }
            if let Some(pending) = ctx.pending {
                if self.pending_matches_board(pos, pending) {
                    if self.in_correction() {
                        out.push(MoveOutput::CorrectionExited);
                    }
                    info!("物理占位与待走走法 {} 结果一致，直接接受", to_uci(pending));
                    self.accept(pending.clone(), pos, out);
                    return;
                }
            }
        }

        match self.phase.clone() {
            Phase::Menu => {
                if self.physical == occupancy(pos) {
                    self.phase = Phase::Idle;
                    out.push(MoveOutput::MenuCancelled);
                }
            }
            Phase::Correction { expected, board } => {
                self.correction_event(expected, &board, ctx, out)
            }
            Phase::Idle => match kind {
                PieceEventKind::Lift => self.idle_lift(sq, ctx, out),
                PieceEventKind::Place => self.idle_place(sq, ctx, out),
            },
            Phase::OneLifted {
                source,
                bump,
                castle,
            } => match kind {
                PieceEventKind::Lift => self.one_lifted_lift(source, bump, sq, pos, out),
                PieceEventKind::Place => {
                    self.one_lifted_place(source, bump, castle, sq, ctx, out)
                }
            },
            Phase::Castling {
                side,
                king_placed,
                rook_placed,
            } => self.castling_event(side, king_placed, rook_placed, kind, sq, pos, out),
        }
    }

    // ========================================================================
    // Idle
    // ========================================================================

    fn idle_lift(&mut self, sq: Square, ctx: &MoveContext<'_>, out: &mut Vec<MoveOutput>) {
        let pos = ctx.position;
        let Some(piece) = pos.board().piece_at(sq) else {
            if self.physical != occupancy(pos) {
                self.correction_for(pos, "piece lifted from an empty square", out);
            }
            return;
        };

        if piece.role == Role::King {
            self.king_lift = Some((piece.color, Instant::now()));
            out.push(MoveOutput::KingLifted(piece.color));
        }

        if piece.color != pos.turn() {
            if can_be_captured(pos, sq) {
                debug!("预先拿起可被吃的棋子: {}", sq);
                if !self.pre_lifted.contains(&sq) {
                    self.pre_lifted.push(sq);
                }
            } else {
                self.correction_for(pos, "opponent piece lifted", out);
            }
            return;
        }

        let legal = pos.legal_moves();
        if !legal.iter().any(|m| m.from() == Some(sq)) {
            out.push(MoveOutput::Sound(Sound::WrongMove));
            self.correction_for(pos, "piece has no legal moves", out);
            return;
        }

        let castle = if piece.role == Role::Rook {
            legal.iter().find_map(|m| match m {
                Move::Castle { rook, .. } if *rook == sq => m.castling_side(),
                _ => None,
            })
        } else {
            None
        };
        if let Some(side) = castle {
            out.push(MoveOutput::CastlingArmed(side));
        }
        self.phase = Phase::OneLifted {
            source: sq,
            bump: None,
            castle,
        };
    }

    fn idle_place(&mut self, sq: Square, ctx: &MoveContext<'_>, out: &mut Vec<MoveOutput>) {
        let pos = ctx.position;
        if let Some(at) = self.pre_lifted.iter().position(|&s| s == sq) {
            self.pre_lifted.remove(at);
            return;
        }

        if let Some(pending) = ctx.pending {
            if self.recover_missed_lift(pos, pending, sq) {
                self.accept(pending.clone(), pos, out);
                return;
            }
        }

        let (_, extra) = self.physical.diff(occupancy(pos));
        if extra != Occupancy::EMPTY {
            self.correction_for(pos, "piece placed without a lift", out);
        } else {
            debug!("忽略无拿起的放下: {}", sq);
        }
    }

    /// 漏掉拿起事件：清除待走走法腾空的方格后与走后局面一致
    fn recover_missed_lift(&mut self, pos: &Chess, pending: &Move, sq: Square) -> bool {
        let turn = pos.turn();
        if destination(pending, turn) != sq {
            return false;
        }
        if let Some(from) = pending.from() {
            if self.touched.is_set(index(from)) {
                return false;
            }
        }
        if let Some(cap) = capture_square(pending) {
            if !self.touched.is_set(index(cap)) {
                return false;
            }
        }
        let Ok(post) = pos.clone().play(pending) else {
            return false;
        };
        let candidate = vacated(pending, turn)
            .into_iter()
            .fold(self.physical, |occ, s| occ.without(index(s)));
        if candidate != occupancy(&post) {
            return false;
        }
        info!("漏检拿起，按待走走法 {} 恢复", to_uci(pending));
        self.physical = candidate;
        true
    }

    fn pending_matches_board(&self, pos: &Chess, pending: &Move) -> bool {
        if let Some(cap) = capture_square(pending) {
            if !self.touched.is_set(index(cap)) {
                return false;
            }
        }
        match pos.clone().play(pending) {
            Ok(post) => self.physical == occupancy(&post),
            Err(_) => false,
        }
    }

    // ========================================================================
    // OneLifted
    // ========================================================================

    fn one_lifted_lift(
        &mut self,
        source: Square,
        bump: Option<Square>,
        sq: Square,
        pos: &Chess,
        out: &mut Vec<MoveOutput>,
    ) {
        if bump.is_some() {
            self.correction_for(pos, "two pieces lifted", out);
            return;
        }
        match pos.board().piece_at(sq) {
            Some(piece) if piece.color == pos.turn() => {
                if let Some(side) = castling_pair(pos, source, sq) {
                    debug!("王车同时离盘，等待易位: {:?}", side);
                    out.push(MoveOutput::CastlingArmed(side));
                    self.phase = Phase::Castling {
                        side,
                        king_placed: false,
                        rook_placed: false,
                    };
                    return;
                }
                debug!("碰到己方棋子 {}，等待放回", sq);
                if let Phase::OneLifted { bump, .. } = &mut self.phase {
                    *bump = Some(sq);
                }
            }
            Some(_) => {
                let captures = pos
                    .legal_moves()
                    .iter()
                    .any(|m| m.from() == Some(source) && capture_square(m) == Some(sq));
                if captures {
                    if !self.pre_lifted.contains(&sq) {
                        self.pre_lifted.push(sq);
                    }
                } else {
                    self.correction_for(pos, "lifted piece cannot be captured", out);
                }
            }
            None => self.correction_for(pos, "piece lifted from an empty square", out),
        }
    }

    fn one_lifted_place(
        &mut self,
        source: Square,
        bump: Option<Square>,
        castle: Option<CastlingSide>,
        sq: Square,
        ctx: &MoveContext<'_>,
        out: &mut Vec<MoveOutput>,
    ) {
        let pos = ctx.position;
        let turn = pos.turn();

        if let Some(bumped) = bump {
            if bumped == sq {
                if let Phase::OneLifted { bump, .. } = &mut self.phase {
                    *bump = None;
                }
            } else {
                self.correction_for(pos, "bumped piece moved", out);
            }
            return;
        }

        if sq == source {
            self.phase = Phase::Idle;
            return;
        }

        if let (Some(side), Some(pending)) = (castle, ctx.pending) {
            if sq == side.rook_to(turn) && pending.castling_side() == Some(side) {
                debug!("车先行，等待王完成待走易位");
                self.phase = Phase::Idle;
                return;
            }
        }

        let candidates: Vec<Move> = pos
            .legal_moves()
            .into_iter()
            .filter(|m| m.from() == Some(source) && destination(m, turn) == sq)
            .collect();
        if let Some(mv) = self.pick(candidates, ctx.pending, source, sq) {
            let late = castle
                .filter(|side| sq == side.rook_to(turn))
                .and_then(|side| late_castle(pos, side));
            self.accept(mv, pos, out);
            if self.phase == Phase::Idle {
                self.late = late;
            }
            return;
        }

        if ctx.previous == Some(self.physical) {
            info!("棋盘回到上一步之前的局面，识别为悔棋");
            self.phase = Phase::Idle;
            self.clear_transient();
            out.push(MoveOutput::TakebackDetected);
            return;
        }

        if let Some(pending) = ctx.pending {
            if self.recover_missed_lift(pos, pending, sq) {
                self.accept(pending.clone(), pos, out);
                return;
            }
        }

        out.push(MoveOutput::Sound(Sound::WrongMove));
        self.correction_for(pos, "illegal move", out);
    }

    /// 多个候选只可能是升变
    fn pick(
        &mut self,
        candidates: Vec<Move>,
        pending: Option<&Move>,
        from: Square,
        to: Square,
    ) -> Option<Move> {
        if candidates.len() <= 1 {
            return candidates.into_iter().next();
        }
        if let Some(p) = pending {
            if let Some(m) = candidates.iter().find(|m| *m == p) {
                return Some(m.clone());
            }
        }
        let options: Vec<Role> = candidates.iter().filter_map(|m| m.promotion()).collect();
        let role = self.chooser.choose(from, to, &options);
        candidates
            .iter()
            .find(|m| m.promotion() == Some(role))
            .or_else(|| candidates.first())
            .cloned()
    }

    // ========================================================================
    // 易位
    // ========================================================================

    /// 王与车同时离盘：两枚棋子都落到易位格后接受易位
    #[allow(clippy::too_many_arguments)]
    fn castling_event(
        &mut self,
        side: CastlingSide,
        king_placed: bool,
        rook_placed: bool,
        kind: PieceEventKind,
        sq: Square,
        pos: &Chess,
        out: &mut Vec<MoveOutput>,
    ) {
        let color = pos.turn();
        let Some((castle, king, corner)) = castle_move(pos, side) else {
            self.correction_for(pos, "castling no longer legal", out);
            return;
        };
        let king_to = side.king_to(color);
        let rook_to = side.rook_to(color);
        let untouched = !king_placed && !rook_placed;

        match kind {
            PieceEventKind::Place if sq == king_to && !king_placed => {
                if rook_placed {
                    self.accept(castle, pos, out);
                } else {
                    self.set_castling(side, true, rook_placed);
                }
            }
            PieceEventKind::Place if sq == rook_to && !rook_placed => {
                if king_placed {
                    self.accept(castle, pos, out);
                } else {
                    self.set_castling(side, king_placed, true);
                }
            }
            PieceEventKind::Place if sq == king && untouched => {
                debug!("王放回原位，车仍离盘");
                self.phase = Phase::OneLifted {
                    source: corner,
                    bump: None,
                    castle: Some(side),
                };
            }
            PieceEventKind::Place if sq == corner && untouched => {
                debug!("车放回原位，王仍离盘");
                self.phase = Phase::OneLifted {
                    source: king,
                    bump: None,
                    castle: None,
                };
            }
            PieceEventKind::Lift if sq == king_to && king_placed => {
                self.set_castling(side, false, rook_placed);
            }
            PieceEventKind::Lift if sq == rook_to && rook_placed => {
                self.set_castling(side, king_placed, false);
            }
            _ => self.correction_for(pos, "castling pieces misplaced", out),
        }
    }

    fn set_castling(&mut self, side: CastlingSide, king_placed: bool, rook_placed: bool) {
        self.phase = Phase::Castling {
            side,
            king_placed,
            rook_placed,
        };
    }

    /// 车的走法已接受、对方尚未行动时，王从原位走到易位格即补走易位
    ///
    /// 返回 `true` 表示事件已被消费。
    fn late_castle_event(
        &mut self,
        kind: PieceEventKind,
        sq: Square,
        ctx: &MoveContext<'_>,
        out: &mut Vec<MoveOutput>,
    ) -> bool {
        let Some(mut late) = self.late.take() else {
            return false;
        };
        let pos = ctx.position;
        let king = Piece {
            color: late.color,
            role: Role::King,
        };
        if pos.turn() == late.color || pos.board().piece_at(late.king) != Some(king) {
            return false;
        }

        match kind {
            PieceEventKind::Lift if sq == late.king && !late.king_lifted => {
                late.king_lifted = true;
                self.late = Some(late);
                true
            }
            PieceEventKind::Place if sq == late.king && late.king_lifted => {
                late.king_lifted = false;
                self.late = Some(late);
                true
            }
            PieceEventKind::Place if sq == late.king_to && late.king_lifted => {
                info!("王补走易位: {}", to_uci(&late.castle));
                self.clear_transient();
                out.push(MoveOutput::LateCastle(late.castle));
                if self.physical != late.expected {
                    self.enter_correction(
                        late.expected,
                        late.board,
                        "board differs from position after castling",
                        out,
                    );
                }
                true
            }
            _ => false,
        }
    }

    // ========================================================================
    // 接受与纠正
    // ========================================================================

    fn accept(&mut self, mv: Move, pos: &Chess, out: &mut Vec<MoveOutput>) {
        info!("形成走法: {}", to_uci(&mv));
        self.phase = Phase::Idle;
        self.clear_transient();
        let post = match pos.clone().play(&mv) {
            Ok(post) => post,
            Err(e) => {
                warn!("走法无法应用: {}", e);
                self.correction_for(pos, "move could not be applied", out);
                return;
            }
        };
        out.push(MoveOutput::MoveAccepted(mv));
        if self.physical != occupancy(&post) {
            self.enter_correction(
                occupancy(&post),
                post.board().clone(),
                "board differs from position after move",
                out,
            );
        }
    }

    fn correction_for(&mut self, pos: &Chess, reason: &str, out: &mut Vec<MoveOutput>) {
        self.enter_correction(occupancy(pos), pos.board().clone(), reason, out);
    }

    fn enter_correction(
        &mut self,
        expected: Occupancy,
        board: Board,
        reason: &str,
        out: &mut Vec<MoveOutput>,
    ) {
        let already = matches!(&self.phase, Phase::Correction { expected: e, .. } if *e == expected);
        let guidance = correction::guidance(self.physical, expected, Some(&board));
        if !already {
            warn!("进入纠正模式: {}", reason);
            self.pre_lifted.clear();
            self.phase = Phase::Correction { expected, board };
            out.push(MoveOutput::CorrectionEntered {
                expected,
                reason: reason.to_string(),
            });
        }
        out.push(MoveOutput::CorrectionGuidance(guidance));
    }

    fn correction_event(
        &mut self,
        expected: Occupancy,
        board: &Board,
        ctx: &MoveContext<'_>,
        out: &mut Vec<MoveOutput>,
    ) {
        if self.physical == expected {
            info!("棋盘已纠正");
            self.phase = Phase::Idle;
            self.clear_transient();
            out.push(MoveOutput::CorrectionExited);
            return;
        }
        if ctx.previous == Some(self.physical) {
            info!("纠正中棋盘回到上一步之前，识别为悔棋");
            self.phase = Phase::Idle;
            self.clear_transient();
            out.push(MoveOutput::CorrectionExited);
            out.push(MoveOutput::TakebackDetected);
            return;
        }
        if self.physical == Occupancy::STARTING && !ctx.initial {
            info!("棋盘摆回初始局面，请求新对局");
            self.phase = Phase::Idle;
            self.clear_transient();
            out.push(MoveOutput::CorrectionExited);
            out.push(MoveOutput::NewGameRequested);
            return;
        }
        out.push(MoveOutput::CorrectionGuidance(correction::guidance(
            self.physical,
            expected,
            Some(board),
        )));
    }

    fn kings_in_center(&self, ctx: &MoveContext<'_>) -> bool {
        if !self.config.kings_in_center || ctx.game_over {
            return false;
        }
        let board = ctx.position.board();
        let (Some(wk), Some(bk)) = (board.king_of(Color::White), board.king_of(Color::Black))
        else {
            return false;
        };
        if self.physical.is_set(index(wk)) || self.physical.is_set(index(bk)) {
            return false;
        }
        let logical = occupancy(ctx.position);
        CENTER
            .iter()
            .filter(|&&c| self.physical.is_set(c) && !logical.is_set(c))
            .count()
            >= 2
    }
}

/// 指定侧的合法易位及其王、车所在格
fn castle_move(pos: &Chess, side: CastlingSide) -> Option<(Move, Square, Square)> {
    pos.legal_moves().iter().find_map(|m| match m {
        Move::Castle { king, rook } if m.castling_side() == Some(side) => {
            Some((m.clone(), *king, *rook))
        }
        _ => None,
    })
}

/// 两枚离盘棋子恰为某一合法易位的王与车
fn castling_pair(pos: &Chess, a: Square, b: Square) -> Option<CastlingSide> {
    pos.legal_moves().iter().find_map(|m| match m {
        Move::Castle { king, rook }
            if (*king == a && *rook == b) || (*king == b && *rook == a) =>
        {
            m.castling_side()
        }
        _ => None,
    })
}

/// 车走到易位格之前的局面下，可在之后补走的易位
fn late_castle(pos: &Chess, side: CastlingSide) -> Option<LateCastle> {
    let (castle, king, _) = castle_move(pos, side)?;
    let after = pos.clone().play(&castle).ok()?;
    Some(LateCastle {
        color: pos.turn(),
        king,
        king_to: side.king_to(pos.turn()),
        castle,
        king_lifted: false,
        expected: occupancy(&after),
        board: after.board().clone(),
    })
}

/// 是否有合法走法能吃掉该格的棋子
fn can_be_captured(pos: &Chess, sq: Square) -> bool {
    pos.legal_moves()
        .iter()
        .any(|m| capture_square(m) == Some(sq))
}
