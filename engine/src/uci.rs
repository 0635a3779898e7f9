//! UCI 引擎子进程
//!
//! 通过 stdin/stdout 行协议与引擎通信。进程随 `UciEngine` 一起销毁。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};

/// 握手超时
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// 搜索超出思考时间后的宽限
pub const SEARCH_GRACE: Duration = Duration::from_secs(5);

/// 搜索结果中的 `bestmove`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BestMove {
    pub uci: String,
    pub ponder: Option<String>,
}

/// 引擎评分（走棋方视角）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Score {
    Centipawns(i32),
    Mate(i32),
}

/// 分析结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Analysis {
    pub depth: u32,
    pub score: Option<Score>,
    pub best: Option<String>,
}

/// 解析 `bestmove e2e4 [ponder e7e5]`
///
/// `bestmove (none)` 与 `0000` 返回 `None`。
pub fn parse_bestmove(line: &str) -> Option<BestMove> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "bestmove" {
        return None;
    }
    let uci = parts.next()?;
    if uci == "(none)" || uci == "0000" {
        return None;
    }
    let ponder = match (parts.next(), parts.next()) {
        (Some("ponder"), Some(p)) => Some(p.to_string()),
        _ => None,
    };
    Some(BestMove {
        uci: uci.to_string(),
        ponder,
    })
}

/// 解析 `info ... depth D ... score cp|mate N ... pv m1 ...`
pub fn parse_info(line: &str) -> Option<(u32, Option<Score>, Option<String>)> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "info" {
        return None;
    }
    let mut depth = None;
    let mut score = None;
    let mut pv = None;
    while let Some(token) = parts.next() {
        match token {
            "depth" => depth = parts.next().and_then(|d| d.parse().ok()),
            "score" => {
                score = match (parts.next(), parts.next().and_then(|v| v.parse().ok())) {
                    (Some("cp"), Some(v)) => Some(Score::Centipawns(v)),
                    (Some("mate"), Some(v)) => Some(Score::Mate(v)),
                    _ => None,
                }
            }
            "pv" => {
                pv = parts.next().map(str::to_string);
                break;
            }
            _ => {}
        }
    }
    Some((depth?, score, pv))
}

/// 运行中的 UCI 引擎
pub struct UciEngine {
    path: PathBuf,
    name: Option<String>,
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    applied: HashMap<String, String>,
}

impl UciEngine {
    /// 启动引擎并完成 `uci`/`uciok` 握手
    pub async fn spawn(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("启动 UCI 引擎: {}", path.display());

        let mut child = Command::new(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: path.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(EngineError::Closed)?;
        let stdout = child.stdout.take().ok_or(EngineError::Closed)?;

        let mut engine = Self {
            path,
            name: None,
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            applied: HashMap::new(),
        };

        engine.send("uci").await?;
        let mut name = None;
        timeout(HANDSHAKE_TIMEOUT, async {
            loop {
                let line = engine.read_line().await?;
                if let Some(n) = line.strip_prefix("id name ") {
                    name = Some(n.trim().to_string());
                }
                if line.trim() == "uciok" {
                    return Ok::<_, EngineError>(());
                }
            }
        })
        .await
        .map_err(|_| EngineError::Timeout("uciok"))??;

        engine.name = name;
        info!(
            "UCI 引擎就绪: {}",
            engine.name.as_deref().unwrap_or("<unnamed>")
        );
        Ok(engine)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 引擎在 `id name` 中报告的名称
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        debug!("UCI >> {}", command);
        self.stdin.write_all(command.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        match self.lines.next_line().await? {
            Some(line) => {
                debug!("UCI << {}", line);
                Ok(line)
            }
            None => Err(EngineError::Closed),
        }
    }

    /// `isready` / `readyok`
    pub async fn is_ready(&mut self) -> Result<()> {
        self.send("isready").await?;
        timeout(HANDSHAKE_TIMEOUT, async {
            loop {
                if self.read_line().await?.trim() == "readyok" {
                    return Ok::<_, EngineError>(());
                }
            }
        })
        .await
        .map_err(|_| EngineError::Timeout("readyok"))?
    }

    /// 设置选项；与上次设置相同的值不再重复发送
    pub async fn configure(&mut self, options: &HashMap<String, String>) -> Result<()> {
        let mut changed = false;
        for (name, value) in options {
            if self.applied.get(name) == Some(value) {
                continue;
            }
            self.send(&format!("setoption name {name} value {value}"))
                .await?;
            self.applied.insert(name.clone(), value.clone());
            changed = true;
        }
        if changed {
            self.is_ready().await?;
        }
        Ok(())
    }

    pub async fn new_game(&mut self) -> Result<()> {
        self.send("ucinewgame").await?;
        self.is_ready().await
    }

    /// 在给定局面上思考 `movetime` 后返回最佳走法
    pub async fn best_move(&mut self, fen: &str, movetime: Duration) -> Result<Option<BestMove>> {
        self.best_move_among(fen, movetime, &[]).await
    }

    /// 同 [`best_move`](Self::best_move)，但只在 `searchmoves` 中选择；为空时不限制
    pub async fn best_move_among(
        &mut self,
        fen: &str,
        movetime: Duration,
        searchmoves: &[String],
    ) -> Result<Option<BestMove>> {
        self.send(&format!("position fen {fen}")).await?;
        let mut go = format!("go movetime {}", movetime.as_millis());
        if !searchmoves.is_empty() {
            go.push_str(" searchmoves ");
            go.push_str(&searchmoves.join(" "));
        }
        self.send(&go).await?;

        let found = timeout(movetime + SEARCH_GRACE, async {
            loop {
                let line = self.read_line().await?;
                if line.starts_with("bestmove") {
                    return Ok::<_, EngineError>(parse_bestmove(&line));
                }
            }
        })
        .await;

        match found {
            Ok(result) => result,
            Err(_) => {
                warn!("引擎思考超时，发送 stop");
                self.stop_and_drain().await?;
                Err(EngineError::Timeout("bestmove"))
            }
        }
    }

    /// 搜索到指定深度，返回最后一条带评分的 info
    pub async fn analyse(&mut self, fen: &str, depth: u32) -> Result<Analysis> {
        self.send(&format!("position fen {fen}")).await?;
        self.send(&format!("go depth {depth}")).await?;

        let mut analysis = Analysis {
            depth: 0,
            score: None,
            best: None,
        };
        let result = timeout(HANDSHAKE_TIMEOUT + SEARCH_GRACE, async {
            loop {
                let line = self.read_line().await?;
                if let Some((d, score, pv)) = parse_info(&line) {
                    if score.is_some() {
                        analysis.depth = d;
                        analysis.score = score;
                    }
                    if pv.is_some() {
                        analysis.best = pv;
                    }
                } else if let Some(best) = parse_bestmove(&line) {
                    analysis.best = Some(best.uci);
                    return Ok::<_, EngineError>(());
                } else if line.starts_with("bestmove") {
                    return Ok(());
                }
            }
        })
        .await;

        match result {
            Ok(r) => r.map(|_| analysis),
            Err(_) => {
                self.stop_and_drain().await?;
                Err(EngineError::Timeout("analyse"))
            }
        }
    }

    async fn stop_and_drain(&mut self) -> Result<()> {
        self.send("stop").await?;
        timeout(SEARCH_GRACE, async {
            loop {
                if self.read_line().await?.starts_with("bestmove") {
                    return Ok::<_, EngineError>(());
                }
            }
        })
        .await
        .map_err(|_| EngineError::Timeout("stop"))?
    }

    /// 发送 `quit` 并等待退出；超时则强制结束
    pub async fn quit(mut self) -> Result<()> {
        self.send("quit").await?;
        if timeout(Duration::from_secs(2), self.child.wait()).await.is_err() {
            warn!("引擎未在限时内退出，强制结束: {}", self.path.display());
            self.child.start_kill()?;
        }
        Ok(())
    }
}

impl Drop for UciEngine {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            debug!("结束引擎进程: {}", self.path.display());
            let _ = self.child.start_kill();
        }
    }
}
