//! 对局存储
//!
//! 包含:
//! - SQLite 对局库（每局一行，逐步记录走法，悔棋删除最后一步）
//! - PGN 生成
//! - FEN 日志（每步后写入，启动时读取以恢复局面）

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::position::STARTING_FEN;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS games (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        white TEXT NOT NULL,
        black TEXT NOT NULL,
        result TEXT,
        termination TEXT,
        pgn TEXT,
        initial_fen TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS game_moves (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        game_id INTEGER NOT NULL REFERENCES games(id),
        ply INTEGER NOT NULL,
        uci TEXT NOT NULL,
        fen TEXT NOT NULL
    );",
];

/// 已存储的走法
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMove {
    pub ply: i64,
    pub uci: String,
    pub fen: String,
}

/// 已存储的对局
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredGame {
    pub id: i64,
    pub white: String,
    pub black: String,
    pub result: Option<String>,
    pub termination: Option<String>,
    pub pgn: Option<String>,
    pub initial_fen: String,
}

/// 对局库
#[derive(Clone)]
pub struct GameStore {
    pool: SqlitePool,
}

impl GameStore {
    /// 打开（必要时创建）数据库文件
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("无法创建目录 {}", dir.display()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .with_context(|| format!("无法打开数据库 {}", path.display()))?;
        let store = Self { pool };
        store.init().await?;
        info!("对局库: {}", path.display());
        Ok(store)
    }

    /// 内存数据库
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("无法创建内存数据库")?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("无法初始化数据库结构")?;
        }
        Ok(())
    }

    /// 新对局，返回对局 id
    pub async fn start_game(&self, white: &str, black: &str, initial_fen: &str) -> Result<i64> {
        let id = sqlx::query(
            "INSERT INTO games (started_at, white, black, initial_fen) VALUES ($1, $2, $3, $4)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(white)
        .bind(black)
        .bind(initial_fen)
        .execute(&self.pool)
        .await
        .context("无法创建对局记录")?
        .last_insert_rowid();
        debug!("对局记录 {}: {} vs {}", id, white, black);
        Ok(id)
    }

    pub async fn record_move(&self, game_id: i64, ply: i64, uci: &str, fen: &str) -> Result<()> {
        sqlx::query("INSERT INTO game_moves (game_id, ply, uci, fen) VALUES ($1, $2, $3, $4)")
            .bind(game_id)
            .bind(ply)
            .bind(uci)
            .bind(fen)
            .execute(&self.pool)
            .await
            .context("无法记录走法")?;
        Ok(())
    }

    /// 删除最后一步；没有走法时返回 false
    pub async fn takeback(&self, game_id: i64) -> Result<bool> {
        let deleted = sqlx::query(
            "DELETE FROM game_moves WHERE id = (
                SELECT id FROM game_moves WHERE game_id = $1 ORDER BY ply DESC, id DESC LIMIT 1
            )",
        )
        .bind(game_id)
        .execute(&self.pool)
        .await
        .context("无法删除走法")?
        .rows_affected();
        Ok(deleted > 0)
    }

    pub async fn finish_game(
        &self,
        game_id: i64,
        result: &str,
        termination: &str,
        pgn: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE games SET ended_at = $1, result = $2, termination = $3, pgn = $4 WHERE id = $5",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(result)
        .bind(termination)
        .bind(pgn)
        .bind(game_id)
        .execute(&self.pool)
        .await
        .context("无法更新对局结果")?;
        info!("对局 {} 结束: {} ({})", game_id, result, termination);
        Ok(())
    }

    pub async fn moves(&self, game_id: i64) -> Result<Vec<StoredMove>> {
        let rows = sqlx::query("SELECT ply, uci, fen FROM game_moves WHERE game_id = $1 ORDER BY ply, id")
            .bind(game_id)
            .fetch_all(&self.pool)
            .await
            .context("无法读取走法")?;
        rows.iter()
            .map(|row| {
                Ok(StoredMove {
                    ply: row.try_get("ply")?,
                    uci: row.try_get("uci")?,
                    fen: row.try_get("fen")?,
                })
            })
            .collect()
    }

    pub async fn game(&self, game_id: i64) -> Result<Option<StoredGame>> {
        let row = sqlx::query(
            "SELECT id, white, black, result, termination, pgn, initial_fen FROM games WHERE id = $1",
        )
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await
        .context("无法读取对局")?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(StoredGame {
            id: row.try_get("id")?,
            white: row.try_get("white")?,
            black: row.try_get("black")?,
            result: row.try_get("result")?,
            termination: row.try_get("termination")?,
            pgn: row.try_get("pgn")?,
            initial_fen: row.try_get("initial_fen")?,
        }))
    }
}

// ============================================================================
// PGN
// ============================================================================

/// PGN 标签与着法
pub struct PgnInfo<'a> {
    pub white: &'a str,
    pub black: &'a str,
    pub initial_fen: &'a str,
    pub result: &'a str,
    pub termination: Option<&'a str>,
    /// 基础时间（秒）与加秒
    pub time_control: Option<(u32, u32)>,
}

/// 生成 PGN；`sans` 为 SAN 着法序列
pub fn build_pgn(info: &PgnInfo<'_>, sans: &[String]) -> String {
    let mut out = String::new();
    let date = Utc::now().format("%Y.%m.%d");
    for (tag, value) in [
        ("Event", "Centaur game".to_string()),
        ("Site", "DGT Centaur".to_string()),
        ("Date", date.to_string()),
        ("White", info.white.to_string()),
        ("Black", info.black.to_string()),
        ("Result", info.result.to_string()),
    ] {
        out.push_str(&format!("[{tag} \"{value}\"]\n"));
    }
    if let Some(termination) = info.termination {
        out.push_str(&format!("[Termination \"{termination}\"]\n"));
    }
    if let Some((limit, increment)) = info.time_control {
        out.push_str(&format!("[TimeControl \"{limit}+{increment}\"]\n"));
    }
    if info.initial_fen != STARTING_FEN {
        out.push_str("[SetUp \"1\"]\n");
        out.push_str(&format!("[FEN \"{}\"]\n", info.initial_fen));
    }
    out.push('\n');

    let mut fields = info.initial_fen.split_whitespace().skip(1);
    let mut black_to_move = fields.next() == Some("b");
    let mut number: u32 = fields
        .nth(3)
        .and_then(|n| n.parse().ok())
        .unwrap_or(1);

    let mut tokens = Vec::with_capacity(sans.len() + sans.len() / 2 + 1);
    for (i, san) in sans.iter().enumerate() {
        if !black_to_move {
            tokens.push(format!("{number}."));
        } else if i == 0 {
            tokens.push(format!("{number}..."));
        }
        tokens.push(san.clone());
        if black_to_move {
            number += 1;
        }
        black_to_move = !black_to_move;
    }
    tokens.push(info.result.to_string());
    out.push_str(&tokens.join(" "));
    out.push('\n');
    out
}

// ============================================================================
// FEN 日志
// ============================================================================

/// 当前局面的单行 FEN 文件
#[derive(Clone, Debug)]
pub struct FenLog {
    path: PathBuf,
}

impl FenLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, fen: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.ok();
        }
        tokio::fs::write(&self.path, format!("{fen}\n"))
            .await
            .with_context(|| format!("无法写入 FEN 日志 {}", self.path.display()))
    }

    /// 读取上次保存的局面；文件不存在或为空时返回 `None`
    pub async fn read(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => {
                let fen = text.trim();
                (!fen.is_empty()).then(|| fen.to_string())
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("无法读取 FEN 日志: {}", e);
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_game_lifecycle() {
        let store = GameStore::in_memory().await.unwrap();
        let id = store.start_game("Alice", "Stockfish", STARTING_FEN).await.unwrap();
        store.record_move(id, 1, "e2e4", "fen1").await.unwrap();
        store.record_move(id, 2, "e7e5", "fen2").await.unwrap();
        assert_eq!(store.moves(id).await.unwrap().len(), 2);

        assert!(store.takeback(id).await.unwrap());
        let moves = store.moves(id).await.unwrap();
        assert_eq!(
            moves,
            vec![StoredMove {
                ply: 1,
                uci: "e2e4".into(),
                fen: "fen1".into()
            }]
        );

        store.finish_game(id, "1-0", "resign", "1. e4 1-0").await.unwrap();
        let game = store.game(id).await.unwrap().unwrap();
        assert_eq!(game.white, "Alice");
        assert_eq!(game.result.as_deref(), Some("1-0"));
        assert_eq!(game.termination.as_deref(), Some("resign"));
        assert!(store.game(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_takeback_without_moves() {
        let store = GameStore::in_memory().await.unwrap();
        let id = store.start_game("a", "b", STARTING_FEN).await.unwrap();
        assert!(!store.takeback(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db").join("games.db");
        let store = GameStore::open(&path).await.unwrap();
        let id = store.start_game("a", "b", STARTING_FEN).await.unwrap();
        assert_eq!(id, 1);
        assert!(path.exists());
    }

    #[test]
    fn test_pgn_numbering() {
        let info = PgnInfo {
            white: "Alice",
            black: "Bob",
            initial_fen: STARTING_FEN,
            result: "*",
            termination: None,
            time_control: None,
        };
        let pgn = build_pgn(&info, &["e4".into(), "e5".into(), "Nf3".into()]);
        assert!(pgn.contains("[White \"Alice\"]"));
        assert!(!pgn.contains("[FEN"));
        assert!(pgn.ends_with("1. e4 e5 2. Nf3 *\n"));
    }

    #[test]
    fn test_pgn_from_black_to_move() {
        let fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
        let info = PgnInfo {
            white: "a",
            black: "b",
            initial_fen: fen,
            result: "0-1",
            termination: Some("checkmate"),
            time_control: Some((300, 3)),
        };
        let pgn = build_pgn(&info, &["e5".into(), "Nf3".into()]);
        assert!(pgn.contains("[SetUp \"1\"]"));
        assert!(pgn.contains("[Termination \"checkmate\"]"));
        assert!(pgn.contains("[TimeControl \"300+3\"]"));
        assert!(pgn.ends_with("1... e5 2. Nf3 0-1\n"));
    }

    #[tokio::test]
    async fn test_fen_log_roundtrip() {
        let dir = TempDir::new().unwrap();
        let log = FenLog::new(dir.path().join("fen.log"));
        assert_eq!(log.read().await, None);
        log.write(STARTING_FEN).await.unwrap();
        assert_eq!(log.read().await.as_deref(), Some(STARTING_FEN));
    }
}
