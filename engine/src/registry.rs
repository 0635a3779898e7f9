//! 共享引擎注册表
//!
//! 同一可执行文件（规范化路径）只启动一个进程，由所有使用者共享。
//! `EngineHandle` 克隆即获取，析构即释放；最后一个句柄析构时进程被结束。
//! 对单个引擎的访问通过异步互斥锁串行化。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::uci::{Analysis, BestMove, UciEngine};

struct SharedEngine {
    path: PathBuf,
    engine: Mutex<UciEngine>,
}

impl Drop for SharedEngine {
    fn drop(&mut self) {
        info!("释放引擎: {}", self.path.display());
    }
}

/// 共享引擎句柄
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<SharedEngine>,
}

impl EngineHandle {
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// 当前存活的句柄数
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// 设置选项（串行化）
    pub async fn configure(&self, options: &HashMap<String, String>) -> Result<()> {
        if options.is_empty() {
            return Ok(());
        }
        self.shared.engine.lock().await.configure(options).await
    }

    /// 计算最佳走法（串行化），可在搜索前应用选项
    pub async fn play(
        &self,
        fen: &str,
        movetime: Duration,
        options: Option<&HashMap<String, String>>,
    ) -> Result<Option<BestMove>> {
        self.play_among(fen, movetime, options, &[]).await
    }

    /// 只在 `searchmoves` 中选择最佳走法（串行化）
    pub async fn play_among(
        &self,
        fen: &str,
        movetime: Duration,
        options: Option<&HashMap<String, String>>,
        searchmoves: &[String],
    ) -> Result<Option<BestMove>> {
        let mut engine = self.shared.engine.lock().await;
        if let Some(options) = options {
            engine.configure(options).await?;
        }
        engine.best_move_among(fen, movetime, searchmoves).await
    }

    /// 分析局面（串行化）
    pub async fn analyse(&self, fen: &str, depth: u32) -> Result<Analysis> {
        self.shared.engine.lock().await.analyse(fen, depth).await
    }

    pub async fn new_game(&self) -> Result<()> {
        self.shared.engine.lock().await.new_game().await
    }
}

/// 引擎注册表
#[derive(Default)]
pub struct EngineRegistry {
    engines: Mutex<HashMap<PathBuf, Weak<SharedEngine>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析符号链接，使指向同一文件的路径共享进程
    fn canonicalize(path: &Path) -> PathBuf {
        std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    /// 获取句柄，必要时启动引擎
    pub async fn acquire(&self, path: impl AsRef<Path>) -> Result<EngineHandle> {
        let resolved = Self::canonicalize(path.as_ref());
        let mut engines = self.engines.lock().await;

        if let Some(shared) = engines.get(&resolved).and_then(Weak::upgrade) {
            debug!(
                "复用引擎 {} (refs={})",
                resolved.display(),
                Arc::strong_count(&shared) + 1
            );
            return Ok(EngineHandle { shared });
        }

        let engine = UciEngine::spawn(&resolved).await?;
        let shared = Arc::new(SharedEngine {
            path: resolved.clone(),
            engine: Mutex::new(engine),
        });
        engines.insert(resolved.clone(), Arc::downgrade(&shared));
        info!("引擎已加载: {}", resolved.display());
        Ok(EngineHandle { shared })
    }

    /// 已加载引擎及其句柄数
    pub async fn loaded(&self) -> HashMap<PathBuf, usize> {
        let mut engines = self.engines.lock().await;
        engines.retain(|_, weak| weak.strong_count() > 0);
        engines
            .iter()
            .map(|(path, weak)| (path.clone(), weak.strong_count()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uci::testing::fake_engine;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    #[tokio::test]
    async fn test_same_path_shares_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_engine(&dir, "g1f3");
        let registry = EngineRegistry::new();

        let a = registry.acquire(&path).await.unwrap();
        let b = registry.acquire(&path).await.unwrap();
        assert_eq!(a.ref_count(), 2);
        let c = a.clone();
        assert_eq!(c.ref_count(), 3);

        let best = b.play(START, Duration::from_millis(20), None).await.unwrap();
        assert_eq!(best.unwrap().uci, "g1f3");

        drop(a);
        drop(b);
        assert_eq!(registry.loaded().await.values().copied().collect::<Vec<_>>(), vec![1]);
        drop(c);
        assert!(registry.loaded().await.is_empty());
    }

    #[tokio::test]
    async fn test_reload_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_engine(&dir, "e2e4");
        let registry = EngineRegistry::new();
        drop(registry.acquire(&path).await.unwrap());
        let again = registry.acquire(&path).await.unwrap();
        assert_eq!(again.ref_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_play_is_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_engine(&dir, "d2d4");
        let registry = EngineRegistry::new();
        let a = registry.acquire(&path).await.unwrap();
        let b = a.clone();
        let opts = HashMap::from([("Skill Level".to_string(), "1".to_string())]);
        let (ra, rb) = tokio::join!(
            a.play(START, Duration::from_millis(10), Some(&opts)),
            b.play(START, Duration::from_millis(10), None)
        );
        assert_eq!(ra.unwrap().unwrap().uci, "d2d4");
        assert_eq!(rb.unwrap().unwrap().uci, "d2d4");
    }
}
