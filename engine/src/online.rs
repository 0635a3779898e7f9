//! 在线对弈服务客户端
//!
//! Lichess 兼容的 REST 接口 + NDJSON 事件流，使用 Bearer token 鉴权。

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[cfg(feature = "online")]
use anyhow::Context;
#[cfg(feature = "online")]
use tracing::{debug, info, warn};

/// 在线服务配置
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OnlineConfig {
    /// 服务地址，默认 https://lichess.org
    pub base_url: String,
    /// API token
    pub token: String,
    /// 普通请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for OnlineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://lichess.org".to_string(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

/// 账户信息
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub username: String,
}

/// 挑战参数
#[derive(Clone, Debug, Default)]
pub struct ChallengeRequest {
    /// 本地一方执色：`white` / `black` / `random`
    pub color: Option<String>,
    /// 基础时间（秒）与加秒
    pub clock: Option<(u32, u32)>,
    pub rated: bool,
    pub initial_fen: Option<String>,
}

impl ChallengeRequest {
    fn form(&self) -> Vec<(&'static str, String)> {
        let mut form = Vec::new();
        if let Some(color) = &self.color {
            form.push(("color", color.clone()));
        }
        if let Some((limit, increment)) = self.clock {
            form.push(("clock.limit", limit.to_string()));
            form.push(("clock.increment", increment.to_string()));
        }
        if self.rated {
            form.push(("rated", "true".to_string()));
        }
        if let Some(fen) = &self.initial_fen {
            form.push(("fen", fen.clone()));
        }
        form
    }
}

/// 事件流中的对局方
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamPlayer {
    pub id: Option<String>,
    pub name: Option<String>,
    pub rating: Option<u32>,
    pub ai_level: Option<u8>,
}

/// 对局状态
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct GameState {
    /// 空格分隔的 UCI 走法序列
    #[serde(default)]
    pub moves: String,
    pub status: String,
    pub winner: Option<String>,
    #[serde(default)]
    pub wdraw: bool,
    #[serde(default)]
    pub bdraw: bool,
    #[serde(default)]
    pub wtakeback: bool,
    #[serde(default)]
    pub btakeback: bool,
}

impl GameState {
    pub fn move_list(&self) -> Vec<&str> {
        self.moves.split_whitespace().collect()
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.status.as_str(), "created" | "started")
    }
}

/// 完整对局信息
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameFull {
    pub id: String,
    pub white: StreamPlayer,
    pub black: StreamPlayer,
    pub initial_fen: String,
    pub state: GameState,
}

/// 对局事件流中的一行
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GameStreamEvent {
    GameFull(GameFull),
    GameState(GameState),
    ChatLine { username: String, text: String },
    OpponentGone { gone: bool },
    #[serde(other)]
    Unknown,
}

/// 解析一行 NDJSON；空行是保活
pub fn parse_stream_line(line: &str) -> Result<Option<GameStreamEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

/// 将字节块切分为完整行
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }
}

/// 在线服务客户端
#[cfg(feature = "online")]
pub struct OnlineClient {
    config: OnlineConfig,
    client: reqwest::Client,
    /// 事件流不设总超时
    stream_client: reqwest::Client,
}

#[cfg(feature = "online")]
impl OnlineClient {
    pub fn new(config: OnlineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        let stream_client = reqwest::Client::builder()
            .build()
            .context("Failed to create streaming HTTP client")?;
        Ok(Self {
            config,
            client,
            stream_client,
        })
    }

    pub fn config(&self) -> &OnlineConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, form: &[(&'static str, String)]) -> Result<serde_json::Value> {
        let url = self.url(path);
        debug!("POST {}", url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .form(form)
            .send()
            .await
            .with_context(|| format!("请求失败: {url}"))?;
        let status = resp.status();
        let body = resp.text().await.context("Failed to read response body")?;
        if !status.is_success() {
            anyhow::bail!("服务返回错误状态 {}: {}", status, body);
        }
        Ok(serde_json::from_str(&body).unwrap_or(serde_json::Value::Null))
    }

    /// `GET /api/account`
    pub async fn account(&self) -> Result<Account> {
        let account = self
            .client
            .get(self.url("/api/account"))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .context("无法连接在线服务")?
            .error_for_status()
            .context("账户请求被拒绝")?
            .json()
            .await
            .context("Failed to parse account response")?;
        Ok(account)
    }

    /// `POST /api/challenge/ai`，返回对局 ID
    pub async fn challenge_ai(&self, level: u8, request: &ChallengeRequest) -> Result<String> {
        let mut form = request.form();
        form.push(("level", level.clamp(1, 8).to_string()));
        let value = self.post("/api/challenge/ai", &form).await?;
        let id = value["id"]
            .as_str()
            .context("挑战响应缺少 id")?
            .to_string();
        info!("已创建 AI 对局: {}", id);
        Ok(id)
    }

    /// `POST /api/challenge/{user}`，返回挑战 ID
    pub async fn challenge_user(&self, user: &str, request: &ChallengeRequest) -> Result<String> {
        let value = self
            .post(&format!("/api/challenge/{user}"), &request.form())
            .await?;
        let id = value["challenge"]["id"]
            .as_str()
            .or_else(|| value["id"].as_str())
            .context("挑战响应缺少 id")?
            .to_string();
        info!("已向 {} 发起挑战: {}", user, id);
        Ok(id)
    }

    /// 订阅 `GET /api/board/game/stream/{id}`；流结束或出错时通道关闭
    pub async fn stream_game(&self, game_id: &str) -> Result<mpsc::Receiver<GameStreamEvent>> {
        let url = self.url(&format!("/api/board/game/stream/{game_id}"));
        let mut resp = self
            .stream_client
            .get(&url)
            .bearer_auth(&self.config.token)
            .send()
            .await
            .with_context(|| format!("无法打开事件流: {url}"))?
            .error_for_status()
            .context("事件流被拒绝")?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut buffer = LineBuffer::default();
            loop {
                let chunk = match resp.chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => {
                        info!("事件流结束");
                        break;
                    }
                    Err(e) => {
                        warn!("事件流读取失败: {}", e);
                        break;
                    }
                };
                for line in buffer.push(&chunk) {
                    match parse_stream_line(&line) {
                        Ok(Some(event)) => {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("无法解析事件: {} ({})", line, e),
                    }
                }
            }
        });
        Ok(rx)
    }

    pub async fn make_move(&self, game_id: &str, uci: &str) -> Result<()> {
        self.post(&format!("/api/board/game/{game_id}/move/{uci}"), &[])
            .await
            .map(|_| ())
    }

    pub async fn resign(&self, game_id: &str) -> Result<()> {
        self.post(&format!("/api/board/game/{game_id}/resign"), &[])
            .await
            .map(|_| ())
    }

    pub async fn abort(&self, game_id: &str) -> Result<()> {
        self.post(&format!("/api/board/game/{game_id}/abort"), &[])
            .await
            .map(|_| ())
    }

    /// 提和或回应和棋
    pub async fn draw(&self, game_id: &str, accept: bool) -> Result<()> {
        let answer = if accept { "yes" } else { "no" };
        self.post(&format!("/api/board/game/{game_id}/draw/{answer}"), &[])
            .await
            .map(|_| ())
    }

    /// 请求或回应悔棋
    pub async fn takeback(&self, game_id: &str, accept: bool) -> Result<()> {
        let answer = if accept { "yes" } else { "no" };
        self.post(&format!("/api/board/game/{game_id}/takeback/{answer}"), &[])
            .await
            .map(|_| ())
    }
}

/// 未启用 online feature 时的占位实现
#[cfg(not(feature = "online"))]
pub struct OnlineClient {
    _config: OnlineConfig,
}

#[cfg(not(feature = "online"))]
impl OnlineClient {
    pub fn new(config: OnlineConfig) -> Result<Self> {
        Ok(Self { _config: config })
    }

    pub fn config(&self) -> &OnlineConfig {
        &self._config
    }

    pub async fn account(&self) -> Result<Account> {
        anyhow::bail!("Online feature not enabled. Compile with --features online")
    }

    pub async fn challenge_ai(&self, _level: u8, _request: &ChallengeRequest) -> Result<String> {
        anyhow::bail!("Online feature not enabled. Compile with --features online")
    }

    pub async fn challenge_user(&self, _user: &str, _request: &ChallengeRequest) -> Result<String> {
        anyhow::bail!("Online feature not enabled. Compile with --features online")
    }

    pub async fn stream_game(&self, _game_id: &str) -> Result<mpsc::Receiver<GameStreamEvent>> {
        anyhow::bail!("Online feature not enabled. Compile with --features online")
    }

    pub async fn make_move(&self, _game_id: &str, _uci: &str) -> Result<()> {
        anyhow::bail!("Online feature not enabled. Compile with --features online")
    }

    pub async fn resign(&self, _game_id: &str) -> Result<()> {
        anyhow::bail!("Online feature not enabled. Compile with --features online")
    }

    pub async fn abort(&self, _game_id: &str) -> Result<()> {
        anyhow::bail!("Online feature not enabled. Compile with --features online")
    }

    pub async fn draw(&self, _game_id: &str, _accept: bool) -> Result<()> {
        anyhow::bail!("Online feature not enabled. Compile with --features online")
    }

    pub async fn takeback(&self, _game_id: &str, _accept: bool) -> Result<()> {
        anyhow::bail!("Online feature not enabled. Compile with --features online")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OnlineConfig::default();
        assert_eq!(config.base_url, "https://lichess.org");
        assert!(config.token.is_empty());
    }

    #[test]
    fn test_parse_game_full() {
        let line = r#"{"type":"gameFull","id":"abc123","rated":false,
            "white":{"id":"me","name":"Me","rating":1500},
            "black":{"aiLevel":3},
            "initialFen":"startpos",
            "state":{"type":"gameState","moves":"e2e4 e7e5","wtime":600000,"status":"started"}}"#
            .replace('\n', "");
        let event = parse_stream_line(&line).unwrap().unwrap();
        let GameStreamEvent::GameFull(full) = event else {
            panic!("expected gameFull");
        };
        assert_eq!(full.id, "abc123");
        assert_eq!(full.black.ai_level, Some(3));
        assert_eq!(full.state.move_list(), vec!["e2e4", "e7e5"]);
        assert!(!full.state.is_finished());
    }

    #[test]
    fn test_parse_state_and_others() {
        let state = parse_stream_line(
            r#"{"type":"gameState","moves":"e2e4","status":"resign","winner":"black","wdraw":true}"#,
        )
        .unwrap()
        .unwrap();
        match state {
            GameStreamEvent::GameState(s) => {
                assert!(s.is_finished());
                assert_eq!(s.winner.as_deref(), Some("black"));
                assert!(s.wdraw && !s.bdraw);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(parse_stream_line("   ").unwrap(), None);
        assert_eq!(
            parse_stream_line(r#"{"type":"opponentGone","gone":true}"#).unwrap(),
            Some(GameStreamEvent::OpponentGone { gone: true })
        );
        assert_eq!(
            parse_stream_line(r#"{"type":"somethingNew"}"#).unwrap(),
            Some(GameStreamEvent::Unknown)
        );
        assert!(parse_stream_line("{not json").is_err());
    }

    #[test]
    fn test_line_buffer_splits_chunks() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"{\"a\":").is_empty());
        assert_eq!(buf.push(b"1}\n\n{\"b\""), vec!["{\"a\":1}".to_string(), String::new()]);
        assert_eq!(buf.push(b":2}\n"), vec!["{\"b\":2}".to_string()]);
    }

    #[test]
    fn test_challenge_form() {
        let request = ChallengeRequest {
            color: Some("white".into()),
            clock: Some((600, 5)),
            rated: false,
            initial_fen: None,
        };
        assert_eq!(
            request.form(),
            vec![
                ("color", "white".to_string()),
                ("clock.limit", "600".to_string()),
                ("clock.increment", "5".to_string()),
            ]
        );
    }

    #[cfg(not(feature = "online"))]
    #[tokio::test]
    async fn test_placeholder_reports_disabled_feature() {
        let client = OnlineClient::new(OnlineConfig::default()).unwrap();
        let err = client.account().await.unwrap_err();
        assert!(err.to_string().contains("--features online"));
    }
}
