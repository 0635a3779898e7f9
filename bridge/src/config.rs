//! 桥接设置
//!
//! 从 `centaur.ini` 读取；文件缺失或值无效时使用默认值并记录警告。

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use centaur_emulators::Protocol;
use centaur_engine::OnlineConfig;
use centaur_protocol::{Side, DEFAULT_SERIAL_DEVICE, DEFAULT_TCP_PORT};
use ini::Ini;
use tracing::{info, warn};

use crate::player::{RemoteConfig, RemoteMode};

/// 覆盖配置文件路径的环境变量
pub const CONFIG_ENV: &str = "CENTAUR_CONFIG_PATH";

pub const DEFAULT_CONFIG_PATH: &str = "/opt/DGTCentaurMods/config/centaur.ini";

const DEFAULT_DATA_DIR: &str = "/opt/DGTCentaurMods";

/// 一方由谁来下
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerSetting {
    Human,
    Engine,
    /// Hand+Brain：引擎指定类型，人走
    HandBrain,
    /// Hand+Brain：人指定类型，引擎选走法
    HandBrainReverse,
    Online,
}

impl FromStr for PlayerSetting {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" => Ok(PlayerSetting::Human),
            "engine" => Ok(PlayerSetting::Engine),
            "handbrain" | "hand_brain" | "hand-brain" => Ok(PlayerSetting::HandBrain),
            "handbrain-reverse" | "hand_brain_reverse" | "hand-brain-reverse" => {
                Ok(PlayerSetting::HandBrainReverse)
            }
            "online" | "lichess" => Ok(PlayerSetting::Online),
            other => Err(format!("unknown player: {other}")),
        }
    }
}

impl fmt::Display for PlayerSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerSetting::Human => write!(f, "human"),
            PlayerSetting::Engine => write!(f, "engine"),
            PlayerSetting::HandBrain => write!(f, "handbrain"),
            PlayerSetting::HandBrainReverse => write!(f, "handbrain-reverse"),
            PlayerSetting::Online => write!(f, "online"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoardSettings {
    pub device: String,
    pub sound: bool,
    /// LED 亮度 1..=10
    pub intensity: u8,
    pub kings_in_center: bool,
    /// 0 表示关闭举王认输
    pub king_lift_resign_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BluetoothSettings {
    pub enabled: bool,
    /// BLE 广播的协议
    pub protocol: Protocol,
    pub rfcomm: bool,
    pub rfcomm_name: String,
    pub rfcomm_channel: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub path: PathBuf,
    /// 为空时在引擎旁查找 `<engine>.uci`
    pub profile: Option<PathBuf>,
    pub difficulty: String,
    pub think_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OnlineSettings {
    pub base_url: String,
    pub token: String,
    pub timeout_secs: u64,
    /// `ai` / `user` / `game`
    pub mode: String,
    pub level: u8,
    pub opponent: String,
    pub game_id: String,
    pub clock_limit: u32,
    pub clock_increment: u32,
    pub rated: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GameSettings {
    pub white: PlayerSetting,
    pub black: PlayerSetting,
    pub player_name: String,
    /// 客户端应用接管的一方
    pub app_color: Side,
    pub resume: bool,
    pub database: PathBuf,
    pub fen_log: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerSettings {
    pub tcp_enabled: bool,
    pub tcp_port: u16,
    /// 为空时自动识别
    pub protocol: Option<Protocol>,
}

/// 全部设置
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub board: BoardSettings,
    pub bluetooth: BluetoothSettings,
    pub engine: EngineSettings,
    pub online: OnlineSettings,
    pub game: GameSettings,
    pub server: ServerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let data = Path::new(DEFAULT_DATA_DIR);
        Self {
            board: BoardSettings {
                device: DEFAULT_SERIAL_DEVICE.to_string(),
                sound: true,
                intensity: 5,
                kings_in_center: true,
                king_lift_resign_secs: 3,
            },
            bluetooth: BluetoothSettings {
                enabled: false,
                protocol: Protocol::Millennium,
                rfcomm: true,
                rfcomm_name: "MILLENNIUM CHESS".to_string(),
                rfcomm_channel: 1,
            },
            engine: EngineSettings {
                path: data.join("engines").join("stockfish"),
                profile: None,
                difficulty: centaur_engine::profile::DEFAULT_SECTION.to_string(),
                think_secs: 5,
            },
            online: OnlineSettings {
                base_url: OnlineConfig::default().base_url,
                token: String::new(),
                timeout_secs: 30,
                mode: "ai".to_string(),
                level: 3,
                opponent: String::new(),
                game_id: String::new(),
                clock_limit: 600,
                clock_increment: 5,
                rated: false,
            },
            game: GameSettings {
                white: PlayerSetting::Human,
                black: PlayerSetting::Engine,
                player_name: "Player".to_string(),
                app_color: Side::Black,
                resume: true,
                database: data.join("db").join("centaur.db"),
                fen_log: data.join("tmp").join("fen.log"),
            },
            server: ServerSettings {
                tcp_enabled: true,
                tcp_port: DEFAULT_TCP_PORT,
                protocol: None,
            },
        }
    }
}

/// 逐项读取，无效值回退默认
struct Reader<'a> {
    ini: &'a Ini,
}

impl Reader<'_> {
    fn raw(&self, section: &str, key: &str) -> Option<&str> {
        self.ini
            .section(Some(section))
            .and_then(|props| props.get(key))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn string(&self, section: &str, key: &str, default: &str) -> String {
        self.raw(section, key).unwrap_or(default).to_string()
    }

    fn parse<T>(&self, section: &str, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.raw(section, key) {
            None => default,
            Some(value) => value.parse().unwrap_or_else(|e| {
                warn!("[{}] {} = {} 无效 ({})，使用默认值", section, key, value, e);
                default
            }),
        }
    }

    fn flag(&self, section: &str, key: &str, default: bool) -> bool {
        match self.raw(section, key).map(str::to_ascii_lowercase).as_deref() {
            None => default,
            Some("true" | "yes" | "on" | "1") => true,
            Some("false" | "no" | "off" | "0") => false,
            Some(other) => {
                warn!("[{}] {} = {} 不是布尔值，使用默认值", section, key, other);
                default
            }
        }
    }

    fn side(&self, section: &str, key: &str, default: Side) -> Side {
        match self.raw(section, key).map(str::to_ascii_lowercase).as_deref() {
            None => default,
            Some("white") => Side::White,
            Some("black") => Side::Black,
            Some(other) => {
                warn!("[{}] {} = {} 不是颜色，使用默认值", section, key, other);
                default
            }
        }
    }
}

impl Settings {
    /// 设置文件路径：环境变量 > 系统路径 > 用户配置目录
    pub fn settings_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        let system = PathBuf::from(DEFAULT_CONFIG_PATH);
        if system.exists() {
            return system;
        }
        dirs::config_dir()
            .map(|mut path| {
                path.push("centaur-bridge");
                path.push("centaur.ini");
                path
            })
            .unwrap_or(system)
    }

    /// 从默认位置加载
    pub fn load() -> Self {
        Self::load_from(&Self::settings_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!("设置文件 {} 不存在，使用默认设置", path.display());
            return Self::default();
        }
        match Ini::load_from_file(path) {
            Ok(ini) => {
                info!("已加载设置: {}", path.display());
                Self::from_ini(&ini)
            }
            Err(e) => {
                warn!("设置文件格式无效: {}，使用默认设置", e);
                Self::default()
            }
        }
    }

    pub fn from_ini(ini: &Ini) -> Self {
        let d = Self::default();
        let r = Reader { ini };
        Self {
            board: BoardSettings {
                device: r.string("board", "device", &d.board.device),
                sound: r.flag("board", "sound", d.board.sound),
                intensity: r.parse("board", "intensity", d.board.intensity).clamp(1, 10),
                kings_in_center: r.flag("board", "kings_in_center", d.board.kings_in_center),
                king_lift_resign_secs: r.parse(
                    "board",
                    "king_lift_resign_secs",
                    d.board.king_lift_resign_secs,
                ),
            },
            bluetooth: BluetoothSettings {
                enabled: r.flag("bluetooth", "enabled", d.bluetooth.enabled),
                protocol: r.parse("bluetooth", "protocol", d.bluetooth.protocol),
                rfcomm: r.flag("bluetooth", "rfcomm", d.bluetooth.rfcomm),
                rfcomm_name: r.string("bluetooth", "rfcomm_name", &d.bluetooth.rfcomm_name),
                rfcomm_channel: r.parse("bluetooth", "rfcomm_channel", d.bluetooth.rfcomm_channel),
            },
            engine: EngineSettings {
                path: r
                    .raw("engine", "path")
                    .map(PathBuf::from)
                    .unwrap_or(d.engine.path),
                profile: r.raw("engine", "profile").map(PathBuf::from),
                difficulty: r.string("engine", "difficulty", &d.engine.difficulty),
                think_secs: r.parse("engine", "think_secs", d.engine.think_secs).max(1),
            },
            online: OnlineSettings {
                base_url: r.string("online", "base_url", &d.online.base_url),
                token: r.string("online", "token", &d.online.token),
                timeout_secs: r.parse("online", "timeout_secs", d.online.timeout_secs),
                mode: r.string("online", "mode", &d.online.mode),
                level: r.parse("online", "level", d.online.level).clamp(1, 8),
                opponent: r.string("online", "opponent", &d.online.opponent),
                game_id: r.string("online", "game_id", &d.online.game_id),
                clock_limit: r.parse("online", "clock_limit", d.online.clock_limit),
                clock_increment: r.parse("online", "clock_increment", d.online.clock_increment),
                rated: r.flag("online", "rated", d.online.rated),
            },
            game: GameSettings {
                white: r.parse("game", "white", d.game.white),
                black: r.parse("game", "black", d.game.black),
                player_name: r.string("game", "player_name", &d.game.player_name),
                app_color: r.side("game", "app_color", d.game.app_color),
                resume: r.flag("game", "resume", d.game.resume),
                database: r
                    .raw("game", "database")
                    .map(PathBuf::from)
                    .unwrap_or(d.game.database),
                fen_log: r
                    .raw("game", "fen_log")
                    .map(PathBuf::from)
                    .unwrap_or(d.game.fen_log),
            },
            server: ServerSettings {
                tcp_enabled: r.flag("server", "tcp_enabled", d.server.tcp_enabled),
                tcp_port: r.parse("server", "tcp_port", d.server.tcp_port),
                protocol: match r.raw("server", "protocol") {
                    None | Some("auto") => None,
                    Some(value) => value.parse().map(Some).unwrap_or_else(|e| {
                        warn!("[server] protocol = {} 无效 ({})，使用自动识别", value, e);
                        None
                    }),
                },
            },
        }
    }

    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        ini.with_section(Some("board"))
            .set("device", self.board.device.as_str())
            .set("sound", self.board.sound.to_string())
            .set("intensity", self.board.intensity.to_string())
            .set("kings_in_center", self.board.kings_in_center.to_string())
            .set("king_lift_resign_secs", self.board.king_lift_resign_secs.to_string());
        ini.with_section(Some("bluetooth"))
            .set("enabled", self.bluetooth.enabled.to_string())
            .set("protocol", self.bluetooth.protocol.to_string())
            .set("rfcomm", self.bluetooth.rfcomm.to_string())
            .set("rfcomm_name", self.bluetooth.rfcomm_name.as_str())
            .set("rfcomm_channel", self.bluetooth.rfcomm_channel.to_string());
        ini.with_section(Some("engine"))
            .set("path", self.engine.path.to_string_lossy())
            .set(
                "profile",
                self.engine
                    .profile
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )
            .set("difficulty", self.engine.difficulty.as_str())
            .set("think_secs", self.engine.think_secs.to_string());
        ini.with_section(Some("online"))
            .set("base_url", self.online.base_url.as_str())
            .set("token", self.online.token.as_str())
            .set("timeout_secs", self.online.timeout_secs.to_string())
            .set("mode", self.online.mode.as_str())
            .set("level", self.online.level.to_string())
            .set("opponent", self.online.opponent.as_str())
            .set("game_id", self.online.game_id.as_str())
            .set("clock_limit", self.online.clock_limit.to_string())
            .set("clock_increment", self.online.clock_increment.to_string())
            .set("rated", self.online.rated.to_string());
        ini.with_section(Some("game"))
            .set("white", self.game.white.to_string())
            .set("black", self.game.black.to_string())
            .set("player_name", self.game.player_name.as_str())
            .set("app_color", self.game.app_color.to_string())
            .set("resume", self.game.resume.to_string())
            .set("database", self.game.database.to_string_lossy())
            .set("fen_log", self.game.fen_log.to_string_lossy());
        ini.with_section(Some("server"))
            .set("tcp_enabled", self.server.tcp_enabled.to_string())
            .set("tcp_port", self.server.tcp_port.to_string())
            .set(
                "protocol",
                self.server
                    .protocol
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "auto".to_string()),
            );
        ini
    }

    /// 写回默认位置
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("无法创建配置目录 {}", parent.display()))?;
        }
        self.to_ini()
            .write_to_file(path)
            .with_context(|| format!("写入设置文件失败: {}", path.display()))?;
        info!("设置已保存: {}", path.display());
        Ok(())
    }

    // ========================================================================
    // 派生配置
    // ========================================================================

    /// 举王认输时长；0 关闭
    pub fn king_lift_resign(&self) -> Option<Duration> {
        (self.board.king_lift_resign_secs > 0)
            .then(|| Duration::from_secs(self.board.king_lift_resign_secs))
    }

    pub fn online_config(&self) -> OnlineConfig {
        OnlineConfig {
            base_url: self.online.base_url.clone(),
            token: self.online.token.clone(),
            timeout_secs: self.online.timeout_secs,
        }
    }

    /// 在线对局参数；`mode` 无效时回退到 AI 挑战
    pub fn remote_config(&self) -> RemoteConfig {
        let mode = match self.online.mode.to_ascii_lowercase().as_str() {
            "user" if !self.online.opponent.is_empty() => RemoteMode::User {
                name: self.online.opponent.clone(),
            },
            "game" if !self.online.game_id.is_empty() => RemoteMode::Game {
                id: self.online.game_id.clone(),
            },
            "ai" => RemoteMode::Ai {
                level: self.online.level,
            },
            other => {
                warn!("在线模式 '{}' 缺少参数，改为 AI 挑战", other);
                RemoteMode::Ai {
                    level: self.online.level,
                }
            }
        };
        RemoteConfig {
            mode,
            clock: (self.online.clock_limit > 0)
                .then_some((self.online.clock_limit, self.online.clock_increment)),
            rated: self.online.rated,
        }
    }
}
