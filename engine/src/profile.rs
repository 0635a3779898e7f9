//! `.uci` 引擎选项配置
//!
//! 每个难度一个 INI 节，节内键值即 UCI 选项；`Description` 为说明，不发送。
//! 请求的节不存在时回退到 `DEFAULT` 节。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ini::Ini;
use tracing::{info, warn};

use crate::error::{EngineError, Result};

/// 不属于 UCI 选项的元数据键
const METADATA_KEYS: &[&str] = &["Description"];

/// 回退节名
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// 单个难度节
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileSection {
    pub name: String,
    pub description: Option<String>,
    pub options: HashMap<String, String>,
}

/// 一个引擎的全部难度配置
#[derive(Clone, Debug, Default)]
pub struct UciProfile {
    sections: Vec<ProfileSection>,
}

impl UciProfile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ini = Ini::load_from_file(path)
            .map_err(|e| EngineError::Profile(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_ini(&ini))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let ini = Ini::load_from_str(text).map_err(|e| EngineError::Profile(e.to_string()))?;
        Ok(Self::from_ini(&ini))
    }

    fn from_ini(ini: &Ini) -> Self {
        let sections = ini
            .iter()
            .filter_map(|(name, props)| {
                let name = name?;
                let mut description = None;
                let mut options = HashMap::new();
                for (key, value) in props.iter() {
                    if METADATA_KEYS.contains(&key) {
                        description = Some(value.to_string());
                    } else {
                        options.insert(key.to_string(), value.to_string());
                    }
                }
                Some(ProfileSection {
                    name: name.to_string(),
                    description,
                    options,
                })
            })
            .collect();
        Self { sections }
    }

    /// 难度节名称（文件顺序）
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    pub fn section(&self, name: &str) -> Option<&ProfileSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// 指定难度要发送的选项
    pub fn options_for(&self, name: &str) -> HashMap<String, String> {
        if let Some(section) = self.section(name) {
            info!("使用引擎难度配置: {}", name);
            return section.options.clone();
        }
        warn!("难度配置 '{}' 不存在，回退到 {}", name, DEFAULT_SECTION);
        self.section(DEFAULT_SECTION)
            .map(|s| s.options.clone())
            .unwrap_or_default()
    }
}

/// 在候选目录中查找 `<engine>.uci`
pub fn locate(engine_name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|d| d.join(format!("{engine_name}.uci")))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[DEFAULT]
Skill Level = 20

[1350]
Description = Club player
UCI_LimitStrength = true
UCI_Elo = 1350

[2000]
UCI_LimitStrength = true
UCI_Elo = 2000
";

    #[test]
    fn test_sections_in_file_order() {
        let profile = UciProfile::parse(SAMPLE).unwrap();
        assert_eq!(
            profile.section_names().collect::<Vec<_>>(),
            vec!["DEFAULT", "1350", "2000"]
        );
        assert_eq!(
            profile.section("1350").unwrap().description.as_deref(),
            Some("Club player")
        );
    }

    #[test]
    fn test_only_listed_options() {
        let profile = UciProfile::parse(SAMPLE).unwrap();
        let options = profile.options_for("1350");
        assert_eq!(options.len(), 2);
        assert_eq!(options["UCI_Elo"], "1350");
        assert!(!options.contains_key("Description"));
        assert!(!options.contains_key("Skill Level"));
    }

    #[test]
    fn test_missing_section_falls_back() {
        let profile = UciProfile::parse(SAMPLE).unwrap();
        let options = profile.options_for("3000");
        assert_eq!(options.len(), 1);
        assert_eq!(options["Skill Level"], "20");
        assert!(UciProfile::default().options_for("x").is_empty());
    }

    #[test]
    fn test_locate_and_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stockfish.uci"), SAMPLE).unwrap();
        let dirs = vec![PathBuf::from("/nonexistent"), dir.path().to_path_buf()];
        let path = locate("stockfish", &dirs).unwrap();
        let profile = UciProfile::load(&path).unwrap();
        assert_eq!(profile.options_for("2000")["UCI_Elo"], "2000");
        assert!(locate("maia", &dirs).is_none());
    }
}
