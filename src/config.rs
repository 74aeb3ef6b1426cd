use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::package_manager::Timeouts;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_path: PathBuf,
    pub static_dir: PathBuf,
    /// 执行命令用的 PowerShell 程序（`powershell` 或 `pwsh`）
    pub shell: String,
    pub log_char_limit: usize,
    pub install_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub launch_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            data_path: PathBuf::from("data").join("apps.json"),
            static_dir: PathBuf::from("static"),
            shell: "powershell".to_string(),
            log_char_limit: 12_000,
            install_timeout_secs: 900,
            probe_timeout_secs: 120,
            launch_timeout_secs: 30,
        }
    }
}

impl Config {
    /// 配置文件路径：`WINGET_PANEL_CONFIG` > `~/.config/winget-panel/config.toml`
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("WINGET_PANEL_CONFIG") {
            return PathBuf::from(path);
        }
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".config/winget-panel/config.toml")
    }

    /// 优先级：环境变量 > 配置文件 > 默认值
    pub fn load_or_default() -> Result<Self> {
        let mut config = Self::load_from(&Self::default_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("WINGET_PANEL_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("WINGET_PANEL_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("WINGET_PANEL_PORT 不是合法端口: {}", port))?;
        }
        if let Some(data) = lookup("WINGET_PANEL_DATA") {
            self.data_path = PathBuf::from(data);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.shell.trim().is_empty() {
            bail!("shell 不能为空");
        }
        if self.log_char_limit == 0 {
            bail!("log_char_limit 必须大于 0");
        }
        if self.install_timeout_secs == 0
            || self.probe_timeout_secs == 0
            || self.launch_timeout_secs == 0
        {
            bail!("超时时间必须大于 0");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            install: Duration::from_secs(self.install_timeout_secs),
            probe: Duration::from_secs(self.probe_timeout_secs),
            launch: Duration::from_secs(self.launch_timeout_secs),
        }
    }
}
