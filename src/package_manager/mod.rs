//! 包管理器模块：经由 PowerShell 调用 winget

pub mod command;
pub mod mock;
pub mod parser;
pub mod probe;
pub mod runner;
pub mod signals;
pub mod streaming;
pub mod types;

// 重新导出常用类型和函数
pub use probe::{is_installed, ProbeMatcher};
pub use runner::{ProcessRunner, RunningProcess, ShellRunner};
pub use streaming::{stream_install, InstallEvent, InstallRun, StreamSettings};
pub use types::{OpenOutcome, ProbeSignal, ProcessOutput, Verdict, VersionInfo};

use crate::error::RunError;
use crate::store::AppEntry;
use command::ps_quote;
use parser::{
    detect_source, extract_package_id, is_update_available, parse_installed_version,
    parse_latest_version,
};
use std::sync::Arc;
use std::time::Duration;

/// 版本无法确定时的占位
pub const UNKNOWN_VERSION: &str = "unknown";

/// 各类命令的超时设置
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub install: Duration,
    pub probe: Duration,
    pub launch: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            install: Duration::from_secs(900),
            probe: Duration::from_secs(120),
            launch: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct PackageManager {
    runner: Arc<dyn ProcessRunner>,
    timeouts: Timeouts,
}

impl PackageManager {
    pub fn new(runner: Arc<dyn ProcessRunner>, timeouts: Timeouts) -> Self {
        Self { runner, timeouts }
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// 同步执行安装命令并判定结果
    ///
    /// 超时以错误形式返回，由调用方决定如何呈现。
    pub async fn install(&self, app: &AppEntry) -> Result<(Verdict, ProcessOutput), RunError> {
        log::info!("安装 #{} {}", app.id, app.name);
        let output = self.runner.run(&app.command, self.timeouts.install).await?;
        let verdict = Verdict::from_run(output.exit_code, &output.output);
        log::info!(
            "安装 #{} 结束: {:?} (exit={})",
            app.id,
            verdict,
            output.exit_code
        );
        Ok((verdict, output))
    }

    /// 依次执行探测命令，判断应用当前是否已安装
    ///
    /// 单条探测失败或超时只会跳到下一条，不会向上报错。
    pub async fn check_installed(&self, app: &AppEntry) -> bool {
        let package_id = extract_package_id(&app.command);
        if package_id.is_empty() && app.name.trim().is_empty() {
            return false;
        }

        let matcher = ProbeMatcher::for_app(app);
        let source = detect_source(&app.command);

        for cmd in probe::probe_commands(&package_id, &app.name, source) {
            let output = match self.runner.run(&cmd, self.timeouts.probe).await {
                Ok(output) => output,
                Err(e) => {
                    log::warn!("探测命令失败，跳过: {} ({})", cmd, e);
                    continue;
                }
            };
            match matcher.classify(&output.output) {
                ProbeSignal::Installed => {
                    log::debug!("#{} {} 已安装（{}）", app.id, app.name, cmd);
                    return true;
                }
                ProbeSignal::Absent | ProbeSignal::Inconclusive => continue,
            }
        }
        false
    }

    /// 查询当前安装版本和最新可用版本
    pub async fn versions(&self, app: &AppEntry) -> Result<VersionInfo, RunError> {
        let mut package_id = extract_package_id(&app.command);
        if package_id.is_empty() {
            package_id = app.name.clone();
        }
        let source = detect_source(&app.command);

        let list = self
            .runner
            .run(
                format!("winget list --id {} --exact {}", package_id, source).trim(),
                self.timeouts.probe,
            )
            .await?;
        let current = if list.success() {
            parse_installed_version(&list.output, &package_id)
        } else {
            None
        };

        let show = self
            .runner
            .run(
                format!("winget show --id {} --exact {}", package_id, source).trim(),
                self.timeouts.probe,
            )
            .await?;
        let latest = parse_latest_version(&show.output);

        let update_available = match (&current, &latest) {
            (Some(cur), Some(lat)) => is_update_available(cur, lat),
            _ => false,
        };

        Ok(VersionInfo {
            current_version: current.unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
            latest_version: latest.unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
            update_available,
        })
    }

    /// 按名称模糊查找商店应用的 Package Family Name
    pub async fn find_package_family(&self, app_name: &str) -> Option<String> {
        let pattern: String = app_name.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        if pattern.is_empty() {
            return None;
        }
        let cmd = format!(
            "(Get-AppxPackage -Name '*{}*' | Select-Object -First 1).PackageFamilyName",
            pattern
        );
        match self.runner.run(&cmd, self.timeouts.launch).await {
            Ok(output) if output.success() => output
                .output
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string),
            Ok(_) => None,
            Err(e) => {
                log::warn!("查找 Package Family Name 失败: {}", e);
                None
            }
        }
    }

    /// 尽力打开应用：先用 `launch`（或名称）直接启动，失败再按 Package Family Name 启动
    ///
    /// 没有可用的启动目标时返回 `None`。
    pub async fn open(&self, app: &AppEntry) -> Result<Option<OpenOutcome>, RunError> {
        let Some(target) = launch_target(app) else {
            return Ok(None);
        };

        let first = self
            .runner
            .run(&format!("Start-Process {}", ps_quote(target)), self.timeouts.launch)
            .await?;
        if first.success() {
            return Ok(Some(OpenOutcome {
                status: Verdict::Ok,
                exit_code: first.exit_code,
                output: first.output,
                pfn: None,
            }));
        }

        let pfn = match app.pfn.as_deref().filter(|p| !p.is_empty()) {
            Some(pfn) => Some(pfn.to_string()),
            None => self.find_package_family(&app.name).await,
        };
        let Some(pfn) = pfn else {
            return Ok(Some(OpenOutcome {
                status: Verdict::Error,
                exit_code: first.exit_code,
                output: first.output,
                pfn: None,
            }));
        };

        log::info!("直接启动失败，改用 Package Family Name: {}", pfn);
        let fallback = self
            .runner
            .run(
                &format!(
                    "Start-Process {}",
                    ps_quote(&format!("shell:AppsFolder\\{}!App", pfn))
                ),
                self.timeouts.launch,
            )
            .await?;
        let status = if fallback.success() {
            Verdict::Ok
        } else {
            Verdict::Error
        };
        let output = if fallback.output.is_empty() {
            first.output
        } else {
            fallback.output
        };
        Ok(Some(OpenOutcome {
            status,
            exit_code: fallback.exit_code,
            output,
            pfn: Some(pfn),
        }))
    }
}

/// 启动目标：优先 `launch`，否则用应用名
pub fn launch_target(app: &AppEntry) -> Option<&str> {
    [app.launch.trim(), app.name.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
}
