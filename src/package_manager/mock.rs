//! 脚本化的 `ProcessRunner`，用于在没有 PowerShell / winget 的环境下测试

use super::runner::{ProcessRunner, RunningProcess};
use super::types::ProcessOutput;
use crate::error::RunError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Script {
    pattern: String,
    exit_code: i32,
    lines: Vec<String>,
    /// 输出完后一直不退出
    hang: bool,
    /// 进程无法启动
    spawn_error: bool,
}

#[derive(Default)]
struct Inner {
    scripts: Vec<Script>,
    calls: Vec<String>,
}

/// 按命令子串匹配预设输出；先注册的优先。未匹配的命令返回退出码 1、空输出。
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    inner: Arc<Mutex<Inner>>,
    kills: Arc<AtomicUsize>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 命令包含 `pattern` 时，以 `exit_code` 退出并输出 `output`
    pub fn on(&self, pattern: &str, exit_code: i32, output: &str) -> &Self {
        self.push(Script {
            pattern: pattern.to_string(),
            exit_code,
            lines: output.lines().map(str::to_string).collect(),
            hang: false,
            spawn_error: false,
        })
    }

    /// 输出 `output` 后永不退出；`run` 直接返回超时
    pub fn on_hang(&self, pattern: &str, output: &str) -> &Self {
        self.push(Script {
            pattern: pattern.to_string(),
            exit_code: -1,
            lines: output.lines().map(str::to_string).collect(),
            hang: true,
            spawn_error: false,
        })
    }

    /// 命令包含 `pattern` 时进程无法启动
    pub fn on_spawn_error(&self, pattern: &str) -> &Self {
        self.push(Script {
            pattern: pattern.to_string(),
            exit_code: -1,
            lines: Vec::new(),
            hang: false,
            spawn_error: true,
        })
    }

    /// 所有被执行过的命令（按调用顺序）
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// 被强制终止的进程数
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    fn push(&self, script: Script) -> &Self {
        self.lock().scripts.push(script);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn resolve(&self, command: &str) -> Script {
        let mut inner = self.lock();
        inner.calls.push(command.to_string());
        inner
            .scripts
            .iter()
            .find(|s| command.contains(&s.pattern))
            .cloned()
            .unwrap_or(Script {
                pattern: String::new(),
                exit_code: 1,
                lines: Vec::new(),
                hang: false,
                spawn_error: false,
            })
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, command: &str, timeout: Duration) -> Result<ProcessOutput, RunError> {
        let script = self.resolve(command);
        if script.spawn_error {
            return Err(spawn_error(command));
        }
        if script.hang {
            self.kills.fetch_add(1, Ordering::SeqCst);
            return Err(RunError::Timeout(timeout));
        }
        Ok(ProcessOutput {
            exit_code: script.exit_code,
            output: script.lines.join("\n"),
        })
    }

    async fn spawn(&self, command: &str) -> Result<Box<dyn RunningProcess>, RunError> {
        let script = self.resolve(command);
        if script.spawn_error {
            return Err(spawn_error(command));
        }
        Ok(Box::new(ScriptedProcess {
            lines: script.lines.into_iter().collect(),
            exit_code: script.exit_code,
            hang: script.hang,
            killed: false,
            kills: Arc::clone(&self.kills),
        }))
    }
}

fn spawn_error(command: &str) -> RunError {
    RunError::Spawn {
        program: command.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "program not found"),
    }
}

struct ScriptedProcess {
    lines: VecDeque<String>,
    exit_code: i32,
    hang: bool,
    killed: bool,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl RunningProcess for ScriptedProcess {
    async fn next_line(&mut self) -> Option<String> {
        if let Some(line) = self.lines.pop_front() {
            // 让出执行权，模拟逐行到达
            tokio::task::yield_now().await;
            return Some(line);
        }
        if self.hang && !self.killed {
            std::future::pending::<()>().await;
        }
        None
    }

    async fn wait(&mut self) -> Result<i32, RunError> {
        Ok(if self.killed { -1 } else { self.exit_code })
    }

    async fn kill(&mut self) {
        if !self.killed {
            self.killed = true;
            self.kills.fetch_add(1, Ordering::SeqCst);
        }
    }
}
