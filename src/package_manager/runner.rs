//! 子进程执行：同步收集输出 / 流式逐行读取

use super::command::build_ps_command;
use super::parser::{sanitize_line, truncate_output};
use super::types::ProcessOutput;
use crate::error::RunError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// 执行外部命令的抽象，测试中用脚本化实现替换
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// 运行到结束（或超时），返回退出码和合并、清理、截断后的输出
    ///
    /// 输出保持原始字节顺序，`\r` 在清理时去掉而不是当作换行。
    /// 超时会杀掉子进程并返回 `RunError::Timeout`，不返回部分输出。
    async fn run(&self, command: &str, timeout: Duration) -> Result<ProcessOutput, RunError>;

    /// 启动长时间运行的子进程，由调用方逐行读取
    async fn spawn(&self, command: &str) -> Result<Box<dyn RunningProcess>, RunError>;
}

/// 正在运行的子进程句柄，归单个请求独占
#[async_trait]
pub trait RunningProcess: Send {
    /// 下一行原始输出（stdout / stderr 按到达顺序合并）；输出结束返回 `None`
    async fn next_line(&mut self) -> Option<String>;

    /// 等待退出；被信号杀死等拿不到退出码时返回 -1
    async fn wait(&mut self) -> Result<i32, RunError>;

    /// 强制终止（整个进程组）
    async fn kill(&mut self);
}

/// 通过 PowerShell 执行命令的生产实现
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    char_limit: usize,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>, char_limit: usize) -> Self {
        Self {
            shell: shell.into(),
            char_limit,
        }
    }

    fn spawn_child(&self, command: &str) -> Result<Child, RunError> {
        let argv = build_ps_command(&self.shell, command);
        log::debug!("执行命令: {}", command);

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // 独立进程组，方便统一杀死 shell 及其派生的安装程序
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        cmd.spawn().map_err(|source| RunError::Spawn {
            program: self.shell.clone(),
            source,
        })
    }

    fn spawn_process(&self, command: &str) -> Result<ShellProcess, RunError> {
        let mut child = self.spawn_child(command)?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_stream_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_stream_lines(stderr, tx));
        }

        Ok(ShellProcess {
            pid: child.id(),
            child,
            lines: rx,
        })
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, command: &str, timeout: Duration) -> Result<ProcessOutput, RunError> {
        let mut child = self.spawn_child(command)?;
        let pid = child.id();

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_stream_chunks(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_stream_chunks(stderr, tx));
        }

        let collected = tokio::time::timeout(timeout, async {
            let mut raw = Vec::new();
            while let Some(chunk) = rx.recv().await {
                raw.extend_from_slice(&chunk);
            }
            let status = child.wait().await?;
            Ok::<_, RunError>((status.code().unwrap_or(-1), raw))
        })
        .await;

        match collected {
            Ok(Ok((exit_code, raw))) => {
                let output = sanitize_line(&String::from_utf8_lossy(&raw));
                Ok(ProcessOutput {
                    exit_code,
                    output: truncate_output(output.trim_end(), self.char_limit),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                log::warn!("命令超时（{:?}），终止进程: {}", timeout, command);
                kill_process_group(pid, &mut child);
                let _ = child.wait().await;
                Err(RunError::Timeout(timeout))
            }
        }
    }

    async fn spawn(&self, command: &str) -> Result<Box<dyn RunningProcess>, RunError> {
        Ok(Box::new(self.spawn_process(command)?))
    }
}

struct ShellProcess {
    child: Child,
    pid: Option<u32>,
    lines: mpsc::UnboundedReceiver<String>,
}

impl ShellProcess {
    fn kill_group(&mut self) {
        kill_process_group(self.pid, &mut self.child);
    }
}

fn kill_process_group(pid: Option<u32>, child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
    let _ = child.start_kill();
}

#[async_trait]
impl RunningProcess for ShellProcess {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    async fn wait(&mut self) -> Result<i32, RunError> {
        let status = self.child.wait().await?;
        self.pid = None;
        Ok(status.code().unwrap_or(-1))
    }

    async fn kill(&mut self) {
        self.kill_group();
    }
}

impl Drop for ShellProcess {
    fn drop(&mut self) {
        // 请求被丢弃（例如客户端断开）时不留下孤儿进程
        if matches!(self.child.try_wait(), Ok(None)) {
            self.kill_group();
        }
    }
}

/// 从流中读取行并发送到 channel
///
/// `\n` 和 `\r` 都视为行结束：winget 的进度条通过 `\r` 就地刷新，每次刷新都要单独送出。
async fn read_stream_lines<R>(mut reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; 1024];
    let mut line = Vec::new();

    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::debug!("读取子进程输出中断: {}", e);
                break;
            }
        };
        for &b in &buffer[..n] {
            if b == b'\n' || b == b'\r' {
                if !line.is_empty() && tx.send(String::from_utf8_lossy(&line).into_owned()).is_err() {
                    return;
                }
                line.clear();
            } else {
                line.push(b);
            }
        }
    }
    if !line.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&line).into_owned());
    }
}

/// 按到达顺序转发原始字节块，同步执行时拼接成完整输出
async fn read_stream_chunks<R>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; 4096];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buffer[..n].to_vec()).is_err() {
                    return;
                }
            }
            Err(e) => {
                log::debug!("读取子进程输出中断: {}", e);
                break;
            }
        }
    }
}
