//! 流式安装：逐行读取子进程输出，推送 start / progress / log / truncate / done 事件

use super::parser::{parse_progress, sanitize_line, TRUNCATION_MARKER};
use super::runner::{ProcessRunner, RunningProcess};
use super::types::Verdict;
use crate::store::{AppEntry, AppsStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// 单次安装推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InstallEvent {
    Start {
        app: AppEntry,
        started_at: DateTime<Utc>,
    },
    Progress {
        progress: u8,
    },
    Log {
        line: String,
    },
    Truncate {
        limit: usize,
    },
    Done {
        status: Verdict,
        exit_code: i32,
        output: String,
        app: AppEntry,
        timed_out: bool,
    },
}

impl InstallEvent {
    /// SSE `event:` 名称
    pub fn name(&self) -> &'static str {
        match self {
            InstallEvent::Start { .. } => "start",
            InstallEvent::Progress { .. } => "progress",
            InstallEvent::Log { .. } => "log",
            InstallEvent::Truncate { .. } => "truncate",
            InstallEvent::Done { .. } => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Starting,
    Running,
    /// 已超出字符上限：继续推送 log，但不再缓存
    Truncating,
    Finished,
}

/// 单次安装的状态机，只负责状态转换，不做 I/O
#[derive(Debug)]
pub struct InstallRun {
    phase: RunPhase,
    char_limit: usize,
    log_buffer: Vec<String>,
    buffered_chars: usize,
    truncated: bool,
    progress: u8,
}

impl InstallRun {
    pub fn new(char_limit: usize) -> Self {
        Self {
            phase: RunPhase::Starting,
            char_limit,
            log_buffer: Vec::new(),
            buffered_chars: 0,
            truncated: false,
            progress: 0,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn start(&mut self, app: &AppEntry) -> InstallEvent {
        self.phase = RunPhase::Running;
        InstallEvent::Start {
            app: app.clone(),
            started_at: Utc::now(),
        }
    }

    /// 处理一行原始输出，返回应推送的事件（按顺序）
    pub fn feed_line(&mut self, raw: &str) -> Vec<InstallEvent> {
        let clean = sanitize_line(raw).trim().to_string();
        if clean.is_empty() || self.phase == RunPhase::Finished {
            return Vec::new();
        }

        let mut events = Vec::new();

        // 进度只升不降，重复值不推送
        if let Some(p) = parse_progress(&clean) {
            if p > self.progress {
                self.progress = p;
                events.push(InstallEvent::Progress { progress: p });
            }
        }

        if !self.truncated {
            let cost = clean.chars().count() + 1;
            if self.buffered_chars + cost > self.char_limit {
                self.truncated = true;
                self.phase = RunPhase::Truncating;
                self.log_buffer.push(TRUNCATION_MARKER.to_string());
                events.push(InstallEvent::Truncate {
                    limit: self.char_limit,
                });
            } else {
                self.buffered_chars += cost;
                self.log_buffer.push(clean.clone());
            }
        }

        events.push(InstallEvent::Log { line: clean });
        events
    }

    /// 缓存的日志文本
    pub fn output(&self) -> String {
        self.log_buffer.join("\n")
    }

    /// 结束运行并给出判定
    pub fn finish(&mut self, exit_code: i32, timed_out: bool) -> (Verdict, String) {
        self.phase = RunPhase::Finished;
        let output = self.output();
        let verdict = if timed_out {
            Verdict::Error
        } else {
            Verdict::from_run(exit_code, &output)
        };
        (verdict, output)
    }
}

/// 流式安装的限制参数
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub char_limit: usize,
    pub timeout: Duration,
}

enum Step {
    Line(Option<String>),
    Elapsed,
    Disconnected,
}

/// 带截止时间的发送结果
enum Delivery {
    Sent,
    Elapsed,
    Disconnected,
}

/// 发送事件，与读取输出共用同一个截止时间
///
/// 客户端保持连接却不读取时通道会被填满，发送不能无限期挂起。
async fn deliver(
    tx: &mpsc::Sender<InstallEvent>,
    event: InstallEvent,
    deadline: Instant,
) -> Delivery {
    match tokio::time::timeout_at(deadline, tx.send(event)).await {
        Ok(Ok(())) => Delivery::Sent,
        Ok(Err(_)) => Delivery::Disconnected,
        Err(_) => Delivery::Elapsed,
    }
}

/// 执行一次流式安装，事件写入 `tx`
///
/// 客户端断开（`tx` 关闭）时杀掉子进程并直接返回，不修改目录；
/// 其余情况 `done` 一定作为最后一个事件发出且只发一次。
/// 截止时间同时约束读取输出和发送事件，到期即终止子进程。
pub async fn stream_install(
    runner: Arc<dyn ProcessRunner>,
    store: Arc<AppsStore>,
    app: AppEntry,
    settings: StreamSettings,
    tx: mpsc::Sender<InstallEvent>,
) {
    let deadline = Instant::now() + settings.timeout;
    let mut run = InstallRun::new(settings.char_limit);
    if !matches!(deliver(&tx, run.start(&app), deadline).await, Delivery::Sent) {
        return;
    }
    log::info!("开始安装 #{} {}", app.id, app.name);

    let mut timed_out = false;
    let exit_code = match runner.spawn(&app.command).await {
        Ok(mut process) => {
            'read: loop {
                let step = tokio::select! {
                    _ = tx.closed() => Step::Disconnected,
                    res = tokio::time::timeout_at(deadline, process.next_line()) => match res {
                        Ok(line) => Step::Line(line),
                        Err(_) => Step::Elapsed,
                    },
                };

                match step {
                    Step::Line(Some(line)) => {
                        for event in run.feed_line(&line) {
                            match deliver(&tx, event, deadline).await {
                                Delivery::Sent => {}
                                Delivery::Disconnected => {
                                    abort_on_disconnect(&app, &mut process).await;
                                    return;
                                }
                                Delivery::Elapsed => {
                                    timed_out = true;
                                    break 'read;
                                }
                            }
                        }
                    }
                    Step::Line(None) => break,
                    Step::Elapsed => {
                        timed_out = true;
                        break;
                    }
                    Step::Disconnected => {
                        abort_on_disconnect(&app, &mut process).await;
                        return;
                    }
                }
            }

            if timed_out {
                log::warn!(
                    "安装 #{} 超过 {:?}，强制终止",
                    app.id,
                    settings.timeout
                );
                process.kill().await;
            }

            match process.wait().await {
                Ok(code) => code,
                Err(e) => {
                    log::warn!("等待安装进程退出失败: {}", e);
                    -1
                }
            }
        }
        Err(e) => {
            log::warn!("启动安装进程失败: {}", e);
            for event in run.feed_line(&format!("无法启动安装进程: {}", e)) {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            -1
        }
    };

    let mut tail = Vec::new();
    if timed_out {
        let notice = format!("安装超时（{} 秒），进程已终止", settings.timeout.as_secs());
        tail.extend(run.feed_line(&notice));
    }

    let (status, output) = run.finish(exit_code, timed_out);
    log::info!(
        "安装 #{} 结束: {:?} (exit={})",
        app.id,
        status,
        exit_code
    );

    // 先落盘，客户端迟迟不读取也不影响目录状态
    let (id, installed) = (app.id, status.is_ok());
    let refreshed = match store
        .blocking(move |s| s.mark_installed(id, installed))
        .await
    {
        Ok(Some(updated)) => updated,
        Ok(None) => app,
        Err(e) => {
            log::error!("记录安装状态失败: {}", e);
            app
        }
    };

    // 进程已结束，剩余事件不再受截止时间约束；客户端断开时发送自然失败
    tail.push(InstallEvent::Done {
        status,
        exit_code,
        output,
        app: refreshed,
        timed_out,
    });
    for event in tail {
        if tx.send(event).await.is_err() {
            break;
        }
    }
}

async fn abort_on_disconnect(app: &AppEntry, process: &mut Box<dyn RunningProcess>) {
    log::info!("客户端已断开，终止安装 #{}", app.id);
    process.kill().await;
    let _ = process.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_manager::mock::ScriptedRunner;
    use tempfile::TempDir;

    fn progress_values(events: &[InstallEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                InstallEvent::Progress { progress } => Some(*progress),
                _ => None,
            })
            .collect()
    }

    fn fixture() -> (TempDir, Arc<AppsStore>, AppEntry) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AppsStore::open(dir.path().join("apps.json")).unwrap());
        let app = store.get_app(1).unwrap().unwrap();
        (dir, store, app)
    }

    async fn collect(
        runner: &ScriptedRunner,
        store: Arc<AppsStore>,
        app: AppEntry,
        settings: StreamSettings,
    ) -> Vec<InstallEvent> {
        let (tx, mut rx) = mpsc::channel(16);
        let runner: Arc<dyn ProcessRunner> = Arc::new(runner.clone());
        tokio::spawn(stream_install(runner, store, app, settings, tx));
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn settings() -> StreamSettings {
        StreamSettings {
            char_limit: 12_000,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn progress_is_strictly_increasing() {
        let mut run = InstallRun::new(1000);
        let mut events = Vec::new();
        for line in ["5%", "3%", "5%", "80%"] {
            events.extend(run.feed_line(line));
        }
        assert_eq!(progress_values(&events), vec![5, 80]);
        assert_eq!(run.progress(), 80);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut run = InstallRun::new(1000);
        assert!(run.feed_line("  \r ").is_empty());
        assert!(run.feed_line("\x1b[0m").is_empty());
        assert_eq!(run.output(), "");
    }

    #[test]
    fn truncation_signaled_once_and_logging_continues() {
        let limit = 50;
        let mut run = InstallRun::new(limit);
        let mut events = Vec::new();
        for i in 0..20 {
            events.extend(run.feed_line(&format!("line number {}", i)));
        }

        let truncates = events
            .iter()
            .filter(|e| matches!(e, InstallEvent::Truncate { .. }))
            .count();
        let logs = events
            .iter()
            .filter(|e| matches!(e, InstallEvent::Log { .. }))
            .count();
        assert_eq!(truncates, 1);
        assert_eq!(logs, 20);
        assert!(run.is_truncated());

        let (_, output) = run.finish(0, false);
        assert!(output.ends_with(TRUNCATION_MARKER));
        assert!(output.chars().count() <= limit + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn verdict_law() {
        let mut run = InstallRun::new(1000);
        run.feed_line("Fatal error");
        assert_eq!(run.finish(0, false).0, Verdict::Ok);

        let mut run = InstallRun::new(1000);
        run.feed_line("Found an existing package already installed.");
        assert_eq!(run.finish(-1978335189, false).0, Verdict::Ok);

        let mut run = InstallRun::new(1000);
        run.feed_line("Installer failed with exit code: 1603");
        assert_eq!(run.finish(1603, false).0, Verdict::Error);
    }

    #[tokio::test]
    async fn end_to_end_success_marks_installed() {
        let (_dir, store, app) = fixture();
        let runner = ScriptedRunner::new();
        runner.on(
            "Git.Git",
            0,
            "Found Git [Git.Git]\n  ██████    50%\n  ████████████  100%\nSuccessfully installed",
        );

        let events = collect(&runner, Arc::clone(&store), app, settings()).await;

        assert_eq!(events.first().map(InstallEvent::name), Some("start"));
        assert_eq!(progress_values(&events), vec![50, 100]);
        match events.last() {
            Some(InstallEvent::Done {
                status,
                exit_code,
                app,
                timed_out,
                ..
            }) => {
                assert_eq!(*status, Verdict::Ok);
                assert_eq!(*exit_code, 0);
                assert!(app.installed);
                assert!(!timed_out);
            }
            other => panic!("unexpected last event: {:?}", other),
        }
        assert_eq!(events.iter().filter(|e| e.name() == "done").count(), 1);
        assert!(store.get_app(1).unwrap().unwrap().installed);
    }

    #[tokio::test]
    async fn failure_marks_not_installed() {
        let (_dir, store, app) = fixture();
        store.mark_installed(1, true).unwrap();
        let runner = ScriptedRunner::new();
        runner.on("Git.Git", 1603, "Installer failed with exit code: 1603");

        let events = collect(&runner, Arc::clone(&store), app, settings()).await;

        match events.last() {
            Some(InstallEvent::Done { status, output, .. }) => {
                assert_eq!(*status, Verdict::Error);
                assert!(output.contains("1603"));
            }
            other => panic!("unexpected last event: {:?}", other),
        }
        assert!(!store.get_app(1).unwrap().unwrap().installed);
    }

    #[tokio::test]
    async fn timeout_kills_process_and_still_finishes() {
        let (_dir, store, app) = fixture();
        let runner = ScriptedRunner::new();
        runner.on_hang("Git.Git", "Downloading 10%");

        let events = collect(
            &runner,
            Arc::clone(&store),
            app,
            StreamSettings {
                char_limit: 12_000,
                timeout: Duration::from_millis(50),
            },
        )
        .await;

        assert_eq!(runner.kills(), 1);
        match events.last() {
            Some(InstallEvent::Done {
                status, timed_out, ..
            }) => {
                assert_eq!(*status, Verdict::Error);
                assert!(*timed_out);
            }
            other => panic!("unexpected last event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn disconnect_kills_process_without_store_mutation() {
        let (_dir, store, app) = fixture();
        let runner = ScriptedRunner::new();
        runner.on_hang("Git.Git", "Downloading 10%");

        let (tx, mut rx) = mpsc::channel(16);
        let dyn_runner: Arc<dyn ProcessRunner> = Arc::new(runner.clone());
        let handle = tokio::spawn(stream_install(
            dyn_runner,
            Arc::clone(&store),
            app,
            StreamSettings {
                char_limit: 12_000,
                timeout: Duration::from_secs(60),
            },
            tx,
        ));

        // 收到 start 后断开
        assert_eq!(rx.recv().await.map(|e| e.name()), Some("start"));
        drop(rx);
        handle.await.unwrap();

        assert_eq!(runner.kills(), 1);
        assert!(!store.get_app(1).unwrap().unwrap().installed);
    }

    #[tokio::test]
    async fn stalled_client_cannot_outlive_deadline() {
        let (_dir, store, app) = fixture();
        store.mark_installed(1, true).unwrap();
        let runner = ScriptedRunner::new();
        let noisy: Vec<String> = (0..200).map(|i| format!("Downloading chunk {}", i)).collect();
        runner.on_hang("Git.Git", &noisy.join("\n"));

        // 通道很小且一直不读取
        let (tx, mut rx) = mpsc::channel(4);
        let dyn_runner: Arc<dyn ProcessRunner> = Arc::new(runner.clone());
        let handle = tokio::spawn(stream_install(
            dyn_runner,
            Arc::clone(&store),
            app,
            StreamSettings {
                char_limit: 12_000,
                timeout: Duration::from_millis(50),
            },
            tx,
        ));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runner.kills(), 1);
        assert!(!store.get_app(1).unwrap().unwrap().installed);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        handle.await.unwrap();

        assert_eq!(events.first().map(InstallEvent::name), Some("start"));
        assert_eq!(events.iter().filter(|e| e.name() == "done").count(), 1);
        match events.last() {
            Some(InstallEvent::Done {
                status, timed_out, ..
            }) => {
                assert_eq!(*status, Verdict::Error);
                assert!(*timed_out);
            }
            other => panic!("unexpected last event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn spawn_failure_still_reports_done() {
        let (_dir, store, app) = fixture();
        store.mark_installed(1, true).unwrap();
        let runner = ScriptedRunner::new();
        runner.on_spawn_error("Git.Git");

        let events = collect(&runner, Arc::clone(&store), app, settings()).await;

        let names: Vec<&str> = events.iter().map(InstallEvent::name).collect();
        assert_eq!(names, vec!["start", "log", "done"]);
        match &events[1] {
            InstallEvent::Log { line } => assert!(line.contains("program not found")),
            other => panic!("unexpected event: {:?}", other),
        }
        match events.last() {
            Some(InstallEvent::Done {
                status,
                exit_code,
                output,
                timed_out,
                ..
            }) => {
                assert_eq!(*status, Verdict::Error);
                assert_eq!(*exit_code, -1);
                assert!(output.contains("program not found"));
                assert!(!timed_out);
            }
            other => panic!("unexpected last event: {:?}", other),
        }
        assert!(!store.get_app(1).unwrap().unwrap().installed);
    }

    #[test]
    fn events_serialize_without_tag() {
        let payload = serde_json::to_value(InstallEvent::Progress { progress: 42 }).unwrap();
        assert_eq!(payload, serde_json::json!({ "progress": 42 }));
        let payload = serde_json::to_value(InstallEvent::Truncate { limit: 10 }).unwrap();
        assert_eq!(payload, serde_json::json!({ "limit": 10 }));
    }
}
