//! 已安装状态探测的文本判定

use super::command::ps_quote;
use super::parser::{extract_package_id, has_version_token, is_already_installed};
use super::signals::{ALIAS_GROUPS, BROAD_QUERIES, NOT_INSTALLED};
use super::types::ProbeSignal;
use crate::store::AppEntry;
use std::collections::BTreeSet;

/// 针对单个应用的候选关键词集合
#[derive(Debug, Clone)]
pub struct ProbeMatcher {
    keywords: BTreeSet<String>,
}

impl ProbeMatcher {
    pub fn new(package_id: &str, name: &str) -> Self {
        let mut keywords = BTreeSet::new();
        let base = package_id.trim().to_lowercase();
        let name_l = name.trim().to_lowercase();

        if !base.is_empty() {
            if base.ends_with(".exe") {
                keywords.insert(base.clone());
            } else {
                keywords.insert(format!("{}.exe", base));
            }
            keywords.insert(base.replace('.', ""));
            keywords.insert(base.clone());
        }
        if !name_l.is_empty() {
            let name_clean: String = name_l.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
            keywords.insert(name_clean);
            keywords.insert(name_l.clone());
        }

        for group in ALIAS_GROUPS {
            if base.contains(group.trigger) || name_l.contains(group.trigger) {
                keywords.extend(group.keywords.iter().map(|k| k.to_string()));
            }
        }

        keywords.retain(|k| !k.is_empty());
        Self { keywords }
    }

    pub fn for_app(app: &AppEntry) -> Self {
        Self::new(&extract_package_id(&app.command), &app.name)
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.keywords.iter().map(String::as_str)
    }

    /// 对一次探测命令的输出分类
    ///
    /// 命中 "已安装" 信号或任一关键词，且输出中带版本号形态的片段，才算已安装；
    /// 没有版本号的泛泛文本不作数。
    pub fn classify(&self, output: &str) -> ProbeSignal {
        let norm = output.to_lowercase();
        let matched =
            is_already_installed(&norm) || self.keywords.iter().any(|kw| norm.contains(kw.as_str()));
        if matched && has_version_token(output) {
            return ProbeSignal::Installed;
        }
        if NOT_INSTALLED.iter().any(|sig| norm.contains(sig)) {
            return ProbeSignal::Absent;
        }
        ProbeSignal::Inconclusive
    }
}

/// 按顺序尝试的探测命令：精确包 ID → 应用名 → 歧义名的宽泛查询
pub fn probe_commands(package_id: &str, name: &str, source: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let name = name.trim();

    if !package_id.is_empty() {
        commands.push(
            format!("winget list --id {} --exact {}", package_id, source)
                .trim()
                .to_string(),
        );
    }
    if !name.is_empty() {
        commands.push(format!("winget list {} {}", ps_quote(name), source).trim().to_string());
    }

    let name_l = name.to_lowercase();
    for broad in BROAD_QUERIES {
        if name_l.contains(broad.trigger) {
            let cmd = format!("winget list {} {}", ps_quote(broad.query), source)
                .trim()
                .to_string();
            if !commands.contains(&cmd) {
                commands.push(cmd);
            }
        }
    }

    commands
}

/// 依次检查各探测命令的输出，第一个判定为已安装的即返回 `true`
///
/// "未找到" 信号和无法判断的输出都只是跳过，全部用完仍无正向信号则视为未安装。
pub fn is_installed<S: AsRef<str>>(app: &AppEntry, probe_outputs: &[S]) -> bool {
    let matcher = ProbeMatcher::for_app(app);
    probe_outputs
        .iter()
        .any(|out| matcher.classify(out.as_ref()) == ProbeSignal::Installed)
}
