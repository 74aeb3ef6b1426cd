//! 输出解析函数

use super::signals::{ALREADY_INSTALLED, VERSION_FIELD_LABELS};
use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

/// 截断后追加到日志末尾的占位行
pub const TRUNCATION_MARKER: &str = "... 输出已截断 ...";

fn progress_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([0-9]+)%").expect("progress regex"))
}

fn package_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)--id\s+([\w.\-]+)").expect("package id regex"))
}

fn version_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([0-9][0-9A-Za-z.\-+]+)\b").expect("version token regex"))
}

fn latest_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let labels = VERSION_FIELD_LABELS
            .iter()
            .map(|l| regex::escape(l))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)(?:{}):\s*([0-9a-zA-Z.\-+]+)", labels))
            .expect("latest version regex")
    })
}

/// 清理一行原始输出：去掉 ANSI 转义序列、`\r` 以及除 `\t` `\n` 外的 ASCII 控制字符
///
/// 对已清理的文本再次调用结果不变。
pub fn sanitize_line(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => {
                // CSI 序列：ESC [ ... 字母
                if chars.peek() == Some(&'[') {
                    chars.next();
                    while let Some(&next) = chars.peek() {
                        chars.next();
                        if next.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
            }
            '\r' => {}
            '\t' | '\n' => result.push(c),
            c if c.is_ascii_control() && c != '\x7f' => {}
            _ => result.push(c),
        }
    }

    result
}

/// 提取文本中最大的百分比（1~3 位数字紧跟 `%`），上限 100
///
/// 进度条重绘时一行里可能出现多个百分比，取最大值。没有匹配返回 `None`。
pub fn parse_progress(text: &str) -> Option<u8> {
    progress_re()
        .captures_iter(text)
        .filter_map(|cap| {
            let digits = cap.get(1)?.as_str();
            if digits.len() > 3 {
                return None;
            }
            digits.parse::<u16>().ok()
        })
        .max()
        .map(|v| v.min(100) as u8)
}

/// 文本中是否包含 "已安装 / 无可用更新" 类信号（不区分大小写）
pub fn is_already_installed(text: &str) -> bool {
    let normalized = text.to_lowercase();
    ALREADY_INSTALLED.iter().any(|sig| normalized.contains(sig))
}

/// 从命令中提取 `--id <token>`，没有则返回空串
pub fn extract_package_id(command: &str) -> String {
    package_id_re()
        .captures(command)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// 命令指定了 msstore 源时，查询也要带上同样的源
pub fn detect_source(command: &str) -> &'static str {
    if command.to_lowercase().contains("--source msstore") {
        "--source msstore"
    } else {
        ""
    }
}

/// 文本中是否出现版本号形态的片段（数字开头，后跟版本字符）
pub fn has_version_token(text: &str) -> bool {
    version_token_re().is_match(text)
}

/// 从 `winget list` 输出解析已安装版本
///
/// 优先取包 ID 所在行紧随其后的版本号，找不到时退回输出中第一个版本号形态的片段。
pub fn parse_installed_version(output: &str, package_id: &str) -> Option<String> {
    let cleaned = output.replace('\r', "");
    if !package_id.is_empty() {
        let pattern = format!(
            r"(?im)^\s*.*?\s{}\s+([0-9][0-9A-Za-z.\-+]+)",
            regex::escape(package_id)
        );
        if let Ok(re) = Regex::new(&pattern) {
            if let Some(m) = re.captures(&cleaned).and_then(|cap| cap.get(1)) {
                return Some(m.as_str().to_string());
            }
        }
    }
    version_token_re()
        .captures(&cleaned)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

/// 从 `winget show` 输出解析 "Version: X" 字段
pub fn parse_latest_version(output: &str) -> Option<String> {
    latest_version_re()
        .captures(output)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

/// 把版本号拆成数字元组；不含任何数字时返回 `None`
pub fn parse_version_tuple(version: &str) -> Option<Vec<u64>> {
    let parts = version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

/// 逐段数字比较；任一方无法解析时退化为字符串不等比较
pub fn is_update_available(current: &str, latest: &str) -> bool {
    match (parse_version_tuple(current), parse_version_tuple(latest)) {
        (Some(cur), Some(lat)) => cur.cmp(&lat) == Ordering::Less,
        _ => current != latest,
    }
}

/// 超过字符上限时截断并追加截断标记
pub fn truncate_output(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => format!("{}\n{}", &text[..byte_idx], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}
