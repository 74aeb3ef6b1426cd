//! PackageManager 相关数据类型定义

use serde::Serialize;

/// 同步执行结果：退出码 + 合并后的输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub output: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 安装结果判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Ok,
    Error,
}

impl Verdict {
    /// 退出码为 0，或输出中出现 "已安装 / 无可用更新" 信号，都视为成功
    pub fn from_run(exit_code: i32, output: &str) -> Self {
        if exit_code == 0 || super::parser::is_already_installed(output) {
            Verdict::Ok
        } else {
            Verdict::Error
        }
    }

    pub fn is_ok(self) -> bool {
        self == Verdict::Ok
    }
}

/// 单次探测输出的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeSignal {
    /// 命中关键词且带版本号
    Installed,
    /// 包管理器明确表示没找到，换下一条探测命令
    Absent,
    /// 什么都判断不出来
    Inconclusive,
}

/// 版本查询结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub current_version: String,
    pub latest_version: String,
    pub update_available: bool,
}

/// 打开应用的结果
#[derive(Debug, Clone, Serialize)]
pub struct OpenOutcome {
    pub status: Verdict,
    pub exit_code: i32,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pfn: Option<String>,
}
