//! 本地 winget 安装控制面板
//!
//! 应用目录、PowerShell 子进程执行、安装输出的流式解析与判定，以及对外的 HTTP 接口。

pub mod config;
pub mod error;
pub mod package_manager;
pub mod server;
pub mod store;
