//! Syncmend - 并发缺陷自动修复
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、搜索上下文、可注入随机源
//! - **operators**: 变异算子目录
//! - **harness**: 单次试验执行、输出分类、批量测试
//! - **workspace**: 外部协作者契约（变异体存储、变异引擎、构建、模型检查）及默认实现
//! - **evolution**: 变异、适应度评估、反馈选择、替换与两阶段演化主循环
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod evolution;
pub mod harness;
pub mod observability;
pub mod operators;
pub mod workspace;

pub use evolution::{start_search, Collaborators, EvolutionLoop, SearchReport};
