//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SYNCMEND__*` 覆盖（双下划线表示嵌套，如 `SYNCMEND__EVOLUTION__POPULATION=10`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::operators::{default_catalog, MutationOperator};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub project: ProjectSection,
    pub testing: TestingSection,
    pub evolution: EvolutionSection,
    pub fitness: FitnessSection,
    pub convergence: ConvergenceSection,
    pub model_check: ModelCheckSection,
    #[serde(default = "default_catalog")]
    pub operators: Vec<MutationOperator>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project: ProjectSection::default(),
            testing: TestingSection::default(),
            evolution: EvolutionSection::default(),
            fitness: FitnessSection::default(),
            convergence: ConvergenceSection::default(),
            model_check: ModelCheckSection::default(),
            operators: default_catalog(),
        }
    }
}

/// [project] 段：被修复工程的目录布局与外部命令
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProjectSection {
    /// 原始（有缺陷）工程，只读
    pub pristine_dir: PathBuf,
    /// 编译与测试所在的工作区
    pub work_dir: PathBuf,
    /// 每代每个个体的变异体副本：tmp/<generation>/<id>/
    pub tmp_dir: PathBuf,
    /// 找到修复后导出的位置
    pub output_dir: PathBuf,
    /// 运行测试套件的命令（argv，不经过 shell，以便信号直达被测进程）
    pub test_command: Vec<String>,
    pub build_command: Vec<String>,
    pub build_timeout_secs: u64,
    /// 外部变异引擎：`<cmd> list|apply|check-entrypoint|check-double-lock ...`
    pub mutator_command: Vec<String>,
    /// 可选模型检查器命令，输出 JSON 结论
    pub model_check_command: Option<Vec<String>>,
    /// 噪声工具发现的共享变量列表（每行 package.Class.variable）
    pub shared_vars_file: Option<PathBuf>,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            pristine_dir: PathBuf::from("input"),
            work_dir: PathBuf::from("workarea"),
            tmp_dir: PathBuf::from("tmp"),
            output_dir: PathBuf::from("output"),
            test_command: vec![
                "java".into(),
                "-cp".into(),
                "class:test".into(),
                "org.junit.runner.JUnitCore".into(),
                "AllTests".into(),
            ],
            build_command: vec!["ant".into(), "compile".into()],
            build_timeout_secs: 600,
            mutator_command: vec!["syncmend-mutator".into()],
            model_check_command: None,
            shared_vars_file: None,
        }
    }
}

/// [testing] 段：重复试验次数、超时与输出解析
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TestingSection {
    /// 每次评估的基础试验次数
    pub runs: u32,
    /// 单次试验超时；开启校准时作为上限
    pub timeout_secs: u64,
    /// 启动时计时一次干净运行，超时 = 耗时 * timeout_multiplier
    pub calibrate_timeout: bool,
    pub timeout_multiplier: u32,
    /// 扩展验证 = runs * validation_multiplier
    pub validation_multiplier: u32,
    pub poll_interval_ms: u64,
    /// 发送诊断信号后到强制终止前的等待
    pub kill_grace_ms: u64,
    /// stdout / stderr 各自最多保留的字节数
    pub output_limit_bytes: usize,
    /// auto / bsd / linux：计时包装器的输出格式
    pub timing_style: String,
    pub time_binary: PathBuf,
    pub deadlock_markers: Vec<String>,
}

impl Default for TestingSection {
    fn default() -> Self {
        Self {
            runs: 10,
            timeout_secs: 300,
            calibrate_timeout: true,
            timeout_multiplier: 20,
            validation_multiplier: 15,
            poll_interval_ms: 100,
            kill_grace_ms: 1000,
            output_limit_bytes: 4 * 1024 * 1024,
            timing_style: "auto".into(),
            time_binary: PathBuf::from("/usr/bin/time"),
            deadlock_markers: vec!["Java-level deadlock:".into()],
        }
    }
}

/// [evolution] 段：种群、代数、替换策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvolutionSection {
    pub generations: u32,
    pub population: u32,
    pub replace_lowest_percent: u32,
    /// 每隔多少代考虑一次替换
    pub replace_interval: u32,
    /// 连续表现差多少次后才替换
    pub replace_weak_min_turns: u32,
    /// 替换时用优秀个体克隆（而非重启）的概率，百分比
    pub replace_with_best_percent: u32,
    /// 算子投票回看的代数窗口
    pub ranking_window: u32,
    pub random_mutation: bool,
    pub only_functional: bool,
    pub max_mutation_attempts: u32,
    /// 每隔多少代清理 generation-2 的变异体
    pub prune_interval: u32,
    pub random_seed: Option<u64>,
    /// 禁止同步程序入口方法（会把并发程序变成串行）
    pub exclude_entrypoint: bool,
}

impl Default for EvolutionSection {
    fn default() -> Self {
        Self {
            generations: 30,
            population: 30,
            replace_lowest_percent: 10,
            replace_interval: 5,
            replace_weak_min_turns: 3,
            replace_with_best_percent: 75,
            ranking_window: 5,
            random_mutation: false,
            only_functional: true,
            max_mutation_attempts: 1000,
            prune_interval: 1,
            random_seed: None,
            exclude_entrypoint: true,
        }
    }
}

/// [fitness] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FitnessSection {
    pub success_weight: f64,
    pub timeout_weight: f64,
}

impl Default for FitnessSection {
    fn default() -> Self {
        Self {
            success_weight: 100.0,
            timeout_weight: 50.0,
        }
    }
}

/// [convergence] 段：优化阶段停滞判定
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConvergenceSection {
    pub window: u32,
    pub avg_min_delta: f64,
    pub best_min_delta: f64,
}

impl Default for ConvergenceSection {
    fn default() -> Self {
        Self {
            window: 10,
            avg_min_delta: 0.01,
            best_min_delta: 1.0,
        }
    }
}

/// [model_check] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelCheckSection {
    pub enabled: bool,
    pub search_depth: u32,
    /// 连续多少次不确定结论后停用模型检查
    pub max_inconclusive: u32,
    pub timeout_secs: u64,
}

impl Default for ModelCheckSection {
    fn default() -> Self {
        Self {
            enabled: false,
            search_depth: 50,
            max_inconclusive: 5,
            timeout_secs: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 SYNCMEND__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SYNCMEND__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SYNCMEND")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.testing.runs, 10);
        assert_eq!(cfg.testing.validation_multiplier, 15);
        assert!(cfg.testing.calibrate_timeout);
        assert_eq!(cfg.testing.timeout_multiplier, 20);
        assert_eq!(cfg.project.build_timeout_secs, 600);
        assert_eq!(cfg.evolution.population, 30);
        assert_eq!(cfg.evolution.replace_with_best_percent, 75);
        assert_eq!(cfg.fitness.success_weight, 100.0);
        assert_eq!(cfg.convergence.window, 10);
        assert!(cfg.evolution.only_functional);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = r#"
            [evolution]
            population = 4
            random_seed = 7

            [testing]
            runs = 3
        "#;
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.evolution.population, 4);
        assert_eq!(cfg.evolution.random_seed, Some(7));
        assert_eq!(cfg.evolution.generations, 30);
        assert_eq!(cfg.testing.runs, 3);
        assert_eq!(cfg.testing.timeout_secs, 300);
        assert_eq!(cfg.operators.len(), 12);
    }

    #[test]
    fn test_load_config_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repair.toml");
        std::fs::write(&path, "[fitness]\nsuccess_weight = 10.0\n").unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.fitness.success_weight, 10.0);
        assert_eq!(cfg.fitness.timeout_weight, 50.0);
    }
}
