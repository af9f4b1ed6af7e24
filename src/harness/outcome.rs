//! 单次试验结果分类
//!
//! 文本解析被隔离在 OutcomeParser 之后：试验执行器只负责进程生命周期，
//! 换成结构化日志解析时不需要改动搜索算法。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 测试运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestMode {
    /// 修复 / 回归验证：加噪声运行，超时记为 Timeout
    Functional,
    /// 性能测量：经计时包装器运行，超时无法与死锁区分
    Performance,
}

/// 一次成功运行的性能样本
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerfSample {
    /// 用户态 + 内核态 CPU 时间（秒）
    pub cpu_seconds: f64,
    pub voluntary_switches: f64,
}

/// 单次试验的分类结果（互斥）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrialOutcome {
    Success { perf: Option<PerfSample> },
    Timeout,
    /// 噪声下断言失败即视为数据竞争信号
    Datarace { failures: u32 },
    Deadlock,
    /// 运行了但什么都没执行，或输出无法解析
    Error,
}

impl TrialOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TrialOutcome::Success { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrialOutcome::Success { .. } => "success",
            TrialOutcome::Timeout => "timeout",
            TrialOutcome::Datarace { .. } => "datarace",
            TrialOutcome::Deadlock => "deadlock",
            TrialOutcome::Error => "error",
        }
    }
}

/// 计时包装器（/usr/bin/time）的输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingStyle {
    /// `time -lp`
    Bsd,
    /// `time -v`
    Linux,
}

impl TimingStyle {
    /// auto 时按宿主系统选择
    pub fn from_config(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "bsd" | "mac" | "macos" => TimingStyle::Bsd,
            "linux" | "gnu" => TimingStyle::Linux,
            _ => Self::host(),
        }
    }

    pub fn host() -> Self {
        if cfg!(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd")) {
            TimingStyle::Bsd
        } else {
            TimingStyle::Linux
        }
    }

    /// 传给计时包装器的参数
    pub fn time_flag(&self) -> &'static str {
        match self {
            TimingStyle::Bsd => "-lp",
            TimingStyle::Linux => "-v",
        }
    }
}

/// 进程结束（或被杀）后采集到的原始输出
#[derive(Debug, Clone, Default)]
pub struct RawTrialOutput {
    pub stdout: String,
    pub stderr: String,
    /// 是否因超时被强制终止
    pub timed_out: bool,
}

/// 输出解析策略
pub trait OutcomeParser: Send + Sync {
    fn classify(&self, output: &RawTrialOutput, mode: TestMode) -> TrialOutcome;
}

static SUMMARY_RE: OnceLock<Regex> = OnceLock::new();
static ALL_PASSED_RE: OnceLock<Regex> = OnceLock::new();
static BSD_USER_RE: OnceLock<Regex> = OnceLock::new();
static BSD_SYS_RE: OnceLock<Regex> = OnceLock::new();
static BSD_SWITCH_RE: OnceLock<Regex> = OnceLock::new();
static LINUX_USER_RE: OnceLock<Regex> = OnceLock::new();
static LINUX_SYS_RE: OnceLock<Regex> = OnceLock::new();
static LINUX_SWITCH_RE: OnceLock<Regex> = OnceLock::new();

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

fn capture_f64(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

fn capture_u32(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// JUnit 文本输出解析：`Tests run: N,  Failures: M` 与 `OK (N tests)`
#[derive(Debug, Clone)]
pub struct JUnitOutcomeParser {
    deadlock_markers: Vec<String>,
    timing: TimingStyle,
}

impl JUnitOutcomeParser {
    pub fn new(deadlock_markers: Vec<String>, timing: TimingStyle) -> Self {
        Self {
            deadlock_markers,
            timing,
        }
    }

    fn has_deadlock_evidence(&self, output: &RawTrialOutput) -> bool {
        self.deadlock_markers
            .iter()
            .any(|m| output.stdout.contains(m.as_str()) || output.stderr.contains(m.as_str()))
    }

    /// 从计时包装器的 stderr 中提取 CPU 时间与自愿上下文切换次数
    pub fn parse_perf(&self, stderr: &str) -> Option<PerfSample> {
        let (user, sys, switches) = match self.timing {
            TimingStyle::Bsd => (
                capture_f64(regex(&BSD_USER_RE, r"user\s+(\d+\.\d+)"), stderr)?,
                capture_f64(regex(&BSD_SYS_RE, r"sys\s+(\d+\.\d+)"), stderr)?,
                capture_f64(regex(&BSD_SWITCH_RE, r"(\d+)\s+voluntary context switches"), stderr)?,
            ),
            TimingStyle::Linux => (
                capture_f64(regex(&LINUX_USER_RE, r"User time \(seconds\): (\d+\.\d+)"), stderr)?,
                capture_f64(regex(&LINUX_SYS_RE, r"System time \(seconds\): (\d+\.\d+)"), stderr)?,
                capture_f64(regex(&LINUX_SWITCH_RE, r"Voluntary context switches: (\d+)"), stderr)?,
            ),
        };
        Some(PerfSample {
            cpu_seconds: user + sys,
            voluntary_switches: switches,
        })
    }

    fn classify_finished(&self, output: &RawTrialOutput, mode: TestMode) -> TrialOutcome {
        let summary = regex(&SUMMARY_RE, r"Tests run: (\d+),\s+Failures: (\d+)").captures(&output.stdout);
        let (tests, failures) = summary
            .and_then(|c| {
                let tests = c.get(1)?.as_str().parse::<u32>().ok()?;
                let failures = c.get(2)?.as_str().parse::<u32>().ok()?;
                Some((tests, failures))
            })
            .unwrap_or((0, 0));
        let successes = capture_u32(regex(&ALL_PASSED_RE, r"OK \((\d+) test"), &output.stdout).unwrap_or(0);

        if tests > 0 && failures > 0 {
            return TrialOutcome::Datarace { failures };
        }
        if tests == 0 && successes == 0 {
            // 套件没有跑完，但进程已退出或被回收
            return TrialOutcome::Deadlock;
        }
        // 余下只有两种：tests > 0 且无失败，或只有 OK 行
        match mode {
            TestMode::Functional => TrialOutcome::Success { perf: None },
            TestMode::Performance => match self.parse_perf(&output.stderr) {
                Some(perf) => TrialOutcome::Success { perf: Some(perf) },
                None => {
                    tracing::warn!("Trial passed but timing counters could not be parsed");
                    TrialOutcome::Error
                }
            },
        }
    }
}

impl OutcomeParser for JUnitOutcomeParser {
    fn classify(&self, output: &RawTrialOutput, mode: TestMode) -> TrialOutcome {
        if self.has_deadlock_evidence(output) {
            return TrialOutcome::Deadlock;
        }
        if output.timed_out {
            return match mode {
                TestMode::Functional => TrialOutcome::Timeout,
                TestMode::Performance => TrialOutcome::Deadlock,
            };
        }
        self.classify_finished(output, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(style: TimingStyle) -> JUnitOutcomeParser {
        JUnitOutcomeParser::new(vec!["Java-level deadlock:".into()], style)
    }

    fn finished(stdout: &str) -> RawTrialOutput {
        RawTrialOutput {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_failures_classify_as_datarace() {
        let out = finished("Tests run: 10,  Failures: 2\n");
        let outcome = parser(TimingStyle::Linux).classify(&out, TestMode::Functional);
        assert_eq!(outcome, TrialOutcome::Datarace { failures: 2 });
    }

    #[test]
    fn test_all_passed_is_success() {
        let out = finished("....\nTime: 0.3\n\nOK (4 tests)\n");
        let outcome = parser(TimingStyle::Linux).classify(&out, TestMode::Functional);
        assert!(outcome.is_success());
    }

    #[test]
    fn test_clean_summary_without_ok_line_is_success() {
        let out = finished("Tests run: 5,  Failures: 0\n");
        let p = parser(TimingStyle::Linux);
        assert_eq!(p.classify(&out, TestMode::Functional), TrialOutcome::Success { perf: None });
        // 只有 OK 行、没有汇总行
        let out = finished("OK (2 tests)\n");
        assert_eq!(p.classify(&out, TestMode::Functional), TrialOutcome::Success { perf: None });
    }

    #[test]
    fn test_empty_summary_is_deadlock() {
        let out = finished("Exception in thread \"main\"");
        assert_eq!(
            parser(TimingStyle::Linux).classify(&out, TestMode::Functional),
            TrialOutcome::Deadlock
        );
    }

    #[test]
    fn test_zero_tests_reported_is_deadlock() {
        let out = finished("OK (0 tests)\nTests run: 0,  Failures: 0");
        // tests == 0 且 successes == 0 优先判为死锁
        assert_eq!(
            parser(TimingStyle::Linux).classify(&out, TestMode::Functional),
            TrialOutcome::Deadlock
        );
    }

    #[test]
    fn test_timeout_depends_on_mode() {
        let out = RawTrialOutput {
            timed_out: true,
            ..Default::default()
        };
        let p = parser(TimingStyle::Linux);
        assert_eq!(p.classify(&out, TestMode::Functional), TrialOutcome::Timeout);
        assert_eq!(p.classify(&out, TestMode::Performance), TrialOutcome::Deadlock);
    }

    #[test]
    fn test_thread_dump_marks_deadlock() {
        let out = RawTrialOutput {
            stdout: "Found one Java-level deadlock:\n=====".into(),
            timed_out: true,
            ..Default::default()
        };
        assert_eq!(
            parser(TimingStyle::Linux).classify(&out, TestMode::Functional),
            TrialOutcome::Deadlock
        );
    }

    #[test]
    fn test_linux_timing_counters() {
        let out = RawTrialOutput {
            stdout: "OK (3 tests)".into(),
            stderr: "\tUser time (seconds): 1.50\n\tSystem time (seconds): 0.25\n\tVoluntary context switches: 420\n"
                .into(),
            timed_out: false,
        };
        let outcome = parser(TimingStyle::Linux).classify(&out, TestMode::Performance);
        match outcome {
            TrialOutcome::Success { perf: Some(perf) } => {
                assert!((perf.cpu_seconds - 1.75).abs() < 1e-9);
                assert_eq!(perf.voluntary_switches, 420.0);
            }
            other => panic!("Expected success with perf, got {:?}", other),
        }
    }

    #[test]
    fn test_bsd_timing_counters() {
        let stderr = "real 2.01\nuser         0.80\nsys          0.20\n      1234  voluntary context switches\n";
        let perf = parser(TimingStyle::Bsd).parse_perf(stderr).unwrap();
        assert!((perf.cpu_seconds - 1.0).abs() < 1e-9);
        assert_eq!(perf.voluntary_switches, 1234.0);
    }

    #[test]
    fn test_missing_counters_in_performance_mode_is_error() {
        let out = finished("OK (3 tests)");
        assert_eq!(
            parser(TimingStyle::Linux).classify(&out, TestMode::Performance),
            TrialOutcome::Error
        );
    }

    #[test]
    fn test_timing_style_from_config() {
        assert_eq!(TimingStyle::from_config("BSD"), TimingStyle::Bsd);
        assert_eq!(TimingStyle::from_config("linux"), TimingStyle::Linux);
        assert_eq!(TimingStyle::from_config("auto"), TimingStyle::host());
        assert_eq!(TimingStyle::Linux.time_flag(), "-v");
    }
}
