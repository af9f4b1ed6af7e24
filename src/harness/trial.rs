//! 试验执行器：运行一次测试套件并分类结果
//!
//! 子进程的 stdout / stderr 由独立任务读入有上限的缓冲区（避免管道写满导致双方互等）；
//! 主循环按固定间隔轮询进程状态并扣减剩余时间。超时后先发 SIGQUIT 让 JVM 打印线程 / 锁转储，
//! 等待片刻再强制终止，然后检查输出中是否有死锁证据。

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::config::{ProjectSection, TestingSection};
use crate::harness::outcome::{
    JUnitOutcomeParser, OutcomeParser, RawTrialOutput, TestMode, TimingStyle, TrialOutcome,
};

/// 单次试验执行接口（批量测试器依赖它，测试中可替换为固定结果）
#[async_trait]
pub trait TrialRunner: Send + Sync {
    async fn run_trial(&self, mode: TestMode) -> TrialOutcome;

    /// 计时运行一次当前工作区，把超时调整为耗时的 multiplier 倍；返回新的超时
    async fn calibrate_timeout(&self, _multiplier: u32) -> Option<Duration> {
        None
    }
}

/// 校准后的超时不低于这个值
const MIN_CALIBRATED_TIMEOUT: Duration = Duration::from_secs(1);

/// 耗时 × multiplier，限制在 [1s, ceiling] 内
pub fn derive_timeout(elapsed: Duration, multiplier: u32, ceiling: Duration) -> Duration {
    elapsed
        .saturating_mul(multiplier.max(1))
        .max(MIN_CALIBRATED_TIMEOUT)
        .min(ceiling)
}

/// 试验执行参数
#[derive(Debug, Clone)]
pub struct TrialSettings {
    pub working_dir: PathBuf,
    pub test_command: Vec<String>,
    /// 超时上限，校准结果不会超过它
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// 诊断信号与强制终止之间的等待
    pub kill_grace: Duration,
    pub output_limit: usize,
    pub timing: TimingStyle,
    pub time_binary: PathBuf,
}

impl TrialSettings {
    pub fn from_config(project: &ProjectSection, testing: &TestingSection) -> Self {
        Self {
            working_dir: project.work_dir.clone(),
            test_command: project.test_command.clone(),
            timeout: Duration::from_secs(testing.timeout_secs),
            poll_interval: Duration::from_millis(testing.poll_interval_ms.max(1)),
            kill_grace: Duration::from_millis(testing.kill_grace_ms),
            output_limit: testing.output_limit_bytes,
            timing: TimingStyle::from_config(&testing.timing_style),
            time_binary: testing.time_binary.clone(),
        }
    }
}

/// 基于子进程的试验执行器
pub struct TrialExecutor {
    settings: TrialSettings,
    parser: Arc<dyn OutcomeParser>,
    trials: AtomicU64,
    /// 当前生效的超时（毫秒）
    timeout_ms: AtomicU64,
}

impl TrialExecutor {
    pub fn new(settings: TrialSettings, parser: Arc<dyn OutcomeParser>) -> Self {
        let timeout_ms = AtomicU64::new(settings.timeout.as_millis() as u64);
        Self {
            settings,
            parser,
            trials: AtomicU64::new(0),
            timeout_ms,
        }
    }

    /// 使用 JUnit 文本解析器
    pub fn with_junit_parser(settings: TrialSettings, deadlock_markers: Vec<String>) -> Self {
        let parser = JUnitOutcomeParser::new(deadlock_markers, settings.timing);
        Self::new(settings, Arc::new(parser))
    }

    pub fn settings(&self) -> &TrialSettings {
        &self.settings
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    fn command(&self, mode: TestMode) -> std::io::Result<Command> {
        let (program, rest) = self.settings.test_command.split_first().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "test command is empty")
        })?;

        let mut cmd = match mode {
            TestMode::Functional => {
                let mut c = Command::new(program);
                c.args(rest);
                c
            }
            TestMode::Performance => {
                let mut c = Command::new(&self.settings.time_binary);
                c.arg(self.settings.timing.time_flag());
                c.arg(program);
                c.args(rest);
                c
            }
        };
        cmd.current_dir(&self.settings.working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    /// 运行一次并收集原始输出；任何提前返回都会因 kill_on_drop 回收子进程
    pub async fn execute(&self, mode: TestMode) -> std::io::Result<RawTrialOutput> {
        let mut child = self.command(mode)?.spawn()?;
        let limit = self.settings.output_limit;
        let mut stdout_task = tokio::spawn(read_bounded(child.stdout.take(), limit));
        let mut stderr_task = tokio::spawn(read_bounded(child.stderr.take(), limit));

        let mut remaining = self.timeout();
        let timed_out = loop {
            if child.try_wait()?.is_some() {
                break false;
            }
            if remaining.is_zero() {
                break true;
            }
            let step = self.settings.poll_interval.min(remaining);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        };

        if timed_out {
            send_diagnostic_signal(&child);
            tokio::time::sleep(self.settings.kill_grace).await;
            if let Err(e) = child.kill().await {
                tracing::debug!("kill after timeout failed (process may have exited): {}", e);
            }
        } else {
            child.wait().await?;
        }

        // 子进程的后代可能仍持有管道，读取任务只等有限时间
        let drain = self.settings.kill_grace.max(Duration::from_secs(1));
        let stdout = join_reader(&mut stdout_task, drain).await;
        let stderr = join_reader(&mut stderr_task, drain).await;

        Ok(RawTrialOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out,
        })
    }
}

#[async_trait]
impl TrialRunner for TrialExecutor {
    async fn run_trial(&self, mode: TestMode) -> TrialOutcome {
        let n = self.trials.fetch_add(1, Ordering::Relaxed) + 1;
        match self.execute(mode).await {
            Ok(raw) => {
                let outcome = self.parser.classify(&raw, mode);
                tracing::info!(
                    trial = n,
                    outcome = outcome.label(),
                    timed_out = raw.timed_out,
                    "Test {} - {}",
                    n,
                    outcome.label()
                );
                outcome
            }
            Err(e) => {
                tracing::warn!(trial = n, "Test {} - could not run test process: {}", n, e);
                TrialOutcome::Error
            }
        }
    }

    async fn calibrate_timeout(&self, multiplier: u32) -> Option<Duration> {
        let ceiling = self.settings.timeout;
        let started = Instant::now();
        let raw = match self.execute(TestMode::Functional).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Could not time a clean test run, keeping {:?}: {}", ceiling, e);
                return None;
            }
        };
        if raw.timed_out {
            tracing::warn!(?ceiling, "Clean test run hit the configured timeout, keeping it");
            return None;
        }
        let elapsed = started.elapsed();
        let timeout = derive_timeout(elapsed, multiplier, ceiling);
        self.timeout_ms.store(timeout.as_millis() as u64, Ordering::Relaxed);
        tracing::info!(?elapsed, multiplier, "Using a timeout value of {:.1}s", timeout.as_secs_f64());
        Some(timeout)
    }
}

/// 读取到 EOF；超出上限的部分读出后丢弃，保证管道不会写满
async fn read_bounded<R>(reader: Option<R>, limit: usize) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let Some(mut reader) = reader else {
        return buf;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                tracing::debug!("output pipe read failed: {}", e);
                break;
            }
        }
    }
    buf
}

async fn join_reader(task: &mut JoinHandle<Vec<u8>>, wait: Duration) -> Vec<u8> {
    match tokio::time::timeout(wait, &mut *task).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(e)) => {
            tracing::debug!("output reader task failed: {}", e);
            Vec::new()
        }
        Err(_) => {
            task.abort();
            Vec::new()
        }
    }
}

#[cfg(unix)]
fn send_diagnostic_signal(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGQUIT) {
            tracing::debug!(pid, "SIGQUIT failed: {}", e);
        }
    }
}

#[cfg(not(unix))]
fn send_diagnostic_signal(_child: &Child) {}
