//! 测试工具：单次试验执行、结果分类、批量汇总

pub mod batch;
pub mod outcome;
pub mod trial;

pub use batch::{BatchTester, OutcomeCounts};
pub use outcome::{
    JUnitOutcomeParser, OutcomeParser, PerfSample, RawTrialOutput, TestMode, TimingStyle, TrialOutcome,
};
pub use trial::{TrialExecutor, TrialRunner, TrialSettings};
