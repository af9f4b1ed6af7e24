//! 变异体缓存：同一工程内容只评估一次（仅修复阶段使用）

use std::collections::HashMap;

use crate::evolution::types::EvaluationRecord;
use crate::workspace::ArtifactRef;

/// 首次出现该指纹的个体及其当代结果
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub first_seen: ArtifactRef,
    pub record: EvaluationRecord,
}

#[derive(Debug, Default)]
pub struct MutantCache {
    entries: HashMap<String, CacheEntry>,
}

impl MutantCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, fingerprint: &str) -> Option<&CacheEntry> {
        self.entries.get(fingerprint)
    }

    /// 只追加：已存在的指纹保留第一次的结果
    pub fn register(&mut self, fingerprint: String, first_seen: ArtifactRef, record: EvaluationRecord) {
        self.entries
            .entry(fingerprint)
            .or_insert(CacheEntry { first_seen, record });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::types::EvalMethod;
    use crate::harness::OutcomeCounts;

    #[test]
    fn test_first_registration_wins() {
        let mut cache = MutantCache::new();
        let counts = OutcomeCounts {
            successes: 4,
            ..Default::default()
        };
        let first = EvaluationRecord::from_counts(1, 400.0, &counts, None, EvalMethod::Noise);
        let second = EvaluationRecord::from_counts(2, 900.0, &counts, None, EvalMethod::Noise);

        cache.register("abc".into(), ArtifactRef::new(1, 3), first);
        cache.register("abc".into(), ArtifactRef::new(2, 5), second);

        let entry = cache.lookup("abc").unwrap();
        assert_eq!(entry.first_seen, ArtifactRef::new(1, 3));
        assert_eq!(entry.record.score, 400.0);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("def").is_none());
    }
}
