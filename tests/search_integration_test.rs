//! 两阶段搜索集成测试（内存工作区，不需要 JVM 或构建工具）

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use syncmend::core::{RepairError, SearchConfig, SearchContext, StdRandom};
    use syncmend::evolution::{Collaborators, EvolutionLoop, StopReason};
    use syncmend::start_search;
    use syncmend::workspace::{ArtifactRef, MockWorkspace};

    fn config() -> SearchConfig {
        SearchConfig {
            population: 2,
            generations: 3,
            runs: 2,
            validation_multiplier: 2,
            random_seed: Some(7),
            ..SearchConfig::default()
        }
    }

    fn search(ws: &Arc<MockWorkspace>, config: SearchConfig) -> EvolutionLoop {
        let ctx = SearchContext::new(config, Box::new(StdRandom::seeded(7)));
        EvolutionLoop::new(ctx, Collaborators::from_workspace(ws.clone()))
    }

    #[tokio::test]
    async fn test_fix_is_found_and_exported() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 1)]).with_fix("ASAT", 0));
        let report = search(&ws, config()).run(7).await.unwrap();

        assert!(report.fix_found);
        assert!(!report.optimized);
        assert_eq!(report.stop_reason, StopReason::FixValidated);
        let best = report.best.clone().unwrap();
        assert!(best.validated);
        assert_eq!(report.best_artifact, Some(ArtifactRef::new(1, 1)));
        assert_eq!(ws.exported().await, Some(ArtifactRef::new(1, 1)));
        assert!(report.output_dir.is_some());
        assert!(!report.entrypoint_synchronized);
        assert!(ws.cleaned().await);
    }

    #[tokio::test]
    async fn test_optimization_phase_runs_after_fix() {
        let ws = Arc::new(
            MockWorkspace::new(&[("ASAT", 1)])
                .with_fix("ASAT", 0)
                .with_optimization_sites(&[("RSM", 2)]),
        );
        let config = SearchConfig {
            only_functional: false,
            ..config()
        };
        let report = search(&ws, config).run(7).await.unwrap();

        assert!(report.fix_found);
        assert!(report.optimized);
        assert_eq!(report.stop_reason, StopReason::GenerationLimit);
        assert!(report.baseline_score.is_some());
        // 最优个体来自优化阶段
        let best = report.best.unwrap();
        assert_eq!(best.generation, 2);
        assert!(best.score > 0.0);
        assert_eq!(ws.exported().await, Some(ArtifactRef::new(2, best.id)));
    }

    #[tokio::test]
    async fn test_no_fix_reports_best_without_export() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 2), ("ASIM", 2)]));
        let report = search(&ws, config()).run(7).await.unwrap();

        assert!(!report.fix_found);
        assert_eq!(report.stop_reason, StopReason::GenerationLimit);
        assert!(report.best.is_some());
        assert!(report.output_dir.is_none());
        assert_eq!(ws.exported().await, None);
        assert!(ws.cleaned().await);
    }

    #[tokio::test]
    async fn test_synchronized_entrypoint_is_reported() {
        let ws = Arc::new(
            MockWorkspace::new(&[("ASM", 1)])
                .with_fix("ASM", 0)
                .with_entrypoint_site("ASM", 0),
        );
        let config = SearchConfig {
            exclude_entrypoint: false,
            ..config()
        };
        let report = search(&ws, config).run(7).await.unwrap();
        assert!(report.fix_found);
        assert!(report.entrypoint_synchronized);
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_rejected() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 1)]));
        let config = SearchConfig {
            population: 0,
            ..config()
        };
        let err = start_search(config, Collaborators::from_workspace(ws.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, RepairError::Config(_)));
        assert_eq!(ws.builds().await, 0);
    }

    #[tokio::test]
    async fn test_pristine_without_sites_aborts_search() {
        let ws = Arc::new(MockWorkspace::new(&[]));
        let err = start_search(config(), Collaborators::from_workspace(ws.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, RepairError::NoMutationSites { .. }));
        // 出错时同样清理
        assert!(ws.cleaned().await);
    }

    #[tokio::test]
    async fn test_trial_timeout_is_calibrated_on_pristine_project() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 1)]).with_fix("ASAT", 0));
        let report = start_search(config(), Collaborators::from_workspace(ws.clone()))
            .await
            .unwrap();
        assert!(report.fix_found);
        assert_eq!(ws.calibrations().await, vec![20]);
        // 校准用的原始工程副本用完即删
        assert!(ws.pruned().await.contains(&ArtifactRef::new(0, 1)));

        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 1)]).with_fix("ASAT", 0));
        let config = SearchConfig {
            calibrate_timeout: false,
            ..config()
        };
        start_search(config, Collaborators::from_workspace(ws.clone())).await.unwrap();
        assert!(ws.calibrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_uncompilable_pristine_skips_calibration() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 1)]).with_failing_builds());
        let report = start_search(config(), Collaborators::from_workspace(ws.clone()))
            .await
            .unwrap();
        assert!(!report.fix_found);
        assert!(ws.calibrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_replacement_keeps_population_addressable() {
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 4), ("ASIM", 4), ("ASM", 4)]));
        let config = SearchConfig {
            population: 10,
            generations: 5,
            replace_lowest_percent: 20,
            replace_interval: 1,
            replace_weak_min_turns: 1,
            ..config()
        };
        let mut search = search(&ws, config);
        search.evolve(0).await.unwrap();

        let ids: Vec<u32> = search.population().iter().map(|i| i.id).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
        for ind in search.population() {
            assert_eq!(ind.restarted.len(), ind.replaced.len());
            assert_eq!(ind.restarted.len(), ind.applied_operators.len());
            assert_eq!(ind.score_history().len(), ind.success_history().len());
        }
        assert!(search
            .population()
            .iter()
            .any(|ind| ind.replaced.iter().any(|&r| r) || ind.restarted.iter().any(|&r| r)));
    }

    #[tokio::test]
    async fn test_duplicate_mutants_share_results() {
        // 只有一个变异点：两个个体第一代得到相同的变异体
        let ws = Arc::new(MockWorkspace::new(&[("ASAT", 1)]));
        let config = SearchConfig {
            generations: 2,
            ..config()
        };
        let mut search = search(&ws, config);
        search.evolve(0).await.unwrap();

        // 第一代只测了一次；第二代第一个个体评估后达到代数上限
        assert_eq!(ws.trials().await, 4);
        assert_eq!(search.context().cache.len(), 2);
        let second = &search.population()[1];
        assert_eq!(second.records[0].method, syncmend::evolution::EvalMethod::Cached);
        assert_eq!(second.records[0].generation, 1);
    }
}
