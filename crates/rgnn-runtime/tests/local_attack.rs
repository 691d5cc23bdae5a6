//! End-to-end local attack experiments on a small graph.

use rgnn_runtime::prelude::*;

/// Five nodes; node 2 is adjacent to every other node.
fn hub_dataset() -> Dataset {
    let edges = [(2, 0), (2, 1), (2, 3), (2, 4), (0, 1), (3, 4)]
        .into_iter()
        .map(|(source, target)| EdgeRecord {
            source,
            target,
            weight: 1.0,
        })
        .collect();
    let file = DatasetFile {
        n_nodes: 5,
        edges,
        features: vec![
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![0.6, 0.4],
            vec![0.0, 1.0],
            vec![0.0, 1.0],
        ],
        labels: vec![0, 0, 0, 1, 1],
        split: Some(Split {
            train: vec![0, 3],
            val: vec![],
            test: vec![1, 2, 4],
        }),
    };
    Dataset::prepare("hub", file, PrepOptions::default(), 0).unwrap()
}

fn surrogate() -> LinearPprModel {
    LinearPprModel::new(
        "Linear PPR",
        vec![vec![3.0, -3.0], vec![-3.0, 3.0]],
        vec![0.0, 0.0],
        PprConfig::new(0.15, 1e-6, 5, PprNormalization::Row),
    )
    .unwrap()
}

fn attack_params() -> LocalAttackConfig {
    LocalAttackConfig {
        epochs: 6,
        resample_epochs: 2,
        n_final_samples: 6,
        seed: 1,
        ..LocalAttackConfig::default()
    }
}

fn experiment(attack: AttackKind) -> LocalExperimentConfig {
    LocalExperimentConfig {
        attack,
        attack_params: attack_params(),
        epsilons: vec![0.5],
        nodes: Some(vec![2]),
        node_selection: NodeSelection::default(),
        seed: 0,
        surrogate_label: "Linear PPR".into(),
        ppr_storage_type: Some("ppr".into()),
        pert_storage_type: Some("pert_local".into()),
    }
}

#[test]
fn half_degree_budget_flips_two_symmetric_pairs() {
    let dataset = hub_dataset();
    let model = surrogate();
    assert_eq!(dataset.graph.degree(2).unwrap(), 4.0);
    assert_eq!(local_budget(0.5, 4.0), 2);

    let mut adversary = AttackKind::LocalBatchedPrbcd
        .build(&dataset, &model, &dataset.split.test, attack_params(), None)
        .unwrap();
    adversary.attack(2, 2).unwrap();

    let edges = adversary.perturbed_edges();
    assert_eq!(edges.len(), 2);
    assert!(edges.iter().all(|&(u, v)| u == 2 && v != 2));

    let perturbed = match adversary.perturbe_graph(2, true).unwrap() {
        PerturbedGraph::Adjacency(adj) => adj,
        other => panic!("expected an adjacency, got {:?}", other),
    };
    assert!(perturbed.is_symmetric());
    let changed = changed_entries(dataset.graph.adjacency(), &perturbed);
    assert_eq!(changed.len(), 4);
    for &(u, v) in &edges {
        assert!(changed.contains(&(u, v)));
        assert!(changed.contains(&(v, u)));
    }
}

#[test]
fn experiment_reports_statistics_per_victim() {
    let dataset = hub_dataset();
    let model = surrogate();
    let victims = [Victim {
        label: "Linear PPR".into(),
        model: &model,
    }];
    let mut store = MemoryStore::new();

    let report = run_local_experiment(
        &dataset,
        &model,
        &victims,
        &experiment(AttackKind::LocalBatchedPrbcd),
        Some(&mut store),
    )
    .unwrap();
    let results = report.into_results().unwrap();
    assert_eq!(results.len(), 1);

    let result = &results[0];
    assert_eq!(result.node_id, 2);
    assert_eq!(result.n_perturbations, 2);
    assert_eq!(result.degree, 4.0);
    assert_eq!(result.target, 0);
    assert_eq!(result.perturbed_edges.len(), 2);
    assert_eq!(result.logits.len(), 2);
    let expected_margin = result.statistics.confidence_target - result.statistics.confidence_non_target;
    assert!((result.statistics.margin - expected_margin).abs() < 1e-12);

    assert_eq!(store.entries("ppr").unwrap().len(), 1);
    assert_eq!(store.entries("pert_local").unwrap().len(), 1);
}

#[test]
fn cached_perturbations_are_replayed() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = hub_dataset();
    let model = surrogate();
    let victims = [Victim {
        label: "Linear PPR".into(),
        model: &model,
    }];
    let config = experiment(AttackKind::LocalBatchedPrbcd);

    let mut store = FileStore::open(dir.path()).unwrap();
    let first = run_local_experiment(&dataset, &model, &victims, &config, Some(&mut store))
        .unwrap()
        .into_results()
        .unwrap();

    let mut reopened = FileStore::open(dir.path()).unwrap();
    let second = run_local_experiment(&dataset, &model, &victims, &config, Some(&mut reopened))
        .unwrap()
        .into_results()
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(reopened.entries("pert_local").unwrap().len(), 1);
    assert_eq!(reopened.entries("ppr").unwrap().len(), 1);
}

#[test]
fn failed_units_do_not_abort_the_batch() {
    let dataset = hub_dataset();
    let model = surrogate();
    let victims = [Victim {
        label: "Linear PPR".into(),
        model: &model,
    }];
    let config = LocalExperimentConfig {
        nodes: Some(vec![99, 2]),
        ppr_storage_type: None,
        pert_storage_type: None,
        ..experiment(AttackKind::LocalBatchedPrbcd)
    };

    let report = run_local_experiment(&dataset, &model, &victims, &config, None).unwrap();
    let failures: Vec<&UnitFailure> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].node, 99);
    assert_eq!(failures[0].stage, Stage::Attack);
    assert_eq!(report.into_results().unwrap().len(), 1);
}

#[test]
fn invalid_epsilons_fail_before_any_work() {
    let dataset = hub_dataset();
    let model = surrogate();
    let victims = [Victim {
        label: "Linear PPR".into(),
        model: &model,
    }];
    let mut store = MemoryStore::new();
    let config = LocalExperimentConfig {
        epsilons: vec![1.0, 0.5],
        ..experiment(AttackKind::LocalBatchedPrbcd)
    };

    let outcome = run_local_experiment(&dataset, &model, &victims, &config, Some(&mut store));
    assert!(matches!(outcome, Err(RgnnError::Config(_))));
    assert!(store.is_empty());
}

#[test]
fn every_update_mode_resolves_the_full_budget() {
    let dataset = hub_dataset();
    let model = surrogate();

    let mut full = AttackKind::LocalPrbcd
        .build(&dataset, &model, &dataset.split.test, attack_params(), None)
        .unwrap();
    full.attack(2, 2).unwrap();
    assert_eq!(full.perturbed_edges().len(), 2);

    let recalc_params = LocalAttackConfig {
        ppr_update: PprUpdateMode::RecalcAtEnd,
        ..attack_params()
    };
    let mut recalc = AttackKind::LocalBatchedPrbcd
        .build(&dataset, &model, &dataset.split.test, recalc_params.clone(), None)
        .unwrap();
    recalc.attack(2, 2).unwrap();
    let row = recalc.perturbation().unwrap().ppr_row;
    // alpha + 2 keeps all mass on the target
    assert_eq!(row.nnz(), 1);
    assert!((row.get(2) - 2.15).abs() < 1e-12);

    assert!(AttackKind::LocalPrbcd
        .build(&dataset, &model, &dataset.split.test, recalc_params, None)
        .is_err());
}

#[test]
fn nodes_are_selected_from_the_test_split() {
    let dataset = hub_dataset();
    let model = surrogate();
    let selection = NodeSelection {
        topk: 1,
        min_degree: 2.0,
        seed: 3,
    };
    let nodes = select_attack_nodes(&dataset, &model, &dataset.split.test, &selection).unwrap();
    assert_eq!(nodes.len(), 3);
    let mut sorted = nodes.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![1, 2, 4]);
}
