/// Benchmarks for reading result trees: histogram merging and root-cause scheduling
/// over an already analyzed version pair.
use criterion::{criterion_group, criterion_main, Criterion};
use perfci::analysis::{HistogramReader, HistogramRun};
use perfci::config::{CauseSearchStrategy, IncludeFilter, MeasurementConfig};
use perfci::folders::ResultsFolders;
use perfci::rca::{CallTreeNode, ChangeCauseScheduler, NodeMeasurer};
use perfci::stages::{CauseSearchConfig, CauseSearchers};
use perfci::types::{Change, ChangeDirection, Changes, TestCase, VersionPair};
use perfci::utils::write_json_atomic;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

const TESTS: usize = 50;
const RUNS: usize = 10;

/// Set up a result tree with stored histograms and fresh runs
///
/// # Returns
/// * `(TempDir, ResultsFolders, VersionPair)` - Temporary directory, layout and pair
fn setup_result_tree() -> (TempDir, ResultsFolders, VersionPair) {
    let temp_dir = TempDir::new().unwrap();
    let folders = ResultsFolders::new(temp_dir.path(), "bench");
    let pair = VersionPair::new("v2", "v1").unwrap();
    let config = MeasurementConfig::default();

    for t in 0..TESTS {
        let test = TestCase::new("de.bench.BenchTest", &format!("test{}", t));
        for r in 0..RUNS {
            let run = HistogramRun {
                config: config.clone(),
                before: (0..100).map(|i| 100.0 + (i % 7) as f64).collect(),
                current: (0..100).map(|i| 110.0 + (i % 5) as f64).collect(),
            };
            let file = folders
                .histogram_runs_dir(&pair, &test)
                .join(format!("run-{:03}.json", r));
            write_json_atomic(&file, &run).unwrap();
        }
    }

    (temp_dir, folders, pair)
}

/// Benchmark histogram merging
///
/// # Arguments
/// * `c` - Criterion benchmark configuration
fn bench_histograms(c: &mut Criterion) {
    let mut group = c.benchmark_group("histograms");
    let (_temp_dir, folders, pair) = setup_result_tree();

    group.bench_function("read_fresh_runs", |b| {
        b.iter(|| {
            let mut reader =
                HistogramReader::new(MeasurementConfig::default(), folders.clone(), pair.clone());
            reader.read_measurements().unwrap()
        });
    });

    group.finish();
}

struct FlatMeasurer;

impl NodeMeasurer for FlatMeasurer {
    fn call_tree(&self, test: &TestCase, _config: &CauseSearchConfig) -> anyhow::Result<CallTreeNode> {
        Ok(CallTreeNode::with_children(
            test.qualified_name(),
            (0..20).map(|i| CallTreeNode::leaf(&format!("Callee#m{}", i))).collect(),
        ))
    }

    fn changed_nodes(
        &self,
        _test: &TestCase,
        call_paths: &[String],
        _config: &CauseSearchConfig,
    ) -> anyhow::Result<BTreeSet<String>> {
        Ok(call_paths.iter().take(1).cloned().collect())
    }
}

/// Benchmark scheduling over a pair whose changes are all analyzed already
///
/// # Arguments
/// * `c` - Criterion benchmark configuration
fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");
    let rt = Runtime::new().unwrap();
    let (_temp_dir, folders, pair) = setup_result_tree();

    let mut changes = Changes::default();
    for t in 0..TESTS {
        changes.add_change(
            "de.bench.BenchTest",
            Change {
                method: format!("test{}", t),
                direction: ChangeDirection::Slower,
                change_percent: 10.0,
                t_value: 3.0,
                old_time: 100.0,
            },
        );
    }
    let scheduler = ChangeCauseScheduler::new(
        folders,
        pair,
        IncludeFilter::default(),
        MeasurementConfig::default(),
        CauseSearchers::from_node_measurer(Arc::new(FlatMeasurer)),
    )
    .with_workers(num_cpus::get());
    rt.block_on(scheduler.schedule(&changes, CauseSearchStrategy::LevelWise));

    group.bench_function("skip_analyzed", |b| {
        b.iter(|| rt.block_on(scheduler.schedule(&changes, CauseSearchStrategy::LevelWise)));
    });

    group.finish();
}

criterion_group!(benches, bench_histograms, bench_scheduler);
criterion_main!(benches);
