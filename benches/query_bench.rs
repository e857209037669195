use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use revindex::config::{CommitPolicy, PartitionConfig};
use revindex::{
    Change, ChangeStatus, IndexConfig, PartitionedIndex, Predicate, QueryCompiler, SearchOptions,
};

const SUBJECT_WORDS: &[&str] = &[
    "fix", "refresh", "index", "flaky", "test", "cleanup", "speed", "writer", "cursor", "merge",
];

fn make_change(id: i32) -> Change {
    let status = match id % 4 {
        0 => ChangeStatus::Merged,
        1 => ChangeStatus::Abandoned,
        _ => ChangeStatus::New,
    };
    let w = |k: i32| SUBJECT_WORDS[(id * k) as usize % SUBJECT_WORDS.len()];
    Change {
        id,
        change_key: format!("I{:040x}", id),
        project: format!("project-{}", id % 20),
        branch: "main".into(),
        status,
        owner: id % 50,
        reviewers: vec![id % 7, id % 11],
        hashtags: Vec::new(),
        files: vec![format!("src/{}.rs", w(3))],
        subject: format!("{} {} {}", w(1), w(7), w(13)),
        added: id % 500,
        deleted: id % 100,
        created: Utc.timestamp_opt(1_700_000_000 + id as i64 * 60, 0).unwrap(),
        updated: Utc.timestamp_opt(1_700_000_000 + id as i64 * 90, 0).unwrap(),
        metadata: Vec::new(),
    }
}

fn build_index(count: i32) -> PartitionedIndex<Change> {
    let config = IndexConfig::new("changes")
        .with_partition_config(PartitionConfig::default().with_commit(CommitPolicy::Lazy));
    let index = PartitionedIndex::open(
        &config,
        Change::schema().unwrap(),
        Change::partitioner(),
        Change::default_sort(),
    )
    .unwrap();
    let receipts: Vec<_> = (1..=count)
        .map(|id| index.replace(&make_change(id)).unwrap())
        .collect();
    for r in &receipts {
        r.wait_visible(Duration::from_secs(30)).unwrap();
    }
    index
}

fn predicates() -> Vec<(&'static str, Predicate)> {
    vec![
        ("open_by_owner", Predicate::and(vec![
            Predicate::equals("status", "new"),
            Predicate::equals("owner", 7),
        ])),
        ("full_text", Predicate::contains("subject", "flaky test")),
        ("recent_not_merged", Predicate::and(vec![
            Predicate::not(Predicate::equals("status", "merged")),
            Predicate::not(Predicate::timestamp_range(
                "updated",
                None,
                Some(Utc.timestamp_opt(1_700_100_000, 0).unwrap()),
            )),
        ])),
        ("file_prefix", Predicate::prefix("file", "src/in")),
    ]
}

fn bench_compile(c: &mut Criterion) {
    let schema = std::sync::Arc::new(Change::schema().unwrap());
    let compiler = QueryCompiler::new(schema, Default::default(), 1024);
    let mut group = c.benchmark_group("compile");
    for (name, predicate) in predicates() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &predicate, |b, p| {
            b.iter(|| black_box(compiler.compile(p).unwrap()));
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let counts = [1_000, 5_000];
    let indexes: Vec<(i32, PartitionedIndex<Change>)> =
        counts.iter().map(|&n| (n, build_index(n))).collect();
    let options = SearchOptions::default();

    for (name, predicate) in predicates() {
        let mut group = c.benchmark_group(format!("search_{}", name));
        for (count, index) in &indexes {
            group.bench_with_input(BenchmarkId::from_parameter(count), index, |b, index| {
                b.iter(|| black_box(index.search_raw(&predicate, &options).unwrap()));
            });
        }
        group.finish();
    }
    for (_, index) in &indexes {
        index.close();
    }
}

fn bench_replace(c: &mut Criterion) {
    let index = build_index(1_000);
    let mut next = 0i32;
    c.bench_function("replace_and_wait", |b| {
        b.iter(|| {
            next += 1;
            let mut change = make_change(next % 1_000 + 1);
            change.status = if next % 2 == 0 { ChangeStatus::New } else { ChangeStatus::Merged };
            index
                .replace(&change)
                .unwrap()
                .wait_visible(Duration::from_secs(5))
                .unwrap()
        });
    });
    index.close();
}

criterion_group!(benches, bench_compile, bench_search, bench_replace);
criterion_main!(benches);
