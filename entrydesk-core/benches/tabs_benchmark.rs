use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use entrydesk_core::{PathRegistration, Propagation, TabList, TabOptions, VersionPicker};
use std::hint::black_box;

fn filled_list(n: usize) -> TabList {
    let mut list = TabList::new();
    for i in 0..n {
        list.add(TabOptions::new("entries", "entry-editor").title(format!("Entry {i}")));
    }
    // A listener on every notification, as the shell has.
    list.subscribe(|_, event| {
        black_box(&event.tab.title);
        Propagation::Continue
    });
    list
}

fn bench_activate_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("Tabs");
    for size in [8usize, 64] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("activate_each", size), &size, |b, &size| {
            let mut list = filled_list(size);
            let ids: Vec<_> = list.tabs().iter().map(|t| t.id()).collect();
            b.iter(|| {
                for id in &ids {
                    black_box(list.activate(*id));
                }
            })
        });
    }
    group.finish();
}

fn bench_open_close(c: &mut Criterion) {
    c.bench_function("open_activate_close", |b| {
        let mut list = filled_list(16);
        b.iter(|| {
            let id = list.add(TabOptions::new("assets", "asset-editor")).unwrap();
            list.activate(id);
            black_box(list.close_tab(id));
        })
    });
}

fn bench_close_all(c: &mut Criterion) {
    c.bench_function("close_all_64", |b| {
        b.iter_batched(
            || filled_list(64),
            |mut list| list.close_all(),
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_restore_all(c: &mut Criterion) {
    c.bench_function("restore_all_100_paths", |b| {
        let mut picker = VersionPicker::new();
        for i in 0..100 {
            picker.register_path(PathRegistration::new(i % 3 == 0).restore_with(move || {
                black_box(i);
                Ok(())
            }));
        }
        b.iter(|| black_box(picker.restore_all()))
    });
}

criterion_group!(
    benches,
    bench_activate_cycle,
    bench_open_close,
    bench_close_all,
    bench_restore_all
);
criterion_main!(benches);
