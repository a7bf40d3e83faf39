//! Microbenchmarks for the fixed-capacity primitives on the manager's hot
//! paths: group block allocation and descriptor lookup churn.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use chunk_manager::stdx::{AllocBitset, HashedSet, SetEntry, NONE_ID};

#[derive(Debug)]
struct BenchEntry {
    id: i64,
    next: i32,
}

impl Default for BenchEntry {
    fn default() -> Self {
        Self { id: NONE_ID, next: -1 }
    }
}

impl SetEntry for BenchEntry {
    fn id(&self) -> i64 {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
    fn next_in_chain(&self) -> i32 {
        self.next
    }
    fn set_next_in_chain(&mut self, next: i32) {
        self.next = next;
    }
    fn reset(&mut self) {
        *self = Self::default();
    }
}

fn bench_bitset_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitset_allocate_free");
    for &bits in &[256usize, 4096] {
        for &group_size in &[1usize, 8, 32] {
            group.bench_with_input(
                BenchmarkId::new(format!("{bits}bits"), group_size),
                &group_size,
                |b, &n| {
                    let mut set = AllocBitset::empty(bits);
                    // Fragment the low words so the scan does real work.
                    let mut warm = vec![0usize; bits / 2];
                    assert!(set.allocate(&mut warm));
                    let freed: Vec<usize> = warm.iter().copied().step_by(3).collect();
                    set.free(&freed);

                    let mut out = vec![0usize; n];
                    b.iter(|| {
                        assert!(set.allocate(black_box(&mut out)));
                        set.free(black_box(&out));
                    });
                },
            );
        }
    }
    group.finish();
}

fn bench_hashed_set_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashed_set");
    for &cap in &[64usize, 1024] {
        group.bench_with_input(BenchmarkId::new("insert_find_erase", cap), &cap, |b, &cap| {
            let mut set: HashedSet<BenchEntry> = HashedSet::new(cap);
            // Half full steady state, like a manager under load.
            for id in 0..(cap as i64 / 2) {
                set.insert(id).unwrap();
            }
            let mut cursor = cap as i64 / 2;
            b.iter(|| {
                let id = cursor;
                cursor += 1;
                set.insert(black_box(id)).unwrap();
                black_box(set.find(black_box(id - cap as i64 / 4)));
                assert!(set.erase(black_box(id)));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_bitset_allocate, bench_hashed_set_churn);
criterion_main!(benches);
