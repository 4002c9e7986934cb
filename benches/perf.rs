use criterion::{Criterion, black_box, criterion_group, criterion_main};
use duckchurn::duration::parse_iso8601;
use duckchurn::identity::{Identity, IdentityCounter, IdentitySource};
use duckchurn::limiter::RateLimiter;
use duckchurn::session::SessionProvider;
use duckchurn::task::{LoadTask, RetireTask, RowPayload};

const SMALL_TABLE_ROWS: u64 = 100;
const REFERENCE_TABLE_ROWS: u64 = 10_000;
const RESIDENT_TABLES: u64 = 100;

fn setup_db(resident: u64, rows: u64) -> (SessionProvider, IdentityCounter) {
    let sessions = SessionProvider::open_in_memory().expect("open");
    let counter = IdentityCounter::new();
    for _ in 0..resident {
        LoadTask::new(counter.next_identity(), rows)
            .execute(&sessions)
            .expect("seed table");
    }
    (sessions, counter)
}

fn bench_churn_hot_paths(c: &mut Criterion) {
    let (sessions, counter) = setup_db(RESIDENT_TABLES, SMALL_TABLE_ROWS);

    // one admission: load the next table, retire the oldest resident one
    c.bench_function("churn_cycle_100_rows_with_100_resident", |b| {
        b.iter(|| {
            let admitted = counter.next_identity();
            let report = LoadTask::new(black_box(admitted), SMALL_TABLE_ROWS)
                .execute(&sessions)
                .expect("load");
            assert!(report.is_intact());
            let evicted = Identity::new(admitted.get() - RESIDENT_TABLES);
            RetireTask::new(evicted).execute(&sessions).expect("retire");
        })
    });

    let mut next_load = 1_000_000_u64;
    c.bench_function("load_reference_table_10000_rows", |b| {
        b.iter(|| {
            let identity = Identity::new(black_box(next_load));
            next_load += 1;
            LoadTask::new(identity, REFERENCE_TABLE_ROWS)
                .execute(&sessions)
                .expect("load");
            RetireTask::new(identity).execute(&sessions).expect("retire");
        })
    });

    c.bench_function("retire_absent_table", |b| {
        b.iter(|| {
            RetireTask::new(black_box(Identity::new(999_999_999)))
                .execute(&sessions)
                .expect("retire");
        })
    });

    c.bench_function("count_resident_tables", |b| {
        let session = sessions.open().expect("session");
        b.iter(|| black_box(session.resident_tables().expect("resident")))
    });
}

fn bench_harness_primitives(c: &mut Criterion) {
    c.bench_function("row_payload_for_index", |b| {
        let mut index = 0_i64;
        b.iter(|| {
            index = (index + 1) % REFERENCE_TABLE_ROWS as i64;
            black_box(RowPayload::for_index(black_box(index)))
        })
    });

    c.bench_function("table_name_formatting", |b| {
        let counter = IdentityCounter::new();
        b.iter(|| black_box(counter.next_identity().table_name()))
    });

    c.bench_function("limiter_try_acquire_saturated", |b| {
        let limiter = RateLimiter::new(1e9, 1.0).expect("limiter");
        b.iter(|| black_box(limiter.try_acquire()))
    });

    c.bench_function("parse_iso8601_day_and_time", |b| {
        b.iter(|| parse_iso8601(black_box("P1DT2H30M15.5S")).expect("parse"))
    });
}

criterion_group!(benches, bench_churn_hot_paths, bench_harness_primitives);
criterion_main!(benches);
