use criterion::{criterion_group, criterion_main, Criterion};
use medicare_core::{Appointment, AppointmentPatch, AppointmentStatus, OrderBy, RemoteDocument};
use medicare_sync::memory::demo_appointment;
use medicare_sync::SnapshotState;
use std::hint::black_box;

fn documents(n: usize) -> Vec<RemoteDocument> {
    // Reverse wire order so every push has to be sorted
    (0..n)
        .rev()
        .map(|i| {
            let record = demo_appointment(&format!("a{i}"), i as i64, "pending");
            RemoteDocument::from_record(&record).unwrap()
        })
        .collect()
}

fn bench_push_1k(c: &mut Criterion) {
    let docs = documents(1_000);

    c.bench_function("apply_push_1k", |b| {
        b.iter(|| {
            let mut state: SnapshotState<Appointment> = SnapshotState::new(OrderBy::desc("createdAt"));
            black_box(state.apply_push(black_box(&docs)));
        })
    });
}

fn bench_push_with_intents(c: &mut Criterion) {
    let docs = documents(1_000);
    let mut state: SnapshotState<Appointment> = SnapshotState::new(OrderBy::desc("createdAt"));
    state.apply_push(&docs);
    for i in (0..1_000).step_by(10) {
        state
            .begin_update(&format!("a{i}"), AppointmentPatch::status(AppointmentStatus::Confirmed))
            .unwrap();
    }

    c.bench_function("apply_push_1k_100_in_flight", |b| {
        b.iter(|| {
            black_box(state.apply_push(black_box(&docs)));
        })
    });
}

fn bench_view(c: &mut Criterion) {
    let docs = documents(1_000);
    let mut state: SnapshotState<Appointment> = SnapshotState::new(OrderBy::desc("createdAt"));
    state.apply_push(&docs);

    c.bench_function("view_1k", |b| {
        b.iter(|| black_box(state.view()))
    });

    for i in (0..1_000).step_by(10) {
        state
            .begin_update(&format!("a{i}"), AppointmentPatch::notes("follow-up"))
            .unwrap();
    }
    c.bench_function("view_1k_100_in_flight", |b| {
        b.iter(|| black_box(state.view()))
    });
}

fn bench_update_resolve(c: &mut Criterion) {
    let docs = documents(100);
    let mut state: SnapshotState<Appointment> = SnapshotState::new(OrderBy::desc("createdAt"));
    state.apply_push(&docs);

    c.bench_function("update_then_confirm", |b| {
        b.iter(|| {
            let seq = state
                .begin_update("a50", AppointmentPatch::status(AppointmentStatus::Confirmed))
                .unwrap();
            black_box(state.resolve("a50", seq, true));
        })
    });
}

criterion_group!(
    benches,
    bench_push_1k,
    bench_push_with_intents,
    bench_view,
    bench_update_resolve,
);
criterion_main!(benches);
