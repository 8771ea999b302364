//! Benchmark for devd line parsing and event routing
//!
//! Target: 50K routed events/sec on a 64-disk pool

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use vdevd::router::{EventQueue, EventRouter, RouterContext};
use vdevd::{
    CaseRegistry, DeferredQueue, Event, EventFactory, InMemoryCaseRegistry, PoolGuid, RescanFlag,
    RouterMetrics, SnapshotBackend, TopologyReader, Vdev, VdevGuid, VdevState,
};

const POOL: PoolGuid = PoolGuid(42);
const DISKS: u64 = 64;

fn wide_pool() -> Arc<SnapshotBackend> {
    let backend = SnapshotBackend::new();
    let leaves = (1..=DISKS)
        .map(|i| {
            Vdev::disk(POOL, VdevGuid(i), VdevState::Healthy).with_path(format!("/dev/da{}", i))
        })
        .collect();
    backend.add_pool("tank", POOL, leaves);
    Arc::new(backend)
}

fn router_over(
    backend: Arc<SnapshotBackend>,
) -> (EventRouter, Arc<InMemoryCaseRegistry>, Arc<EventQueue>) {
    let cases = InMemoryCaseRegistry::new(backend.clone(), backend.clone());
    let queue = Arc::new(EventQueue::new());
    let router = EventRouter::new(RouterContext {
        topology: backend.clone(),
        storage: backend,
        cases: cases.clone(),
        deferred: queue.clone(),
        control: Arc::new(RescanFlag::new()),
        metrics: Arc::new(RouterMetrics::new().unwrap()),
    });
    (router, cases, queue)
}

fn bench_parse_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_factory");
    group.throughput(Throughput::Elements(1));

    let factory = EventFactory::default();
    let zfs = "!system=ZFS subsystem=ZFS type=ereport.fs.zfs.io class=ereport.fs.zfs.io \
pool_guid=42 pool_context=0 vdev_guid=17 vdev_type=disk vdev_path=/dev/da17 \
zio_err=5 zio_offset=0x12000 zio_size=0x1000";
    let devfs = "!system=DEVFS subsystem=CDEV type=CREATE cdev=da17";

    group.bench_function("parse_zfs_line", |b| {
        b.iter(|| {
            let _ = factory.build(black_box(zfs));
        });
    });

    group.bench_function("parse_devfs_line", |b| {
        b.iter(|| {
            let _ = factory.build(black_box(devfs));
        });
    });

    group.finish();
}

fn bench_route_existing_case(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_router");
    group.throughput(Throughput::Elements(1));

    let backend = wide_pool();
    let (router, cases, _queue) = router_over(backend.clone());
    for i in 1..=DISKS {
        backend.set_vdev_state(POOL, VdevGuid(i), VdevState::Faulted);
        if let Some(vdev) = backend.pool(POOL).and_then(|p| p.vdev(VdevGuid(i))) {
            cases.create(&vdev);
        }
    }

    group.bench_function("route_to_open_case", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let vdev = (counter % DISKS + 1).to_string();
            let event = Event::zfs(&[
                ("class", "ereport.fs.zfs.checksum"),
                ("pool_guid", "42"),
                ("vdev_guid", vdev.as_str()),
            ]);
            router.dispatch(black_box(&event));
        });
    });

    group.finish();
}

fn bench_replay_unknown_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_router");
    group.throughput(Throughput::Elements(100));

    let (router, _cases, queue) = router_over(wide_pool());
    let events: Vec<Event> = (1..=100)
        .map(|i| {
            let vdev = i.to_string();
            Event::zfs(&[
                ("class", "ereport.fs.zfs.io"),
                ("pool_guid", "99"),
                ("vdev_guid", vdev.as_str()),
            ])
        })
        .collect();

    group.bench_function("defer_and_replay_100", |b| {
        b.iter(|| {
            for event in &events {
                router.dispatch(event);
            }
            router.replay_deferred(true);
            black_box(queue.len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_parse_lines,
    bench_route_existing_case,
    bench_replay_unknown_pool,
);
criterion_main!(benches);
