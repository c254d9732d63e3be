use std::sync::Arc;
use std::time::{Duration, Instant};

use tablewise::calendar::{DayRule, WeekDay};
use tablewise::capability::{Capabilities, InMemoryCatalog, InMemoryIdentity, SystemClock};
use tablewise::engine::{Engine, EngineError, EngineSettings};
use tablewise::model::*;
use ulid::Ulid;

const HOUR: i64 = 3_600_000; // 1 hour in ms
/// 2024-01-01T00:00:00Z
const BASE: i64 = 1_704_067_200_000;

struct Bench {
    engine: Arc<Engine>,
    catalog: Arc<InMemoryCatalog>,
    identity: Arc<InMemoryIdentity>,
    calendar_id: Ulid,
}

impl Bench {
    async fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join("tablewise_bench");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{name}.wal"));
        let _ = std::fs::remove_file(&path);

        let catalog = Arc::new(InMemoryCatalog::new());
        let identity = Arc::new(InMemoryIdentity::new());
        let caps = Capabilities {
            catalog: catalog.clone(),
            identity: identity.clone(),
            clock: Arc::new(SystemClock),
        };
        let engine = Arc::new(Engine::open(EngineSettings::new(path), caps).await.unwrap());
        let calendar_id = engine
            .define_calendar(WeekDay::ALL.iter().map(|&d| DayRule::open(d, 1, 86_400)).collect())
            .await
            .unwrap();
        Self { engine, catalog, identity, calendar_id }
    }

    fn table(&self) -> Ulid {
        let id = Ulid::new();
        self.catalog.upsert(Resource { id, label: None, active: true, calendar_id: self.calendar_id });
        id
    }

    fn guest(&self) -> Ulid {
        let id = Ulid::new();
        self.identity.add_user(id);
        id
    }
}

fn request(user_id: Ulid, resource_id: Ulid, slot: i64) -> NewReservation {
    NewReservation {
        user_id,
        resource_id,
        start_at: BASE + slot * HOUR,
        end_at: BASE + (slot + 1) * HOUR,
        party_size: 2,
        is_party: false,
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential() {
    let bench = Bench::new("sequential").await;
    let table = bench.table();

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let req = request(bench.guest(), table, i as i64);
        let t = Instant::now();
        bench.engine.create_reservation(req).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} admissions in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("admission latency", &mut latencies);
}

async fn phase2_concurrent() {
    let bench = Arc::new(Bench::new("concurrent").await);
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let bench = bench.clone();
        let table = bench.table();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                let req = request(bench.guest(), table, j as i64);
                bench.engine.create_reservation(req).await.unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tables x {n_per_task} admissions = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load() {
    let bench = Arc::new(Bench::new("read_under_load").await);
    let table = bench.table();
    for i in 0..200 {
        bench.engine.create_reservation(request(bench.guest(), table, i * 2)).await.unwrap();
    }

    // Writers admit on their own tables in the background.
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let bench = bench.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let wtable = bench.table();
            let mut i = 0i64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let _ = bench.engine.create_reservation(request(bench.guest(), wtable, i)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let bench = bench.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                bench
                    .engine
                    .open_windows(table, BASE, BASE + 30 * 24 * HOUR)
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("open_windows query", &mut all_latencies);
}

async fn phase4_contention_storm() {
    let bench = Arc::new(Bench::new("contention").await);
    let table = bench.table();
    let n_guests = 500;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_guests {
        let bench = bench.clone();
        handles.push(tokio::spawn(async move {
            bench.engine.create_reservation(request(bench.guest(), table, 0)).await
        }));
    }

    let mut admitted = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(EngineError::OverlapConflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let elapsed = start.elapsed();
    assert_eq!(admitted, 1, "exactly one guest may win the slot");
    println!(
        "  {n_guests} guests, one slot: {admitted} admitted, {conflicts} conflicts in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    println!("=== tablewise stress benchmark ===\n");

    println!("[phase 1] sequential admission throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent admission throughput");
    phase2_concurrent().await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load().await;

    println!("\n[phase 4] contention storm on one slot");
    phase4_contention_storm().await;

    println!("\n=== done ===");
}
