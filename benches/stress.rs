use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, NaiveTime};
use ulid::Ulid;

use slotkeep::engine::{Engine, TemplateCache};
use slotkeep::model::{GenerateRequest, HoursConfig};
use slotkeep::notify::NotifyHub;

const TTL: Duration = Duration::from_secs(600);

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn hours() -> HoursConfig {
    HoursConfig::new(
        NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        15,
    )
}

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
}

fn open_engine() -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("slotkeep_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path: PathBuf = dir.join("slots.wal");
    Arc::new(
        Engine::new(
            path,
            Arc::new(NotifyHub::new()),
            Arc::new(TemplateCache::new(100)),
        )
        .unwrap(),
    )
}

async fn phase1_sequential_holds(engine: &Engine) {
    let biz = Ulid::new();
    let mut latencies = Vec::new();
    let start = Instant::now();

    for offset in 0..20u64 {
        let date = start_date() + Days::new(offset);
        let open = engine.available_slots(biz, date, &hours()).await.unwrap();
        for slot in open {
            let t = Instant::now();
            engine.hold_slot(slot.id, biz, TTL).await.unwrap();
            latencies.push(t.elapsed());
        }
    }

    let elapsed = start.elapsed();
    let n = latencies.len();
    println!(
        "  {n} holds in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("hold latency", &mut latencies);
}

async fn phase2_contended_holds(engine: Arc<Engine>) {
    let biz = Ulid::new();
    let open = engine
        .available_slots(biz, start_date(), &hours())
        .await
        .unwrap();
    let n_tasks = 64;

    let wins = Arc::new(AtomicUsize::new(0));
    let losses = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        let open = open.clone();
        let wins = wins.clone();
        let losses = losses.clone();
        handles.push(tokio::spawn(async move {
            for slot in open {
                match engine.hold_slot(slot.id, biz, TTL).await {
                    Ok(_) => wins.fetch_add(1, Ordering::Relaxed),
                    Err(e) if e.is_contention() => losses.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let wins = wins.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {} slots in {:.2}s: {wins} won, {} lost",
        open.len(),
        start.elapsed().as_secs_f64(),
        losses.load(Ordering::Relaxed)
    );
    assert_eq!(wins, open.len(), "every slot must be won exactly once");
}

async fn phase3_reads_under_load(engine: Arc<Engine>) {
    let biz = Ulid::new();
    engine
        .ensure_generated(biz, start_date(), &hours())
        .await
        .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..4u64 {
        let engine = engine.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let wbiz = Ulid::new();
            let mut offset = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let date = start_date() + Days::new(w * 1000 + offset);
                if let Ok(open) = engine.available_slots(wbiz, date, &hours()).await {
                    for slot in open.iter().step_by(3) {
                        let _ = engine.hold_slot(slot.id, wbiz, TTL).await;
                    }
                }
                offset += 1;
            }
        }));
    }

    let mut readers = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(500);
            for _ in 0..500 {
                let t = Instant::now();
                engine
                    .available_slots(biz, start_date(), &hours())
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("availability read", &mut all);
    let stats = engine.templates().stats();
    println!(
        "  template cache: {} hits, {} misses, {} evictions",
        stats.hits, stats.misses, stats.evictions
    );
}

async fn phase4_batch_generation(engine: &Engine) {
    let businesses: Vec<Ulid> = (0..50).map(|_| Ulid::new()).collect();
    let requests: Vec<GenerateRequest> = (0..30u64)
        .flat_map(|offset| {
            businesses.iter().map(move |&business_id| GenerateRequest {
                business_id,
                date: start_date() + Days::new(offset),
                config: hours(),
            })
        })
        .collect();

    let n = requests.len();
    let start = Instant::now();
    let reports = engine.batch_generate(requests).await.unwrap();
    let failed = reports.iter().filter(|r| r.result.is_err()).count();
    println!(
        "  {n} days generated in {:.2}s ({failed} failed)",
        start.elapsed().as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    println!("=== slotkeep stress benchmark ===\n");

    println!("[phase 1] sequential hold throughput");
    phase1_sequential_holds(&open_engine()).await;

    println!("\n[phase 2] contended holds on one day");
    phase2_contended_holds(open_engine()).await;

    println!("\n[phase 3] availability reads under write load");
    phase3_reads_under_load(open_engine()).await;

    println!("\n[phase 4] batch generation");
    phase4_batch_generation(&open_engine()).await;

    println!("\n=== done ===");
}
