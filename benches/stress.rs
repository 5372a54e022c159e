use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use hotel_bookings::engine::{Engine, DEFAULT_STORE_TIMEOUT};
use hotel_bookings::model::{DateRange, Guest, NewReservation, RoomId, YearMonth};
use hotel_bookings::notify::NotifyHub;

const ROOMS: u64 = 10;

fn base_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).expect("valid date")
}

fn day(offset: u64) -> NaiveDate {
    base_day() + Days::new(offset)
}

fn guest(i: usize) -> Guest {
    Guest {
        first_name: format!("Guest{i}"),
        last_name: "Bench".into(),
        email: format!("guest{i}@bench.local"),
        phone: String::new(),
    }
}

fn booking(i: usize, room_id: RoomId, first_day: u64, nights: u64) -> NewReservation {
    NewReservation {
        guest: guest(i),
        stay: DateRange::new(day(first_day), day(first_day + nights)).expect("ordered range"),
        room_id,
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
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn fresh_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join("hotel_bench");
    std::fs::create_dir_all(&dir).expect("bench dir");
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    let engine = Arc::new(Engine::new(path, Arc::new(NotifyHub::new()), DEFAULT_STORE_TIMEOUT).expect("open engine"));
    for id in 1..=ROOMS {
        engine.create_room(id, format!("Room {id:02}")).await.expect("create room");
    }
    engine
}

async fn phase1_sequential() {
    let engine = fresh_engine("sequential.wal").await;
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        // two-day stays with a free day between; wraps into conflicts after a year
        engine
            .create_reservation(booking(i, 1, (i as u64) * 3 % 360, 1))
            .await
            .ok();
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    println!(
        "  {n} attempts in {:.2}s = {:.0} ops/sec, {} committed",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64(),
        engine.reservation_count()
    );
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent_rooms() {
    let engine = fresh_engine("concurrent.wal").await;
    let n_tasks = ROOMS as usize;
    let n_per_task = 120;
    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                engine
                    .create_reservation(booking(t * n_per_task + j, t as RoomId + 1, (j as u64) * 3, 1))
                    .await
                    .expect("disjoint stays never conflict");
            }
        }));
    }
    for h in handles {
        h.await.expect("task panicked");
    }
    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    println!(
        "  {n_tasks} tasks x {n_per_task} reservations = {total} in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
}

async fn phase3_contention() {
    let engine = fresh_engine("contention.wal").await;
    let contenders = 50;
    let slots = 40u64;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for c in 0..contenders {
        let engine = engine.clone();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            for slot in 0..slots {
                let room_id = slot % ROOMS + 1;
                match engine.create_reservation(booking(c, room_id, slot * 5, 2)).await {
                    Ok(_) => won.fetch_add(1, Ordering::Relaxed),
                    Err(e) if e.is_conflict() => lost.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }
        }));
    }
    for h in handles {
        h.await.expect("task panicked");
    }
    let won = won.load(Ordering::Relaxed);
    let lost = lost.load(Ordering::Relaxed);
    println!(
        "  {contenders} contenders x {slots} slots in {:.2}s: {won} committed, {lost} conflicts",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won as u64, slots, "each slot must be won exactly once");
}

async fn phase4_read_under_load() {
    let engine = fresh_engine("read_under_load.wal").await;
    for i in 0..200 {
        engine
            .create_reservation(booking(i, (i as u64) % ROOMS + 1, (i as u64) / ROOMS * 3, 1))
            .await
            .expect("prefill");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..4u64 {
        let engine = engine.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let room_id = (w + i) % ROOMS + 1;
                let _ = engine
                    .add_block(room_id, DateRange::single_day(day(400 + w * 200 + i % 200)))
                    .await;
                i += 1;
                tokio::task::yield_now().await;
            }
        }));
    }

    let month = YearMonth::containing(base_day());
    let window = DateRange::new(day(0), day(13)).expect("ordered range");
    let mut readers = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(1000);
            for k in 0..1000u64 {
                let t = Instant::now();
                if k % 2 == 0 {
                    engine.find_available_rooms(window).await.expect("search");
                } else {
                    engine.build_month_grid(k % ROOMS + 1, month).await.expect("grid");
                }
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.expect("reader panicked"));
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("search / grid latency", &mut all);
}

#[tokio::main]
async fn main() {
    println!("=== hotel-bookings stress benchmark ===\n");

    println!("[phase 1] sequential reservations, one room");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent reservations, one task per room");
    phase2_concurrent_rooms().await;

    println!("\n[phase 3] contention for the same days");
    phase3_contention().await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load().await;

    println!("\n=== benchmark complete ===");
}
