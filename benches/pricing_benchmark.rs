use booking_client_core::pricing::{calculate_total_price, MILLIS_PER_DAY};
use booking_client_core::schedule::{
    is_within_opening_window, DaySchedule, TimeSlot, Weekday, WeeklySchedule,
};
use chrono::{NaiveDate, NaiveDateTime};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{thread_rng, Rng};

// Live pricing runs on every date or guest change, so it has to stay cheap
pub fn pricing_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("booking_price_engine");

    let mut rng = thread_rng();
    let stays: Vec<(i64, i64)> = (0..1000)
        .map(|_| {
            let check_in = rng.gen_range(1_700_000_000_000_i64..1_800_000_000_000);
            let nights = rng.gen_range(0..30);
            (check_in, check_in + nights * MILLIS_PER_DAY)
        })
        .collect();

    group.bench_function("total_price_from_timestamps", |b| {
        b.iter(|| {
            for (check_in, check_out) in &stays {
                let _ = black_box(calculate_total_price(
                    Some(149.5),
                    Some(*check_in),
                    Some(*check_out),
                ));
            }
        })
    });

    group.bench_function("total_price_from_iso_text", |b| {
        b.iter(|| {
            black_box(calculate_total_price(
                Some(149.5),
                Some("2025-06-01T14:00:00Z"),
                Some("2025-06-05T10:00:00Z"),
            ))
        })
    });

    group.finish();
}

pub fn opening_window_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("opening_window");

    for slots_per_day in [1, 4, 16].iter() {
        let slots: Vec<TimeSlot> = (0..*slots_per_day)
            .map(|i| {
                let start = i * 60;
                TimeSlot::new(
                    &format!("{:02}:{:02}", start / 60 % 24, start % 60),
                    &format!("{:02}:{:02}", start / 60 % 24, 45),
                )
            })
            .collect();
        let schedule = WeeklySchedule::new(vec![DaySchedule::new(Weekday::Wednesday, slots)])
            .expect("one entry per day");

        let mut rng = thread_rng();
        let instants: Vec<NaiveDateTime> = (0..1000)
            .map(|_| {
                NaiveDate::from_ymd_opt(2024, 1, 3)
                    .unwrap()
                    .and_hms_opt(rng.gen_range(0..24), rng.gen_range(0..60), 0)
                    .unwrap()
            })
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(slots_per_day),
            slots_per_day,
            |b, _| {
                b.iter(|| {
                    instants
                        .iter()
                        .filter(|now| is_within_opening_window(&schedule, now))
                        .count()
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, pricing_benchmark, opening_window_benchmark);
criterion_main!(benches);
