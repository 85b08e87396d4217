use std::hint::black_box;

use chrono::Weekday;
use criterion::{criterion_group, criterion_main, Criterion};
use mentor_engine::{
    build_taxonomy, filter_candidates, rank_candidates, AvailabilityWindow, Candidate, FieldId,
    MatchQuery, SubfieldFilter, SubfieldId, SubjectCapability, SubjectFilter, UserId,
};

const DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn capability(field: u64, subfield: u64, skills: &[u64]) -> SubjectCapability {
    let skills: Vec<serde_json::Value> = skills
        .iter()
        .map(|id| serde_json::json!({ "id": id, "name": format!("skill-{id}") }))
        .collect();
    serde_json::from_value(serde_json::json!({
        "field": { "id": field, "name": format!("field-{field}") },
        "subfield": { "id": subfield, "name": format!("subfield-{subfield}") },
        "skills": skills,
    }))
    .expect("valid capability")
}

fn synthetic_pool(size: u64) -> Vec<Candidate> {
    (0..size)
        .map(|i| {
            let field = i % 5;
            let subfield = field * 10 + i % 3;
            let day = DAYS[(i % 7) as usize];
            let start = 6 + (i % 16);
            let until = (start + 3) % 24;
            let mut window =
                AvailabilityWindow::new(day, format!("{start}:00"), format!("{until}:30"));
            if i % 4 == 0 {
                window = window.preferred();
            }
            Candidate::mentor(UserId(i))
                .with_subject(capability(field, subfield, &[subfield * 10, subfield * 10 + 1]))
                .with_window(window)
                .with_window(AvailabilityWindow::new(day.succ(), "10:00 PM", "1:00 AM"))
        })
        .collect()
}

fn query() -> MatchQuery {
    MatchQuery {
        subject: Some(
            SubjectFilter::field(FieldId(2))
                .with_subfield(SubfieldFilter::only(SubfieldId(20)))
                .with_subfield(SubfieldFilter::only(SubfieldId(21))),
        ),
        availability: vec![
            AvailabilityWindow::new(Weekday::Tue, "6:00 PM", "9:00 PM"),
            AvailabilityWindow::new(Weekday::Sat, "11:00 PM", "2:00 AM"),
        ],
    }
}

fn bench_matching(c: &mut Criterion) {
    let pool = synthetic_pool(2_000);
    let query = query();

    c.bench_function("filter_candidates/2000", |b| {
        b.iter(|| filter_candidates(black_box(&pool), black_box(&query)))
    });
    c.bench_function("rank_candidates/2000", |b| {
        b.iter(|| rank_candidates(black_box(&pool), black_box(&query)))
    });
    c.bench_function("build_taxonomy/2000", |b| {
        b.iter(|| build_taxonomy(black_box(&pool)))
    });
}

criterion_group!(benches, bench_matching);
criterion_main!(benches);
