//! Pivot transformer benchmark
//!
//! A quote table panel (entities x quote types x channel/flow/hour fields)
//! over one year of dates, pivoted long -> wide -> long.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;

use rate_panel_lib::domain::{panel_from_long, panel_to_long, Category, DuplicatePolicy, PanelRecord};

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn category() -> Category {
    let entities: Vec<(String, String)> = ["banco_nacion", "galicia", "santander", "bbva"]
        .iter()
        .map(|e| (e.to_string(), e.to_string()))
        .collect();
    Category::quote_table(
        "cotizaciones",
        "__",
        &entities,
        &strings(&["dolar", "euro"]),
        &strings(&["mostrador", "electronico"]),
        &strings(&["compra", "venta"]),
        &strings(&["11hs", "13hs", "15hs"]),
    )
    .expect("valid benchmark category")
}

fn records(category: &Category, days: i64) -> Vec<PanelRecord> {
    let start = NaiveDate::from_ymd_opt(2019, 1, 1).expect("valid date");
    let mut out = Vec::new();
    for offset in 0..days {
        let date = start + Duration::days(offset);
        for group in category.groups() {
            for (i, field) in group.fields.iter().enumerate() {
                // every seventh value is a published zero
                let value = if i % 7 == 0 {
                    Some(Decimal::ZERO)
                } else {
                    Some(Decimal::new(4_000 + offset * 10 + i as i64, 2))
                };
                out.push(PanelRecord::new(date, group.key.clone(), field.key.clone(), value));
            }
        }
    }
    out
}

fn bench_pivot(c: &mut Criterion) {
    let category = category();
    let long = records(&category, 365);

    c.bench_function("panel_from_long (1y quote table)", |b| {
        b.iter(|| panel_from_long(black_box(&category), black_box(&long), DuplicatePolicy::Reject))
    });

    let panel = panel_from_long(&category, &long, DuplicatePolicy::Reject).expect("no duplicates");
    c.bench_function("panel_to_long (1y quote table)", |b| {
        b.iter(|| panel_to_long(black_box(&category), black_box(&panel)))
    });
}

criterion_group!(benches, bench_pivot);
criterion_main!(benches);
