//! Synthetic listings for tests
//!
//! Compiled for this crate's unit tests and, behind the `fixtures` feature,
//! for the test suites of downstream crates.

use crate::deterministic::LcgRng;
use crate::record::Record;

/// A clean listing that passes every default filter
pub fn listing(branch: &str, model: &str, price: f64) -> Record {
    Record {
        title: Some(format!("{branch} {model}")),
        url: Some(format!("https://listings.invalid/{branch}-{model}")),
        post_date: Some("2022-06-01".into()),
        location: Some("Hà Nội".into()),
        year: Some(2019.0),
        km_driven: Some(30_000.0),
        num_seats: Some(5.0),
        engine_capacity: Some(1.5),
        price: Some(price),
        branch: Some(branch.into()),
        model: Some(model.into()),
        origin: Some("domestic".into()),
        external_color: Some("Trắng".into()),
        internal_color: Some("Đen".into()),
        gearbox: Some("automatic".into()),
        wheel_drive: Some("FWD".into()),
        car_type: Some("sedan".into()),
        fuels: Some("gasoline".into()),
    }
}

/// Uniform integer in `[0, max)` from the high bits of the generator
fn below(rng: &mut LcgRng, max: usize) -> usize {
    ((rng.next_f64() * max as f64) as usize).min(max.saturating_sub(1))
}

fn pick<'a>(rng: &mut LcgRng, items: &[&'a str]) -> &'a str {
    items[below(rng, items.len())]
}

/// Deterministic, varied listings whose price depends on brand, age and mileage
pub fn synthetic_listings(count: usize, seed: u64) -> Vec<Record> {
    const BRANDS: [(&str, &[&str], f64); 4] = [
        ("Toyota", &["Vios", "Camry", "Fortuner"], 700.0),
        ("Honda", &["City", "Civic", "CR-V"], 650.0),
        ("Ford", &["Ranger", "Everest"], 800.0),
        ("Kia", &["Morning", "Seltos"], 450.0),
    ];
    const COLORS: [&str; 4] = ["Trắng", "Đen", "Bạc", "Đỏ"];
    const WHEELS: [&str; 3] = ["FWD", "RWD", "4WD"];
    const TYPES: [&str; 4] = ["sedan", "suv", "hatchback", "pickup"];

    let mut rng = LcgRng::new(seed as i64 ^ 0x7F4A_7C15);
    (0..count)
        .map(|i| {
            let (branch, models, base) = BRANDS[i % BRANDS.len()];
            let model = pick(&mut rng, models);
            let year = 2010.0 + below(&mut rng, 13) as f64;
            let km = 5_000.0 + below(&mut rng, 150_000) as f64;
            let price = base + (year - 2010.0) * 25.0 - km / 2_000.0 + rng.next_f64() * 40.0;

            let mut record = listing(branch, model, price.round());
            record.year = Some(year);
            record.km_driven = Some(km);
            record.engine_capacity = Some(1.0 + below(&mut rng, 30) as f64 / 10.0);
            record.external_color = Some(pick(&mut rng, &COLORS).into());
            record.internal_color = Some(pick(&mut rng, &COLORS[..2]).into());
            record.wheel_drive = Some(pick(&mut rng, &WHEELS).into());
            record.car_type = Some(pick(&mut rng, &TYPES).into());
            record.origin = Some(if below(&mut rng, 3) == 0 { "imported" } else { "domestic" }.into());
            record.gearbox = Some(if below(&mut rng, 4) == 0 { "manual" } else { "automatic" }.into());
            record
        })
        .collect()
}
