//! Benchmark utilities.

use emberdb_core::{Document, Map, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Names used for the `city` field, so lookups hit several documents.
pub const CITIES: [&str; 8] = [
    "oslo", "rome", "lima", "kyiv", "accra", "hanoi", "quito", "perth",
];

/// Builds a document with a numeric `n`, a `city`, a nested `profile` and a
/// `tags` array.
pub fn sample_document(rng: &mut impl Rng, n: usize) -> Document {
    let mut profile = Map::new();
    profile.insert("score".to_string(), Value::Number(rng.gen_range(0.0..100.0)));
    profile.insert("active".to_string(), Value::Bool(rng.gen()));

    let tags = (0..rng.gen_range(0..4))
        .map(|_| Value::from(format!("t{}", rng.gen_range(0..16))))
        .collect();

    let mut doc = Map::new();
    doc.insert("n".to_string(), Value::from(n as f64));
    doc.insert(
        "city".to_string(),
        Value::from(CITIES[rng.gen_range(0..CITIES.len())]),
    );
    doc.insert("profile".to_string(), Value::Object(profile));
    doc.insert("tags".to_string(), Value::Array(tags));
    doc
}

/// Generates `count` sample documents from a fixed seed.
pub fn generate_documents(count: usize, seed: u64) -> Vec<Document> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count).map(|n| sample_document(&mut rng, n)).collect()
}

/// Builds a single-field query.
pub fn field_query(field: &str, value: Value) -> Map {
    let mut query = Map::new();
    query.insert(field.to_string(), value);
    query
}
