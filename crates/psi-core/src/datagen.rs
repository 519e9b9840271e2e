//! Seeded synthetic tables for demos and tests.
//!
//! Produces one table per party with a configurable identifier overlap:
//! the initiator side carries Name/Age/Salary, the responder side carries
//! Department/Bonus. The same seed reproduces the same tables.

use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::table::{MemTable, Row, Value, ID_COLUMN};

pub const DEFAULT_ROWS: usize = 1000;
pub const DEFAULT_OVERLAP: f64 = 0.5;
pub const DEFAULT_SEED: u64 = 42;

const DEPARTMENTS: [&str; 5] = ["HR", "Engineering", "Sales", "Marketing", "Finance"];
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate `(initiator, responder)` tables with `rows` records each and
/// `rows · overlap` identifiers in common.
pub fn generate(rows: usize, overlap: f64, seed: u64) -> (MemTable, MemTable) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let common = (rows as f64 * overlap) as usize;
    let common_ids: Vec<String> = (0..common).map(|_| random_id(&mut rng)).collect();

    let mut initiator_ids = common_ids.clone();
    initiator_ids.extend((common..rows).map(|_| random_id(&mut rng)));
    let mut responder_ids = common_ids;
    responder_ids.extend((common..rows).map(|_| random_id(&mut rng)));

    initiator_ids.shuffle(&mut rng);
    responder_ids.shuffle(&mut rng);

    let initiator = MemTable::new(
        initiator_ids
            .into_iter()
            .map(|id| initiator_row(&mut rng, id))
            .collect(),
    );
    let responder = MemTable::new(
        responder_ids
            .into_iter()
            .map(|id| responder_row(&mut rng, id))
            .collect(),
    );
    (initiator, responder)
}

fn random_id(rng: &mut ChaCha8Rng) -> String {
    let local: String = (0..10)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{local}@example.com")
}

fn initiator_row(rng: &mut ChaCha8Rng, id: String) -> Row {
    let name: String = (0..5).map(|_| rng.gen_range(b'A'..=b'Z') as char).collect();
    [
        (ID_COLUMN.to_string(), Value::Text(id)),
        ("Name".to_string(), Value::Text(name)),
        ("Age".to_string(), Value::Int(rng.gen_range(20..=60))),
        (
            "Salary".to_string(),
            Value::Int(rng.gen_range(30_000..=150_000)),
        ),
    ]
    .into_iter()
    .collect()
}

fn responder_row(rng: &mut ChaCha8Rng, id: String) -> Row {
    let department = *DEPARTMENTS.choose(rng).expect("non-empty department list");
    [
        (ID_COLUMN.to_string(), Value::Text(id)),
        (
            "Department".to_string(),
            Value::Text(department.to_string()),
        ),
        ("Bonus".to_string(), Value::Int(rng.gen_range(1_000..=20_000))),
    ]
    .into_iter()
    .collect()
}
