//! CKKS secure aggregation over encrypted salary vectors.
//!
//! Thin semantic wrapper over SEAL's CKKS scheme. The initiator creates a
//! context with the secret key, encrypts its salary vector, and ships the
//! public half; the responder adds bonuses in plaintext, masks per
//! department, and sums each masked vector down to slot 0 with Galois
//! rotations. Only the initiator can decrypt.
//!
//! Depth budget: one cipher+plain addition (free), one cipher×plain mask
//! (one level), rotations (no extra level). The (60, 40, 40, 60) modulus
//! chain covers this without rescaling.

use std::collections::{BTreeMap, BTreeSet};

use sealy::{
    CKKSEncoder, CKKSEncryptionParametersBuilder, CKKSEvaluator, Ciphertext,
    CoefficientModulusFactory, Context, Decryptor, DegreeType, EncryptionParameters, Encryptor,
    Evaluator, FromBytes, GaloisKey, KeyGenerator, PublicKey, SecretKey, SecurityLevel, ToBytes,
};
use tracing::debug;

use crate::table::{Table, Value};
use crate::{Error, Result};

/// CKKS polynomial modulus degree
pub const POLY_MODULUS_DEGREE: DegreeType = DegreeType::D8192;

/// Coefficient modulus bit sizes
pub const COEFF_MODULUS_BITS: [i32; 4] = [60, 40, 40, 60];

/// Global scale exponent; the working scale is `2^SCALE_BITS`
pub const SCALE_BITS: i32 = 40;

fn scale() -> f64 {
    2f64.powi(SCALE_BITS)
}

fn crypto_err(e: impl std::fmt::Display) -> Error {
    Error::CryptoContext(e.to_string())
}

/// Both parties rebuild the encryption parameters from the constants above;
/// only keys and ciphertexts travel.
fn encryption_parameters() -> Result<EncryptionParameters> {
    CKKSEncryptionParametersBuilder::new()
        .set_poly_modulus_degree(POLY_MODULUS_DEGREE)
        .set_coefficient_modulus(
            CoefficientModulusFactory::build(POLY_MODULUS_DEGREE, &COEFF_MODULUS_BITS)
                .map_err(crypto_err)?,
        )
        .build()
        .map_err(crypto_err)
}

fn build_context() -> Result<Context> {
    Context::new(&encryption_parameters()?, true, SecurityLevel::TC128).map_err(crypto_err)
}

/// Evaluation context for one aggregation session.
///
/// The initiator-side context carries the secret key; the responder-side
/// context, rebuilt from [`AggContext::serialize_public`], does not.
pub struct AggContext {
    context: Context,
    encoder: CKKSEncoder,
    evaluator: CKKSEvaluator,
    public_key: PublicKey,
    galois_key: GaloisKey,
    secret_key: Option<SecretKey>,
}

impl AggContext {
    /// Create a fresh context with secret key and Galois keys
    pub fn create() -> Result<Self> {
        let context = build_context()?;
        let keygen = KeyGenerator::new(&context).map_err(crypto_err)?;
        let secret_key = keygen.secret_key();
        let public_key = keygen.create_public_key();
        let galois_key = keygen.create_galois_keys().map_err(crypto_err)?;
        let encoder = CKKSEncoder::new(&context, scale()).map_err(crypto_err)?;
        let evaluator = CKKSEvaluator::new(&context).map_err(crypto_err)?;

        Ok(Self {
            context,
            encoder,
            evaluator,
            public_key,
            galois_key,
            secret_key: Some(secret_key),
        })
    }

    /// Whether this context can decrypt
    pub fn has_secret_key(&self) -> bool {
        self.secret_key.is_some()
    }

    /// Number of plaintext slots per ciphertext
    pub fn slot_count(&self) -> usize {
        self.encoder.get_slot_count()
    }

    /// Serialize the public half (public key and Galois keys) for the peer.
    ///
    /// The secret key never enters the blob. Layout is two length-prefixed
    /// byte strings, big-endian lengths, matching the wire framer's
    /// convention.
    pub fn serialize_public(&self) -> Result<Vec<u8>> {
        let public_key = self.public_key.as_bytes().map_err(crypto_err)?;
        let galois_key = self.galois_key.as_bytes().map_err(crypto_err)?;

        let mut out = Vec::with_capacity(8 + public_key.len() + galois_key.len());
        for blob in [&public_key, &galois_key] {
            let len = u32::try_from(blob.len())
                .map_err(|_| Error::CryptoContext("key blob exceeds u32 length".into()))?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(blob);
        }
        Ok(out)
    }

    /// Rebuild an evaluation-only context from a public blob
    pub fn deserialize_public(bytes: &[u8]) -> Result<Self> {
        let (public_key_bytes, rest) = split_blob(bytes)?;
        let (galois_key_bytes, rest) = split_blob(rest)?;
        if !rest.is_empty() {
            return Err(Error::CryptoContext("trailing bytes after key blobs".into()));
        }

        let context = build_context()?;
        let public_key = PublicKey::from_bytes(&context, public_key_bytes).map_err(crypto_err)?;
        let galois_key = GaloisKey::from_bytes(&context, galois_key_bytes).map_err(crypto_err)?;
        let encoder = CKKSEncoder::new(&context, scale()).map_err(crypto_err)?;
        let evaluator = CKKSEvaluator::new(&context).map_err(crypto_err)?;

        Ok(Self {
            context,
            encoder,
            evaluator,
            public_key,
            galois_key,
            secret_key: None,
        })
    }

    /// Encrypt a vector of reals; slots beyond `values.len()` hold zero
    pub fn encrypt_vector(&self, values: &[f64]) -> Result<Ciphertext> {
        let plain = self.encoder.encode_f64(values).map_err(crypto_err)?;
        let encryptor =
            Encryptor::with_public_key(&self.context, &self.public_key).map_err(crypto_err)?;
        encryptor.encrypt(&plain).map_err(crypto_err)
    }

    pub fn serialize_ciphertext(&self, ciphertext: &Ciphertext) -> Result<Vec<u8>> {
        ciphertext.as_bytes().map_err(crypto_err)
    }

    pub fn deserialize_ciphertext(&self, bytes: &[u8]) -> Result<Ciphertext> {
        Ciphertext::from_bytes(&self.context, bytes).map_err(crypto_err)
    }

    /// Element-wise cipher + plain addition
    pub fn add_plain(&self, ciphertext: &Ciphertext, values: &[f64]) -> Result<Ciphertext> {
        let plain = self.encoder.encode_f64(values).map_err(crypto_err)?;
        self.evaluator.add_plain(ciphertext, &plain).map_err(crypto_err)
    }

    /// Element-wise cipher × plain selection by a 0/1 mask; consumes one
    /// multiplicative level.
    pub fn mul_plain_mask(&self, ciphertext: &Ciphertext, mask: &[f64]) -> Result<Ciphertext> {
        let plain = self.encoder.encode_f64(mask).map_err(crypto_err)?;
        self.evaluator
            .multiply_plain(ciphertext, &plain)
            .map_err(crypto_err)
    }

    /// Sum every slot into slot 0 via a power-of-two rotation ladder
    pub fn sum(&self, ciphertext: &Ciphertext) -> Result<Ciphertext> {
        let mut acc = ciphertext.clone();
        let slots = self.slot_count();
        let mut step = 1usize;
        while step < slots {
            let rotated = self
                .evaluator
                .rotate_rows(&acc, step as i32, &self.galois_key)
                .map_err(crypto_err)?;
            acc = self.evaluator.add(&acc, &rotated).map_err(crypto_err)?;
            step <<= 1;
        }
        Ok(acc)
    }

    /// Decrypt slot 0. The value is approximate; callers round per their
    /// input domain.
    pub fn decrypt_slot0(&self, ciphertext: &Ciphertext) -> Result<f64> {
        let secret_key = self
            .secret_key
            .as_ref()
            .ok_or_else(|| Error::CryptoContext("context has no secret key".into()))?;
        let decryptor = Decryptor::new(&self.context, secret_key).map_err(crypto_err)?;
        let plain = decryptor.decrypt(ciphertext).map_err(crypto_err)?;
        let values = self.encoder.decode_f64(&plain).map_err(crypto_err)?;
        values
            .first()
            .copied()
            .ok_or_else(|| Error::CryptoContext("decrypted plaintext has no slots".into()))
    }
}

fn split_blob(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    if bytes.len() < 4 {
        return Err(Error::CryptoContext("truncated key blob length".into()));
    }
    let (len_bytes, rest) = bytes.split_at(4);
    let len = u32::from_be_bytes(len_bytes.try_into().expect("four bytes")) as usize;
    if rest.len() < len {
        return Err(Error::CryptoContext("truncated key blob".into()));
    }
    Ok(rest.split_at(len))
}

/// Responder side of the aggregation: reindex bonuses and departments by the
/// initiator's sorted ID list, add bonuses under encryption, then mask and
/// sum per department.
///
/// Returns serialized single-slot ciphertexts keyed by department. An ID
/// absent from the responder table is an [`Error::Alignment`].
pub fn aggregate_by_department(
    context: &AggContext,
    enc_salaries: &Ciphertext,
    ids: &[String],
    table: &dyn Table,
) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut bonuses = Vec::with_capacity(ids.len());
    let mut departments = Vec::with_capacity(ids.len());
    for id in ids {
        let row = table
            .get(id)
            .ok_or_else(|| Error::Alignment(format!("id {id:?} absent from responder table")))?;
        bonuses.push(
            row.get("Bonus")
                .and_then(Value::as_real)
                .ok_or_else(|| Error::Alignment(format!("row {id:?} lacks a numeric Bonus")))?,
        );
        departments.push(
            row.get("Department")
                .and_then(Value::as_text)
                .ok_or_else(|| Error::Alignment(format!("row {id:?} lacks a Department")))?
                .to_string(),
        );
    }

    let enc_total = context.add_plain(enc_salaries, &bonuses)?;

    let distinct: BTreeSet<&String> = departments.iter().collect();
    let mut results = BTreeMap::new();
    for department in distinct {
        let mask: Vec<f64> = departments
            .iter()
            .map(|d| if d == department { 1.0 } else { 0.0 })
            .collect();
        let masked = context.mul_plain_mask(&enc_total, &mask)?;
        let summed = context.sum(&masked)?;
        results.insert(department.clone(), context.serialize_ciphertext(&summed)?);
    }

    debug!(
        ids = ids.len(),
        departments = results.len(),
        "aggregated under encryption"
    );
    Ok(results)
}

/// Round a decrypted aggregate: to the nearest integer when the inputs were
/// integral, otherwise to two decimals.
pub fn round_aggregate(value: f64, integral_inputs: bool) -> f64 {
    if integral_inputs {
        value.round()
    } else {
        (value * 100.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{MemTable, Row, ID_COLUMN};

    /// Tolerance for approximate aggregates.
    fn close_enough(decrypted: f64, expected: f64) -> bool {
        (decrypted - expected).abs() <= f64::max(1.0, 1e-4 * expected.abs())
    }

    fn responder_row(id: &str, department: &str, bonus: i64) -> Row {
        [
            (ID_COLUMN.to_string(), Value::Text(id.into())),
            ("Department".to_string(), Value::Text(department.into())),
            ("Bonus".to_string(), Value::Int(bonus)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn encrypt_add_plain_round_trip() {
        let context = AggContext::create().unwrap();
        let encrypted = context.encrypt_vector(&[100.0, 200.0]).unwrap();
        let total = context.add_plain(&encrypted, &[10.0, 20.0]).unwrap();

        let masked = context.mul_plain_mask(&total, &[1.0, 0.0]).unwrap();
        let slot0 = context.decrypt_slot0(&context.sum(&masked).unwrap()).unwrap();
        assert!(close_enough(slot0, 110.0), "got {slot0}");
    }

    #[test]
    fn masked_sum_matches_plaintext() {
        let context = AggContext::create().unwrap();
        let values = [3.0, 5.0, 7.0, 11.0];
        let mask = [1.0, 0.0, 1.0, 0.0];
        let expected: f64 = values
            .iter()
            .zip(&mask)
            .map(|(v, m)| v * m)
            .sum();

        let encrypted = context.encrypt_vector(&values).unwrap();
        let masked = context.mul_plain_mask(&encrypted, &mask).unwrap();
        let slot0 = context.decrypt_slot0(&context.sum(&masked).unwrap()).unwrap();
        assert!(close_enough(slot0, expected), "got {slot0}");
    }

    #[test]
    fn public_context_cannot_decrypt() {
        let initiator = AggContext::create().unwrap();
        let responder = AggContext::deserialize_public(&initiator.serialize_public().unwrap())
            .unwrap();
        assert!(!responder.has_secret_key());

        let encrypted = initiator.encrypt_vector(&[1.0]).unwrap();
        assert!(responder.decrypt_slot0(&encrypted).is_err());
    }

    #[test]
    fn aggregation_round_trip_single_department() {
        // Salaries 100 + 200, bonuses 10 + 20, one department: 330.
        let initiator = AggContext::create().unwrap();
        let responder =
            AggContext::deserialize_public(&initiator.serialize_public().unwrap()).unwrap();

        let ids = vec!["id1".to_string(), "id2".to_string()];
        let table = MemTable::new(vec![
            responder_row("id1", "HR", 10),
            responder_row("id2", "HR", 20),
        ]);

        let enc_salaries = initiator.encrypt_vector(&[100.0, 200.0]).unwrap();
        let wire = initiator.serialize_ciphertext(&enc_salaries).unwrap();
        let received = responder.deserialize_ciphertext(&wire).unwrap();

        let results = aggregate_by_department(&responder, &received, &ids, &table).unwrap();
        assert_eq!(results.len(), 1);

        let ciphertext = initiator.deserialize_ciphertext(&results["HR"]).unwrap();
        let total = initiator.decrypt_slot0(&ciphertext).unwrap();
        assert!(close_enough(total, 330.0), "got {total}");
        assert_eq!(round_aggregate(total, true), 330.0);
    }

    #[test]
    fn aggregation_splits_departments() {
        // Totals per row: 330, 150, 420, 200 → HR 750, Eng 350.
        let initiator = AggContext::create().unwrap();
        let responder =
            AggContext::deserialize_public(&initiator.serialize_public().unwrap()).unwrap();

        let ids: Vec<String> = ["a", "b", "c", "d"].map(String::from).into();
        let table = MemTable::new(vec![
            responder_row("a", "HR", 30),
            responder_row("b", "Eng", 50),
            responder_row("c", "HR", 20),
            responder_row("d", "Eng", 100),
        ]);

        let enc = initiator
            .encrypt_vector(&[300.0, 100.0, 400.0, 100.0])
            .unwrap();
        let received = responder
            .deserialize_ciphertext(&initiator.serialize_ciphertext(&enc).unwrap())
            .unwrap();

        let results = aggregate_by_department(&responder, &received, &ids, &table).unwrap();
        assert_eq!(results.len(), 2);

        let hr = initiator
            .decrypt_slot0(&initiator.deserialize_ciphertext(&results["HR"]).unwrap())
            .unwrap();
        let eng = initiator
            .decrypt_slot0(&initiator.deserialize_ciphertext(&results["Eng"]).unwrap())
            .unwrap();
        assert!(close_enough(hr, 750.0), "got {hr}");
        assert!(close_enough(eng, 350.0), "got {eng}");
    }

    #[test]
    fn missing_id_is_an_alignment_error() {
        let initiator = AggContext::create().unwrap();
        let table = MemTable::new(vec![responder_row("known", "HR", 1)]);
        let enc = initiator.encrypt_vector(&[1.0]).unwrap();

        let err = aggregate_by_department(
            &initiator,
            &enc,
            &["unknown".to_string()],
            &table,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Alignment(_)));
    }

    #[test]
    fn rounding_rule() {
        assert_eq!(round_aggregate(329.9987, true), 330.0);
        assert_eq!(round_aggregate(329.9987, false), 330.0);
        assert_eq!(round_aggregate(12.3456, false), 12.35);
    }
}
