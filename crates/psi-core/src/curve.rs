//! Curve engine: identifier hashing and commutative blinding on NIST P-256.
//!
//! Points travel as bare 32-byte big-endian x-coordinates. Equality of two
//! blinded values is byte equality of that form, which is sound because the
//! x-coordinate of `k·P` and `k·(−P)` coincide for every scalar `k`; the
//! even-parity y branch is still fixed at every reconstruction so both
//! parties walk the same points.

use p256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        point::DecompressPoint,
        sec1::ToEncodedPoint,
        subtle::Choice,
        Field,
    },
    AffinePoint, FieldBytes, ProjectivePoint, Scalar,
};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Wire form of a curve point: the 32-byte big-endian x-coordinate
pub type XCoord = [u8; 32];

/// Domain-separation prefix hashed ahead of every identifier
const HASH_DOMAIN: &[u8] = b"ecdh-psi/hash-to-point/v1";

/// Hash an identifier to a nonzero scalar: SHA-256 over the domain prefix
/// and the UTF-8 bytes, interpreted big-endian and reduced mod n.
pub fn hash_to_scalar(id: &str) -> Result<Scalar> {
    let mut hasher = Sha256::new();
    hasher.update(HASH_DOMAIN);
    hasher.update(id.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();

    let scalar = <Scalar as Reduce<U256>>::reduce_bytes(&digest.into());
    if bool::from(scalar.is_zero()) {
        return Err(Error::ZeroScalar);
    }
    Ok(scalar)
}

/// Map an identifier to a curve point as `SHA256(tag ‖ id) · G`.
///
/// This is not a random-oracle hash-to-curve: anyone can recompute the point
/// for a guessed identifier, so unlinkability rests on identifier entropy.
/// A proper encoding (RFC 9380) can replace this mapping without touching
/// the rest of the protocol.
pub fn hash_to_point(id: &str) -> Result<ProjectivePoint> {
    Ok(ProjectivePoint::GENERATOR * hash_to_scalar(id)?)
}

/// Reconstruct the affine point for an x-coordinate, taking the even-y branch
pub fn lift_x(x: &XCoord) -> Result<AffinePoint> {
    let field_bytes = FieldBytes::from(*x);
    let affine = AffinePoint::decompress(&field_bytes, Choice::from(0));
    Option::<AffinePoint>::from(affine).ok_or(Error::NotOnCurve)
}

/// Canonical 32-byte serialization of a point
pub fn x_only(point: &ProjectivePoint) -> Result<XCoord> {
    let encoded = point.to_affine().to_encoded_point(false);
    let x = encoded.x().ok_or(Error::PointAtInfinity)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(x);
    Ok(out)
}

/// Apply a private scalar to a point, returning the canonical x-only form
pub fn mul_point(point: &ProjectivePoint, k: &Scalar) -> Result<XCoord> {
    x_only(&(point * k))
}

/// Apply a private scalar to a received x-coordinate.
///
/// The point is reconstructed on the even-y branch first; an x-coordinate
/// with no square root on the curve fails with [`Error::NotOnCurve`].
pub fn mul_x(x: &XCoord, k: &Scalar) -> Result<XCoord> {
    let point = ProjectivePoint::from(lift_x(x)?);
    x_only(&(point * k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn hashing_is_deterministic() {
        let a = x_only(&hash_to_point("alice@example.com").unwrap()).unwrap();
        let b = x_only(&hash_to_point("alice@example.com").unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_ids_map_to_distinct_points() {
        let a = x_only(&hash_to_point("alice@example.com").unwrap()).unwrap();
        let b = x_only(&hash_to_point("bob@example.com").unwrap()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn scalar_application_commutes() {
        let mut rng = OsRng;
        let k_a = Scalar::random(&mut rng);
        let k_b = Scalar::random(&mut rng);

        for id in ["1", "2", "carol@example.com", "déjà-vu"] {
            let base = hash_to_point(id).unwrap();

            // Both orders, each hop going through the wire form.
            let ab = mul_x(&mul_point(&base, &k_a).unwrap(), &k_b).unwrap();
            let ba = mul_x(&mul_point(&base, &k_b).unwrap(), &k_a).unwrap();
            assert_eq!(ab, ba);
        }
    }

    #[test]
    fn lift_x_round_trips_and_fixes_the_even_branch() {
        let x = x_only(&hash_to_point("42").unwrap()).unwrap();
        let lifted = lift_x(&x).unwrap();
        assert_eq!(x_only(&ProjectivePoint::from(lifted)).unwrap(), x);

        let compressed = lifted.to_encoded_point(true);
        assert_eq!(compressed.as_bytes()[0], 0x02);
    }

    #[test]
    fn lift_x_rejects_coordinates_off_the_curve() {
        // Roughly half of all field elements are not valid x-coordinates, so
        // at least one of these constant patterns must be rejected.
        let rejected = (0u8..=255)
            .filter(|byte| lift_x(&[*byte; 32]).is_err())
            .count();
        assert!(rejected > 0);
    }

    #[test]
    fn rejection_is_not_on_curve() {
        let bad = (0u8..=255)
            .map(|byte| [byte; 32])
            .find(|x| lift_x(x).is_err())
            .unwrap();
        assert!(matches!(lift_x(&bad), Err(Error::NotOnCurve)));
    }
}
