//! ECDH-PSI engine: per-session blinding secrets and intersection over
//! double-blinded values.
//!
//! Both parties derive `k·H(id)` tokens; once each side has applied its
//! scalar to the other's blinded points, common identifiers collide on
//! byte-identical x-coordinates and nothing else matches.

use std::collections::HashSet;

use p256::{elliptic_curve::Field, Scalar};
use rand::rngs::OsRng;
use tracing::debug;
use zeroize::Zeroize;

use crate::curve::{self, XCoord};
use crate::Result;

/// A party's private blinding scalar, fresh per session.
///
/// The scalar never leaves this struct: it is not serializable and is
/// scrubbed on drop.
pub struct PsiSecret {
    scalar: Scalar,
}

impl PsiSecret {
    /// Draw a uniformly random nonzero scalar
    pub fn random() -> Self {
        let mut rng = OsRng;
        loop {
            let scalar = Scalar::random(&mut rng);
            if !bool::from(scalar.is_zero()) {
                return Self { scalar };
            }
        }
    }

    /// Blind one identifier: `k · H(id)`
    pub fn blind_id(&self, id: &str) -> Result<XCoord> {
        curve::mul_point(&curve::hash_to_point(id)?, &self.scalar)
    }

    /// Blind a batch of identifiers, preserving input order and duplicates.
    ///
    /// Duplicate identifiers produce duplicate blinded values; multiplicity
    /// is visible to the peer by construction.
    pub fn blind_ids(&self, ids: &[String]) -> Result<Vec<XCoord>> {
        ids.iter().map(|id| self.blind_id(id)).collect()
    }

    /// Apply this party's scalar to one received blinded point
    pub fn reblind(&self, point: &XCoord) -> Result<XCoord> {
        curve::mul_x(point, &self.scalar)
    }

    /// Apply this party's scalar to a batch of received points, one-for-one
    /// in the order received.
    pub fn reblind_all(&self, points: &[XCoord]) -> Result<Vec<XCoord>> {
        points.iter().map(|point| self.reblind(point)).collect()
    }
}

impl Drop for PsiSecret {
    fn drop(&mut self) {
        // Scalar itself has no Zeroize impl; scrub the byte image and
        // overwrite the stored value.
        let mut bytes: [u8; 32] = self.scalar.to_bytes().into();
        bytes.zeroize();
        self.scalar = Scalar::ZERO;
    }
}

/// Compute the intersection from the initiator's side.
///
/// `double_blinded[i]` must be the double-blinded form of `ids[i]`; the
/// result is the subsequence of `ids` whose token appears among the peer's
/// double-blinded values, one entry per occurrence.
pub fn intersect(ids: &[String], double_blinded: &[XCoord], peer: &[XCoord]) -> Vec<String> {
    let peer_set: HashSet<&XCoord> = peer.iter().collect();
    let matched: Vec<String> = ids
        .iter()
        .zip(double_blinded)
        .filter(|(_, token)| peer_set.contains(token))
        .map(|(id, _)| id.clone())
        .collect();
    debug!(
        own = ids.len(),
        peer = peer.len(),
        matched = matched.len(),
        "intersection computed"
    );
    matched
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    /// Run the full four-message exchange in memory and return the
    /// initiator-side intersection.
    fn run_exchange(own: &[String], peer: &[String]) -> Vec<String> {
        let a = PsiSecret::random();
        let b = PsiSecret::random();

        // Message 1: initiator's blinded points.
        let blinded = a.blind_ids(own).unwrap();
        // Message 2: responder double-blinds them in place.
        let double_blinded = b.reblind_all(&blinded).unwrap();
        // Message 3: responder's own blinded points.
        let peer_blinded = b.blind_ids(peer).unwrap();
        // Initiator finishes the peer side.
        let peer_doubled = a.reblind_all(&peer_blinded).unwrap();

        intersect(own, &double_blinded, &peer_doubled)
    }

    #[test]
    fn toy_intersection_in_input_order() {
        let result = run_exchange(&ids(&["1", "2", "3"]), &ids(&["2", "3", "4"]));
        assert_eq!(result, ids(&["2", "3"]));
    }

    #[test]
    fn disjoint_sets_yield_nothing() {
        assert!(run_exchange(&ids(&["a", "b"]), &ids(&["c", "d"])).is_empty());
    }

    #[test]
    fn empty_initiator_set_yields_nothing() {
        assert!(run_exchange(&[], &ids(&["a", "b"])).is_empty());
    }

    #[test]
    fn full_overlap_returns_everything() {
        let everyone = ids(&["x", "y", "z"]);
        assert_eq!(run_exchange(&everyone, &everyone), everyone);
    }

    #[test]
    fn duplicates_keep_their_multiplicity() {
        let result = run_exchange(&ids(&["a", "a", "b"]), &ids(&["a"]));
        assert_eq!(result, ids(&["a", "a"]));
    }

    #[test]
    fn blinding_hides_nothing_from_itself() {
        // Same id, same session secret, same token.
        let secret = PsiSecret::random();
        assert_eq!(
            secret.blind_id("alice@example.com").unwrap(),
            secret.blind_id("alice@example.com").unwrap()
        );
    }

    #[test]
    fn sessions_use_independent_secrets() {
        let first = PsiSecret::random();
        let second = PsiSecret::random();
        assert_ne!(
            first.blind_id("alice@example.com").unwrap(),
            second.blind_id("alice@example.com").unwrap()
        );
    }
}
