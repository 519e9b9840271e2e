//! # psi-core
//!
//! Core engine for two-party private set intersection with homomorphic
//! aggregation.
//!
//! This crate provides the building blocks the initiator and responder
//! share:
//! - ECDH blinding on NIST P-256 ([`curve`], [`psi`])
//! - CKKS encrypted aggregation ([`agg`])
//! - the tabular contract both parties read their records through
//!   ([`table`])
//! - a seeded synthetic data generator ([`datagen`])
//!
//! ## Protocol Overview
//!
//! Each party hashes its identifiers to curve points and blinds them with a
//! fresh private scalar. Because scalar multiplication commutes, the two
//! double-blinded forms of a common identifier are byte-identical, and the
//! initiator learns the intersection without either side revealing anything
//! else. Aggregation then runs over CKKS ciphertexts aligned to the sorted
//! intersection, so the responder adds bonuses and splits departments
//! without ever seeing a salary.

pub mod agg;
pub mod curve;
pub mod datagen;
pub mod error;
pub mod psi;
pub mod table;

pub use curve::XCoord;
pub use error::{Error, ErrorKind, Result};
