//! Typed wire messages exchanged between initiator and responder.
//!
//! Payloads are JSON: requests carry a `command` tag, replies are implicit
//! responses to the previous command. Curve points travel hex-encoded,
//! opaque crypto blobs base64-encoded, so every field survives a neutral
//! self-describing encoding.

use std::collections::BTreeMap;

use psi_core::{table::Row, Error, Result, XCoord};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Request payloads, initiator → responder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Request {
    /// Message 1 of the PSI exchange: blinded points in input order
    #[serde(rename = "PSI")]
    Psi {
        #[serde(with = "hex_points")]
        points: Vec<XCoord>,
    },

    /// Fetch the responder rows matching the given identifiers
    #[serde(rename = "JOIN")]
    Join { ids: Vec<String> },

    /// Run the encrypted aggregation over the sorted intersection
    #[serde(rename = "SECURE_AGGREGATION")]
    SecureAggregation {
        /// Public-only CKKS context blob
        #[serde(with = "b64")]
        context: Vec<u8>,
        /// Encrypted salary vector aligned to `ids`
        #[serde(with = "b64")]
        enc_salaries: Vec<u8>,
        /// Alignment vector, ascending by UTF-8 bytes
        ids: Vec<String>,
    },

    /// Close the session
    #[serde(rename = "EXIT")]
    Exit,
}

/// Response payloads, responder → initiator.
///
/// Variants are distinguished by their field names alone; the initiator
/// knows which one to expect after each command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Points {
        #[serde(with = "hex_points")]
        points: Vec<XCoord>,
    },
    Rows {
        data: Vec<Row>,
    },
    Aggregates {
        /// Department → serialized single-slot ciphertext
        #[serde(with = "b64_map")]
        results: BTreeMap<String, Vec<u8>>,
    },
    Error {
        error: String,
        message: String,
    },
}

impl Response {
    /// Build the wire form of an error
    pub fn from_error(error: &Error) -> Self {
        Response::Error {
            error: error.kind().as_str().to_string(),
            message: error.to_string(),
        }
    }

    /// Short name for logs and protocol mismatch reports
    pub fn label(&self) -> &'static str {
        match self {
            Response::Points { .. } => "points",
            Response::Rows { .. } => "rows",
            Response::Aggregates { .. } => "aggregates",
            Response::Error { .. } => "error",
        }
    }
}

/// Encode a message payload
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Protocol(format!("encode failed: {e}")))
}

/// Decode a message payload; malformed bytes are a protocol error
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Protocol(format!("malformed payload: {e}")))
}

mod hex_points {
    use super::XCoord;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(points: &[XCoord], serializer: S) -> Result<S::Ok, S::Error> {
        points
            .iter()
            .map(hex::encode)
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<XCoord>, D::Error> {
        let strings = Vec::<String>::deserialize(deserializer)?;
        strings
            .into_iter()
            .map(|s| {
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                XCoord::try_from(bytes.as_slice())
                    .map_err(|_| serde::de::Error::custom("point must be 32 bytes"))
            })
            .collect()
    }
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

mod b64_map {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        map.iter()
            .map(|(key, bytes)| (key, STANDARD.encode(bytes)))
            .collect::<BTreeMap<_, _>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(key, value)| {
                let bytes = STANDARD.decode(value).map_err(serde::de::Error::custom)?;
                Ok((key, bytes))
            })
            .collect()
    }
}
