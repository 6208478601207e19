//! Encoding of snapshots and diffs for persistence and transport.

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Structured encodings the store can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Encoding {
    #[default]
    Json,
    /// MessagePack with named fields.
    MessagePack,
}

pub fn encode<T: Serialize>(value: &T, encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Json => Ok(serde_json::to_vec(value)?),
        Encoding::MessagePack => Ok(rmp_serde::to_vec_named(value)?),
    }
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8], encoding: Encoding) -> Result<T> {
    match encoding {
        Encoding::Json => {
            serde_json::from_slice(bytes).map_err(|e| StoreError::Deserialization(e.to_string()))
        }
        Encoding::MessagePack => Ok(rmp_serde::from_slice(bytes)?),
    }
}
