//! Pluggable encoding of life cycle and condition payloads
//!
//! Providers hand the store opaque byte payloads; the store turns them into
//! typed values through a `PayloadCodec`. The engine never assumes a byte
//! format. JSON and bincode codecs are provided for convenience.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

use crate::error::AuthzError;
use crate::lifecycle::{LifeCycle, TimeWindow};

/// Errors raised while encoding or decoding a payload
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary payload: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("{0}")]
    Other(String),
}

impl From<CodecError> for AuthzError {
    fn from(err: CodecError) -> Self {
        AuthzError::Codec(err.to_string())
    }
}

/// Encode/decode contract between providers and the store
pub trait PayloadCodec: fmt::Debug + Send + Sync + 'static {
    /// Decoded life cycle type
    type LifeCycle: LifeCycle + 'static;

    /// Decoded condition type, handed back to callers untouched
    type Condition: Clone + fmt::Debug + Send + Sync + 'static;

    fn decode_life_cycle(&self, payload: &[u8]) -> Result<Self::LifeCycle, CodecError>;

    fn encode_life_cycle(&self, life_cycle: &Self::LifeCycle) -> Result<Vec<u8>, CodecError>;

    fn decode_condition(&self, payload: &[u8]) -> Result<Self::Condition, CodecError>;

    fn encode_condition(&self, condition: &Self::Condition) -> Result<Vec<u8>, CodecError>;
}

/// Codec storing payloads as JSON documents
#[derive(Debug)]
pub struct JsonCodec<L, C> {
    _marker: PhantomData<fn() -> (L, C)>,
}

/// JSON codec over `TimeWindow` life cycles and free-form JSON conditions
pub type DefaultCodec = JsonCodec<TimeWindow, serde_json::Value>;

impl<L, C> JsonCodec<L, C> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<L, C> Default for JsonCodec<L, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L, C> PayloadCodec for JsonCodec<L, C>
where
    L: LifeCycle + Serialize + DeserializeOwned + 'static,
    C: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    type LifeCycle = L;
    type Condition = C;

    fn decode_life_cycle(&self, payload: &[u8]) -> Result<L, CodecError> {
        Ok(serde_json::from_slice(payload)?)
    }

    fn encode_life_cycle(&self, life_cycle: &L) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(life_cycle)?)
    }

    fn decode_condition(&self, payload: &[u8]) -> Result<C, CodecError> {
        Ok(serde_json::from_slice(payload)?)
    }

    fn encode_condition(&self, condition: &C) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(condition)?)
    }
}

/// Codec storing payloads in bincode's compact binary form
#[derive(Debug)]
pub struct BincodeCodec<L, C> {
    _marker: PhantomData<fn() -> (L, C)>,
}

impl<L, C> BincodeCodec<L, C> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<L, C> Default for BincodeCodec<L, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L, C> PayloadCodec for BincodeCodec<L, C>
where
    L: LifeCycle + Serialize + DeserializeOwned + 'static,
    C: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    type LifeCycle = L;
    type Condition = C;

    fn decode_life_cycle(&self, payload: &[u8]) -> Result<L, CodecError> {
        Ok(bincode::deserialize(payload)?)
    }

    fn encode_life_cycle(&self, life_cycle: &L) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(life_cycle)?)
    }

    fn decode_condition(&self, payload: &[u8]) -> Result<C, CodecError> {
        Ok(bincode::deserialize(payload)?)
    }

    fn encode_condition(&self, condition: &C) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(condition)?)
    }
}
