//! CBOR codec for the opaque system-fields blob stored on sync references.

use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{RecordError, RecordResult};
use crate::identity::RecordId;

/// Server-managed record metadata, everything needed to update a record
/// in place without re-fetching it. User fields are never part of this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemFields {
    /// Scoped record identity.
    pub id: RecordId,
    /// Schema type of the record.
    pub record_type: String,
    /// Change tag of the last known server version.
    pub change_tag: Option<String>,
    /// Server-side creation time.
    pub created_at: Option<SystemTime>,
    /// Server-side last modification time.
    pub modified_at: Option<SystemTime>,
    /// Identity of the creating user record.
    pub creator: Option<RecordId>,
}

impl SystemFields {
    /// Encodes to the CBOR blob stored on a sync reference.
    pub fn encode(&self) -> RecordResult<Bytes> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| RecordError::encoding_failed(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    /// Decodes a blob previously produced by [`SystemFields::encode`].
    pub fn decode(bytes: &[u8]) -> RecordResult<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| RecordError::decoding_failed(e.to_string()))
    }
}
