/*!
Content-hashing a [Model](crate::model::Model) into the `(data_hash,
metadata_hash)` pair that identifies a [Snapshot](crate::model::snapshot::Snapshot).
*/

use serde::{Deserialize, Serialize};

use crate::model::Model;

/// A single content hash, rendered as a fixed-width hex string so it is
/// stable across process restarts and safe to embed in a physical table name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(#[serde(with = "hex_string")] pub [u8; 32]);

impl Fingerprint {
    /// The hex-encoded fingerprint, truncated to the prefix used for
    /// physical table suffixes.
    pub fn short(&self) -> String {
        hex::encode(&self.0)[..12].to_string()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

mod hex_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("fingerprint must be 32 bytes"))
    }
}

/// The fingerprints derived from a model and its resolved parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprints {
    /// Hashes the model's own normalized SQL, kind and output-affecting
    /// kind params, and declared schema — everything except its parents.
    /// Comparing this against a prior snapshot's `own_data_hash` is how the
    /// crate tells a direct change from one that only propagated from a
    /// parent.
    pub own_data_hash: Fingerprint,
    /// `own_data_hash` folded together with the ordered parent `data_hash`es.
    /// A change here, from any source, forces a new physical snapshot.
    pub data_hash: Fingerprint,
    /// Hashes owner/description/tags/audits and other fields that never
    /// affect physical output. A change here permits reuse of the existing
    /// physical table.
    pub metadata_hash: Fingerprint,
}

/// Compute the fingerprint triple for `model`, given the already-resolved
/// `data_hash`es of its parents in declaration order.
///
/// Parent `data_hash`es are folded into the child's `data_hash` so that a
/// change anywhere upstream is detectable without re-walking the whole DAG
/// (indirect change detection), while `own_data_hash` is kept hash-stable
/// across parent changes so callers can distinguish direct from indirect.
pub fn fingerprint(model: &Model, parent_data_hashes: &[Fingerprint]) -> Fingerprints {
    let mut own = blake3::Hasher::new();
    own.update(model.name.as_bytes());
    own.update(model.rendered_sql.as_bytes());
    own.update(&[model.kind.discriminant()]);
    own.update(model.kind.data_affecting_params().as_bytes());
    for schema_field in &model.schema {
        own.update(schema_field.as_bytes());
    }
    let own_data_hash = Fingerprint(*own.finalize().as_bytes());

    let mut data = blake3::Hasher::new();
    data.update(&own_data_hash.0);
    for parent in parent_data_hashes {
        data.update(&parent.0);
    }

    let mut metadata = blake3::Hasher::new();
    metadata.update(model.owner.as_deref().unwrap_or("").as_bytes());
    metadata.update(model.description.as_deref().unwrap_or("").as_bytes());
    for tag in &model.tags {
        metadata.update(tag.as_bytes());
    }

    Fingerprints {
        own_data_hash,
        data_hash: Fingerprint(*data.finalize().as_bytes()),
        metadata_hash: Fingerprint(*metadata.finalize().as_bytes()),
    }
}
