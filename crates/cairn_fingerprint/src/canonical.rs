//! Canonical tuples: the backend-agnostic values normalizers produce.
//!
//! A [`Canonical`] is encoded with bincode's standard configuration and
//! hashed with XXH3-128. Only ordered containers appear in a tuple, so the
//! encoding of equal tuples is byte-identical across runs and processes.

use crate::error::FingerprintError;
use cairn_common::ContentHash;
use cairn_ir::{ConnectionIdentity, DataType, Namespace, ScalarValue, Schema, SourceDescriptor};
use serde::Serialize;

/// A canonical, hashable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Canonical {
    /// Absent value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer.
    UInt(u64),
    /// A float, stored as its IEEE-754 bits.
    Float(u64),
    /// A string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A digest of something too large to embed.
    Digest(ContentHash),
    /// An ordered sequence.
    Seq(Vec<Canonical>),
    /// A tagged tuple.
    Tagged(String, Vec<Canonical>),
}

impl Canonical {
    /// Builds a tagged tuple.
    pub fn tagged(tag: &str, items: Vec<Canonical>) -> Self {
        Canonical::Tagged(tag.to_string(), items)
    }

    /// Builds a string value.
    pub fn str(value: impl Into<String>) -> Self {
        Canonical::Str(value.into())
    }

    /// Builds a float value. All NaNs and both zeros collapse to one encoding.
    pub fn float(value: f64) -> Self {
        let value = if value.is_nan() {
            f64::NAN
        } else if value == 0.0 {
            0.0
        } else {
            value
        };
        Canonical::Float(value.to_bits())
    }

    /// Maps an optional string to `Str` or `Null`.
    pub fn opt_str(value: Option<&str>) -> Self {
        value.map_or(Canonical::Null, Canonical::str)
    }

    /// Encodes the tuple with bincode's standard configuration.
    pub fn encode(&self) -> Result<Vec<u8>, FingerprintError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard()).map_err(|e| {
            FingerprintError::Encoding {
                reason: e.to_string(),
            }
        })
    }

    /// Hashes the encoded tuple.
    pub fn digest(&self) -> Result<ContentHash, FingerprintError> {
        Ok(ContentHash::from_bytes(&self.encode()?))
    }
}

/// Canonical form of a data type: its stable display name.
pub fn dtype(dtype: &DataType) -> Canonical {
    Canonical::Str(dtype.to_string())
}

/// Canonical form of a schema: ordered `(name, type)` pairs.
///
/// Nullability is not part of the logical schema and is left out, so the same
/// table reported by different backends normalizes identically.
pub fn schema(schema: &Schema) -> Canonical {
    Canonical::tagged(
        "schema",
        schema
            .fields()
            .iter()
            .map(|f| Canonical::Seq(vec![Canonical::str(&f.name), dtype(&f.dtype)]))
            .collect(),
    )
}

/// Canonical form of a namespace: the `(catalog, database)` pair.
pub fn namespace(namespace: &Namespace) -> Canonical {
    Canonical::tagged(
        "namespace",
        vec![
            Canonical::opt_str(namespace.catalog.as_deref()),
            Canonical::opt_str(namespace.database.as_deref()),
        ],
    )
}

/// Canonical form of a connection identity, paired with its backend kind.
pub fn identity(source: &SourceDescriptor) -> Canonical {
    let payload = match &source.identity {
        ConnectionIdentity::Network {
            host,
            port,
            database,
        } => Canonical::tagged(
            "network",
            vec![
                Canonical::str(host),
                port.map_or(Canonical::Null, |p| Canonical::UInt(u64::from(p))),
                Canonical::opt_str(database.as_deref()),
            ],
        ),
        ConnectionIdentity::Local(token) => Canonical::tagged("local", vec![Canonical::UInt(*token)]),
        ConnectionIdentity::Project { project, dataset } => Canonical::tagged(
            "project",
            vec![Canonical::str(project), Canonical::str(dataset)],
        ),
    };
    Canonical::Seq(vec![Canonical::str(source.kind.name()), payload])
}

/// Canonical form of a literal value.
pub fn scalar(value: &ScalarValue) -> Canonical {
    match value {
        ScalarValue::Null => Canonical::Null,
        ScalarValue::Boolean(b) => Canonical::Bool(*b),
        ScalarValue::Int(i) => Canonical::Int(*i),
        ScalarValue::Float(f) => Canonical::float(*f),
        ScalarValue::String(s) => Canonical::str(s),
        ScalarValue::Binary(b) => Canonical::Bytes(b.clone()),
    }
}
