//! Index definitions.

use crate::error::{CoreError, CoreResult};
use emberdb_codec::{Map, Value};

const FIELD_NAME: &str = "fieldName";
const UNIQUE: &str = "unique";
const SPARSE: &str = "sparse";
const EXPIRE_AFTER_SECONDS: &str = "expireAfterSeconds";

/// Definition of an index over one (possibly dotted) field.
///
/// This is also what an index-creation directive carries in the index log.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    /// Dotted path of the indexed field.
    pub field_name: String,
    /// Reject two documents with the same key.
    pub unique: bool,
    /// Skip documents where the field is undefined.
    pub sparse: bool,
    /// Documents whose date in this field is older than this many seconds
    /// are expired at read time.
    pub expire_after_seconds: Option<f64>,
}

impl IndexOptions {
    /// Creates a plain, non-unique, non-sparse index definition.
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            unique: false,
            sparse: false,
            expire_after_seconds: None,
        }
    }

    /// Makes this a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Makes this a sparse index.
    #[must_use]
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Registers a TTL on the indexed field.
    #[must_use]
    pub fn expire_after_seconds(mut self, seconds: f64) -> Self {
        self.expire_after_seconds = Some(seconds);
        self
    }

    /// Checks that the definition can be used.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty field name or a negative or
    /// non-finite TTL.
    pub fn validate(&self) -> CoreResult<()> {
        if self.field_name.is_empty() {
            return Err(CoreError::validation("cannot create an index without a fieldName"));
        }
        if let Some(ttl) = self.expire_after_seconds {
            if !ttl.is_finite() || ttl < 0.0 {
                return Err(CoreError::validation(format!(
                    "expireAfterSeconds must be a non-negative number, got {ttl}"
                )));
            }
        }
        Ok(())
    }

    /// Encodes the definition as stored in the index log.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(FIELD_NAME.into(), Value::from(self.field_name.as_str()));
        map.insert(UNIQUE.into(), Value::Bool(self.unique));
        map.insert(SPARSE.into(), Value::Bool(self.sparse));
        if let Some(ttl) = self.expire_after_seconds {
            map.insert(EXPIRE_AFTER_SECONDS.into(), Value::Number(ttl));
        }
        Value::Object(map)
    }

    /// Decodes a definition read back from the index log.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the value is not an object with a
    /// string `fieldName`.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| CoreError::validation("index definition must be an object"))?;
        let field_name = map
            .get(FIELD_NAME)
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::validation("index definition without a fieldName"))?;

        let options = Self {
            field_name: field_name.to_string(),
            unique: map.get(UNIQUE).and_then(Value::as_bool).unwrap_or(false),
            sparse: map.get(SPARSE).and_then(Value::as_bool).unwrap_or(false),
            expire_after_seconds: map.get(EXPIRE_AFTER_SECONDS).and_then(Value::as_f64),
        };
        options.validate()?;
        Ok(options)
    }
}
