use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DataError;
use crate::types::Value;

/// Schema description of a named resource.
///
/// Only carries what the data layer needs: the resource name and which
/// fields address a single record. Input validation lives in adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// Resource name, used in cache keys and error messages (e.g. `"Todo"`).
    pub name: String,
    /// Field definitions that comprise this resource's schema.
    pub fields: Vec<FieldDef>,
}

/// Single field definition within a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Name of the field.
    pub name: String,
    /// Whether the field is part of the record's identifier. Several fields
    /// marked this way form a composite identifier.
    #[serde(default)]
    pub identifier: bool,
}

impl ResourceSchema {
    /// Creates a schema whose identifier is made of `identifiers`, in order.
    pub fn new<I, S>(name: impl Into<String>, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: identifiers
                .into_iter()
                .map(|f| FieldDef {
                    name: f.into(),
                    identifier: true,
                })
                .collect(),
        }
    }

    /// Adds a non-identifying field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            identifier: false,
        });
        self
    }

    /// Names of the identifying fields, in declaration order.
    pub fn identifier_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.identifier)
            .map(|f| f.name.as_str())
    }

    /// Extracts the identifying fields from `input`, ignoring everything else.
    ///
    /// # Errors
    ///
    /// Returns a validation [`DataError`] if the schema declares no
    /// identifier, `input` is not a map, or an identifier field is absent
    /// or null.
    pub fn identity(&self, input: &Value) -> Result<BTreeMap<String, Value>, DataError> {
        let Some(map) = input.as_map() else {
            return Err(DataError::validation(format!(
                "{} input must be an object",
                self.name
            )));
        };

        let mut identity = BTreeMap::new();
        for field in self.identifier_fields() {
            match map.get(field) {
                Some(v) if !v.is_null() => {
                    identity.insert(field.to_string(), v.clone());
                }
                _ => {
                    return Err(DataError::validation(format!(
                        "{} input is missing identifier field '{field}'",
                        self.name
                    )));
                }
            }
        }

        if identity.is_empty() {
            return Err(DataError::validation(format!(
                "{} declares no identifier fields",
                self.name
            )));
        }
        Ok(identity)
    }
}
