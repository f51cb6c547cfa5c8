//! Form schemas: the user-authored extraction templates that drive every
//! pipeline phase, plus loading, validation, and content hashing.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::FieldScalar;

/// Declared type of a form field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Array,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
        }
    }

    /// Whether a dynamic scalar matches this declared kind.
    pub fn accepts(self, value: &FieldScalar) -> bool {
        matches!(
            (self, value),
            (FieldKind::String, FieldScalar::Text(_))
                | (FieldKind::Number, FieldScalar::Number(_))
                | (FieldKind::Boolean, FieldScalar::Bool(_))
                | (FieldKind::Array, FieldScalar::List(_))
        )
    }
}

/// A single field in a form schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub question: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_hints: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    /// Hidden from the display projection.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub internal: bool,
}

/// A complete extraction form schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Form {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_hints: Vec<String>,
    pub fields: Vec<Field>,
}

impl Form {
    /// The primary field: first required field, else first field. Forms are
    /// validated to hold at least one field, so this only returns `None` on
    /// an unvalidated empty form.
    pub fn primary_field(&self) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.required)
            .or_else(|| self.fields.first())
    }

    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Content hash of the schema, for change detection across resumes.
    pub fn hash(&self) -> Result<String> {
        let data = serde_json::to_vec(self).context("serializing form for hashing")?;
        let digest = Sha256::digest(&data);
        Ok(hex_encode(&digest[..8]))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Load and validate a form from a JSON file.
pub fn load_form(path: impl AsRef<Path>) -> Result<Form> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading form file: {}", path.display()))?;
    let form: Form = serde_json::from_str(&data)
        .with_context(|| format!("parsing form JSON: {}", path.display()))?;
    validate(&form).with_context(|| format!("validating form: {}", path.display()))?;
    Ok(form)
}

/// Validate a form schema: non-empty title, at least one field, unique field
/// ids, and a question per field.
pub fn validate(form: &Form) -> Result<()> {
    if form.title.is_empty() {
        bail!("form title is required");
    }
    if form.fields.is_empty() {
        bail!("form must have at least one field");
    }

    let mut seen = std::collections::HashSet::new();
    for (i, field) in form.fields.iter().enumerate() {
        if field.id.is_empty() {
            bail!("field {}: id is required", i);
        }
        if !seen.insert(field.id.as_str()) {
            bail!("duplicate field id: {}", field.id);
        }
        if field.question.is_empty() {
            bail!("field {}: question is required", field.id);
        }
    }

    Ok(())
}
