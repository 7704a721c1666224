// src/impact/catalog.rs
//! Impact-assessment template catalog.
//!
//! Loaded once at startup from JSON keyed by template name, then shared
//! read-only (behind an `Arc`) for the life of the process. The crate ships a
//! built-in catalog in `config/impact_templates.json`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AtfError, Result};

const BUILTIN_CATALOG: &str = include_str!("../../config/impact_templates.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Enum,
    Array,
}

/// Unit tag for a declared metric. Guidance only: metric values stay opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricUnit {
    Percentage,
    Duration,
    Epsilon,
    Ratio,
    Numeric,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    /// Allowed values of an `enum` field.
    pub values: Vec<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FieldBody {
    #[serde(rename = "type")]
    kind: FieldKind,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    values: Vec<String>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactTemplate {
    #[serde(skip_deserializing)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Declaration order is kept; validation walks fields in this order.
    #[serde(default, deserialize_with = "ordered_fields")]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricUnit>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub mitigations: Vec<String>,
    /// `{field}` placeholders are filled from the validated field values.
    #[serde(default)]
    pub summary_template: Option<String>,
    #[serde(default)]
    pub affected_users_template: Option<String>,
}

impl ImpactTemplate {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn check(&self) -> Result<()> {
        for f in &self.fields {
            let at = format!("{}.{}", self.name, f.name);
            if f.kind == FieldKind::Enum && f.values.is_empty() {
                return Err(AtfError::field(at, "enum field declares no values"));
            }
            if let (Some(lo), Some(hi)) = (f.min, f.max) {
                if lo > hi {
                    return Err(AtfError::field(at, format!("min {lo} > max {hi}")));
                }
            }
        }
        Ok(())
    }
}

fn ordered_fields<'de, D>(de: D) -> std::result::Result<Vec<FieldSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    struct FieldsVisitor;

    impl<'de> Visitor<'de> for FieldsVisitor {
        type Value = Vec<FieldSpec>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of field name to field spec")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut out = Vec::new();
            while let Some((name, body)) = map.next_entry::<String, FieldBody>()? {
                out.push(FieldSpec {
                    name,
                    kind: body.kind,
                    required: body.required,
                    values: body.values,
                    min: body.min,
                    max: body.max,
                });
            }
            Ok(out)
        }
    }

    de.deserialize_map(FieldsVisitor)
}

/// Immutable set of templates, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, ImpactTemplate>,
}

impl TemplateCatalog {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let raw: BTreeMap<String, ImpactTemplate> = serde_json::from_str(s)?;
        let mut templates = BTreeMap::new();
        for (name, mut t) in raw {
            t.name = name.clone();
            t.check()?;
            templates.insert(name, t);
        }
        Ok(Self { templates })
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_json_str(&data)?;
        tracing::info!(
            path = %path.as_ref().display(),
            templates = catalog.len(),
            "impact template catalog loaded"
        );
        Ok(catalog)
    }

    /// The catalog compiled into the crate.
    pub fn builtin() -> Self {
        Self::from_json_str(BUILTIN_CATALOG).expect("built-in impact catalog is valid")
    }

    pub fn get(&self, name: &str) -> Option<&ImpactTemplate> {
        self.templates.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Closest template name, for "did you mean" hints.
    pub fn suggest(&self, name: &str) -> Option<String> {
        self.templates
            .keys()
            .map(|k| (strsim::levenshtein(name, k), k))
            .filter(|(d, _)| *d <= 3)
            .min_by_key(|(d, _)| *d)
            .map(|(_, k)| k.clone())
    }
}
