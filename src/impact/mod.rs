//! # Impact Assessment Engine
//! Builds impact-assessment records from a named template plus caller
//! values. Validation only: metric values come from the caller and pass
//! through verbatim.

pub mod catalog;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AtfError, Result};
use crate::feed::ImpactAssessment;
pub use catalog::{FieldKind, FieldSpec, ImpactTemplate, MetricUnit, TemplateCatalog};

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("static regex"));
static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)?%$").expect("static regex"));

/// Caller input for [`ImpactEngine::build`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssessmentRequest {
    #[serde(default)]
    pub fields: serde_json::Map<String, Value>,
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,
    /// Appended after the template's default risks.
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub mitigations: Vec<String>,
}

impl AssessmentRequest {
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn metric(mut self, name: &str, value: &str) -> Self {
        self.metrics.insert(name.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRecord {
    pub template: String,
    pub summary: String,
    pub affected_users: String,
    pub metrics: BTreeMap<String, String>,
    pub risks: Vec<String>,
    pub mitigations: Vec<String>,
    /// Declared fields that were supplied, after validation.
    pub fields: BTreeMap<String, Value>,
    /// Warning-level notes (undeclared metrics and the like).
    pub notes: Vec<String>,
}

impl AssessmentRecord {
    /// The part of the record that goes into a feed item.
    pub fn assessment(&self) -> ImpactAssessment {
        ImpactAssessment {
            summary: self.summary.clone(),
            affected_users: self.affected_users.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImpactEngine {
    catalog: Arc<TemplateCatalog>,
}

impl ImpactEngine {
    pub fn new(catalog: Arc<TemplateCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn build(&self, template_name: &str, req: &AssessmentRequest) -> Result<AssessmentRecord> {
        let template = self
            .catalog
            .get(template_name)
            .ok_or_else(|| AtfError::UnknownTemplate {
                name: template_name.to_string(),
                suggestion: self.catalog.suggest(template_name),
            })?;

        let mut fields = BTreeMap::new();
        for spec in &template.fields {
            match req.fields.get(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(AtfError::MissingField(spec.name.clone()));
                    }
                }
                Some(v) => {
                    fields.insert(spec.name.clone(), validate_field(spec, v)?);
                }
            }
        }

        let summary = match &template.summary_template {
            Some(fmt) => render(fmt, &fields)?,
            None => plain_field(&req.fields, "summary")?,
        };

        let affected_users = match &template.affected_users_template {
            Some(fmt) => render(fmt, &fields)?,
            None => {
                let raw = plain_field(&req.fields, "affected_users")?;
                if raw.ends_with('%') {
                    raw
                } else {
                    format!("{raw}%")
                }
            }
        };
        if !PERCENT_RE.is_match(&affected_users) {
            return Err(AtfError::field(
                "affected_users",
                format!("{affected_users:?} is not a <number>% percentage"),
            ));
        }

        let mut notes = Vec::new();
        for name in req.metrics.keys() {
            if !template.metrics.contains_key(name) {
                tracing::warn!(
                    template = %template.name,
                    metric = %name,
                    "metric not declared by template; passing through"
                );
                notes.push(format!(
                    "metric {name:?} is not declared by template {:?}",
                    template.name
                ));
            }
        }

        counter!("atf_assessments_built_total").increment(1);

        Ok(AssessmentRecord {
            template: template.name.clone(),
            summary,
            affected_users,
            metrics: req.metrics.clone(),
            risks: merge_unique(&template.risks, &req.risks),
            mitigations: merge_unique(&template.mitigations, &req.mitigations),
            fields,
            notes,
        })
    }
}

fn validate_field(spec: &FieldSpec, v: &Value) -> Result<Value> {
    match spec.kind {
        FieldKind::String => {
            if !v.is_string() {
                return Err(AtfError::field(&spec.name, "expected a string"));
            }
        }
        FieldKind::Number => {
            // Numeric strings are accepted too; they are stored as numbers.
            let num = match v {
                Value::Number(n) => Some(n.clone()),
                Value::String(s) => parse_number(s.trim()),
                _ => None,
            }
            .ok_or_else(|| AtfError::field(&spec.name, "expected a number"))?;
            let n = num
                .as_f64()
                .ok_or_else(|| AtfError::field(&spec.name, "expected a number"))?;
            if let Some(lo) = spec.min {
                if n < lo {
                    return Err(AtfError::field(&spec.name, format!("{n} is below minimum {lo}")));
                }
            }
            if let Some(hi) = spec.max {
                if n > hi {
                    return Err(AtfError::field(&spec.name, format!("{n} is above maximum {hi}")));
                }
            }
            return Ok(Value::Number(num));
        }
        FieldKind::Enum => {
            let s = v
                .as_str()
                .ok_or_else(|| AtfError::field(&spec.name, "expected one of the enum values"))?;
            if !spec.values.iter().any(|a| a == s) {
                return Err(AtfError::field(
                    &spec.name,
                    format!("{s:?} is not one of {:?}", spec.values),
                ));
            }
        }
        FieldKind::Array => {
            let ok = v
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string));
            if !ok {
                return Err(AtfError::field(&spec.name, "expected an array of strings"));
            }
        }
    }
    Ok(v.clone())
}

fn parse_number(s: &str) -> Option<serde_json::Number> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(i.into());
    }
    s.parse::<f64>().ok().and_then(serde_json::Number::from_f64)
}

fn render(fmt: &str, values: &BTreeMap<String, Value>) -> Result<String> {
    for cap in PLACEHOLDER_RE.captures_iter(fmt) {
        let name = &cap[1];
        if !values.contains_key(name) {
            return Err(AtfError::MissingField(name.to_string()));
        }
    }
    let out = PLACEHOLDER_RE.replace_all(fmt, |cap: &regex::Captures<'_>| {
        values.get(&cap[1]).map(value_text).unwrap_or_default()
    });
    Ok(out.into_owned())
}

fn plain_field(fields: &serde_json::Map<String, Value>, name: &str) -> Result<String> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(AtfError::MissingField(name.to_string())),
        Some(v) => Ok(value_text(v)),
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

/// Defaults first, then additions; exact duplicates dropped, order kept.
fn merge_unique(defaults: &[String], extra: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    defaults
        .iter()
        .chain(extra)
        .filter(|s| seen.insert(*s))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> ImpactEngine {
        ImpactEngine::new(Arc::new(TemplateCatalog::builtin()))
    }

    #[test]
    fn merge_unique_keeps_first_occurrence() {
        let d = vec!["a".to_string(), "b".to_string()];
        let e = vec!["b".to_string(), "c".to_string(), "a".to_string(), "c".to_string()];
        assert_eq!(merge_unique(&d, &e), vec!["a", "b", "c"]);
    }

    #[test]
    fn render_fills_placeholders() {
        let mut v = BTreeMap::new();
        v.insert("algorithm".to_string(), json!("feed"));
        v.insert("pct".to_string(), json!(12.5));
        assert_eq!(render("{algorithm} at {pct}%", &v).unwrap(), "feed at 12.5%");
        assert!(matches!(
            render("{missing}", &v),
            Err(AtfError::MissingField(f)) if f == "missing"
        ));
    }

    #[test]
    fn ranking_change_renders_summary_phrase() {
        let req = AssessmentRequest::default()
            .field("algorithm", "search")
            .field("aspect", "relevance")
            .field("percentage", 40)
            .metric("accuracy", "+5%");
        let rec = engine().build("ranking_change", &req).unwrap();
        assert_eq!(rec.summary, "Updated search ranking algorithm to improve relevance");
        assert_eq!(rec.affected_users, "40%");
        assert_eq!(rec.risks.len(), 3);
        assert!(rec.notes.is_empty());
    }

    #[test]
    fn number_field_range_is_enforced() {
        let req = AssessmentRequest::default()
            .field("algorithm", "search")
            .field("aspect", "relevance")
            .field("percentage", 140);
        let err = engine().build("ranking_change", &req).unwrap_err();
        assert!(matches!(err, AtfError::FieldValidation { field, .. } if field == "percentage"));
    }

    #[test]
    fn padded_numeric_string_renders_as_number() {
        let req = AssessmentRequest::default()
            .field("algorithm", "search")
            .field("aspect", "relevance")
            .field("percentage", " 40 ");
        let rec = engine().build("ranking_change", &req).unwrap();
        assert_eq!(rec.affected_users, "40%");
        assert_eq!(rec.fields.get("percentage"), Some(&json!(40)));

        let req = req.field("percentage", "12.5");
        assert_eq!(engine().build("ranking_change", &req).unwrap().affected_users, "12.5%");
    }

    #[test]
    fn array_field_must_hold_strings() {
        let req = AssessmentRequest::default()
            .field("algorithm_name", "feed-ranker")
            .field("change_type", "minor")
            .field("affected_users", 10)
            .field("affected_regions", json!(["EU", 3]));
        let err = engine().build("algorithm_update", &req).unwrap_err();
        assert!(
            matches!(err, AtfError::FieldValidation { field, .. } if field == "affected_regions")
        );
    }

    #[test]
    fn template_without_formats_reads_plain_fields() {
        let catalog = TemplateCatalog::from_json_str(
            r#"{"bare": {"fields": {"summary": {"type": "string", "required": true}}}}"#,
        )
        .unwrap();
        let eng = ImpactEngine::new(Arc::new(catalog));

        let req = AssessmentRequest::default()
            .field("summary", "Tuned thresholds")
            .field("affected_users", 7);
        let rec = eng.build("bare", &req).unwrap();
        assert_eq!(rec.summary, "Tuned thresholds");
        assert_eq!(rec.affected_users, "7%");

        let req = AssessmentRequest::default()
            .field("summary", "Tuned thresholds")
            .field("affected_users", "most");
        let err = eng.build("bare", &req).unwrap_err();
        assert!(matches!(err, AtfError::FieldValidation { field, .. } if field == "affected_users"));
    }
}
