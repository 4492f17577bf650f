//! # Dynamic Form Structures
//!
//! A form template's `structure` is a JSON document of sections, each with
//! an ordered list of fields:
//!
//! ```json
//! { "sections": [
//!     { "title": "Storage", "fields": [
//!         { "id": "fridge_temp", "label": "Fridge temperature", "type": "number", "required": true }
//!     ]}
//! ]}
//! ```
//!
//! A submission's `value` is a JSON object keyed by field id.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Input widget of a form field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Single-line text.
    Text,
    /// Multi-line text.
    Textarea,
    /// Numeric input.
    Number,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Boolean tick box.
    Checkbox,
    /// One of several options.
    Radio,
    /// Dropdown.
    Select,
    /// Uploaded document reference.
    File,
    /// Captured signature image.
    Signature,
    /// Any widget this version does not know; accepted as-is.
    #[serde(other)]
    Other,
}

/// One input of a form section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    /// Key of the field in submitted values. Unique within the template.
    pub id: String,
    /// Label shown to the user.
    pub label: String,
    /// Widget type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether a submission must carry a non-empty value for this field.
    #[serde(default)]
    pub required: bool,
    /// Choices for radio/select fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// A titled group of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSection {
    /// Section heading.
    #[serde(default)]
    pub title: String,
    /// Fields in display order.
    #[serde(default)]
    pub fields: Vec<FormField>,
}

/// Parsed structure of a form template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormStructure {
    /// Sections in display order.
    pub sections: Vec<FormSection>,
}

impl FormStructure {
    /// Parse and validate a template structure.
    ///
    /// Rejects structures without sections, fields with blank ids or
    /// labels, duplicate field ids, and choice fields without options.
    pub fn parse(value: &Value) -> Result<Self, ValidationError> {
        let structure: FormStructure = serde_json::from_value(value.clone())
            .map_err(|e| ValidationError::InvalidFormStructure(e.to_string()))?;

        if structure.sections.is_empty() {
            return Err(ValidationError::InvalidFormStructure(
                "at least one section is required".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for field in structure.fields() {
            if field.id.trim().is_empty() {
                return Err(ValidationError::InvalidFormStructure(
                    "field id must not be empty".into(),
                ));
            }
            if field.label.trim().is_empty() {
                return Err(ValidationError::InvalidFormStructure(format!(
                    "field \"{}\" has an empty label",
                    field.id
                )));
            }
            if matches!(field.field_type, FieldType::Radio | FieldType::Select)
                && field.options.is_empty()
            {
                return Err(ValidationError::InvalidFormStructure(format!(
                    "field \"{}\" needs at least one option",
                    field.id
                )));
            }
            if !seen.insert(field.id.as_str()) {
                return Err(ValidationError::InvalidFormStructure(format!(
                    "duplicate field id \"{}\"",
                    field.id
                )));
            }
        }

        Ok(structure)
    }

    /// All fields across sections, in display order.
    pub fn fields(&self) -> impl Iterator<Item = &FormField> {
        self.sections.iter().flat_map(|s| s.fields.iter())
    }

    /// Number of fields in the template.
    pub fn field_count(&self) -> usize {
        self.fields().count()
    }

    /// Ids of required fields that `value` leaves missing, null, or blank.
    ///
    /// Returns an error when `value` is not a JSON object.
    pub fn missing_required(&self, value: &Value) -> Result<Vec<String>, ValidationError> {
        let obj = value.as_object().ok_or_else(|| {
            ValidationError::InvalidFormValue("value must be an object keyed by field id".into())
        })?;

        Ok(self
            .fields()
            .filter(|f| f.required)
            .filter(|f| match obj.get(&f.id) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(Value::Array(items)) => items.is_empty(),
                Some(_) => false,
            })
            .map(|f| f.id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kitchen_checklist() -> Value {
        json!({
            "sections": [
                {
                    "title": "Storage",
                    "fields": [
                        { "id": "fridge_temp", "label": "Fridge temperature", "type": "number", "required": true },
                        { "id": "notes", "label": "Notes", "type": "textarea" }
                    ]
                },
                {
                    "title": "Hygiene",
                    "fields": [
                        { "id": "handwash", "label": "Handwash stocked", "type": "radio", "options": ["yes", "no"], "required": true },
                        { "id": "photo", "label": "Photo", "type": "camera" }
                    ]
                }
            ]
        })
    }

    #[test]
    fn parses_sections_and_fields() {
        let s = FormStructure::parse(&kitchen_checklist()).unwrap();
        assert_eq!(s.sections.len(), 2);
        assert_eq!(s.field_count(), 4);
        assert_eq!(s.sections[1].fields[1].field_type, FieldType::Other);
    }

    #[test]
    fn rejects_empty_sections() {
        let err = FormStructure::parse(&json!({ "sections": [] })).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidFormStructure(_)));
    }

    #[test]
    fn rejects_non_object_structure() {
        assert!(FormStructure::parse(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn rejects_duplicate_field_ids() {
        let v = json!({ "sections": [
            { "fields": [ { "id": "a", "label": "A", "type": "text" } ] },
            { "fields": [ { "id": "a", "label": "Again", "type": "text" } ] }
        ]});
        let err = FormStructure::parse(&v).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_select_without_options() {
        let v = json!({ "sections": [
            { "fields": [ { "id": "grade", "label": "Grade", "type": "select" } ] }
        ]});
        assert!(FormStructure::parse(&v).is_err());
    }

    #[test]
    fn reports_missing_required_fields() {
        let s = FormStructure::parse(&kitchen_checklist()).unwrap();
        let missing = s
            .missing_required(&json!({ "fridge_temp": 4, "handwash": "  " }))
            .unwrap();
        assert_eq!(missing, vec!["handwash".to_string()]);

        let complete = s
            .missing_required(&json!({ "fridge_temp": 4, "handwash": "yes" }))
            .unwrap();
        assert!(complete.is_empty());
    }

    #[test]
    fn null_counts_as_missing() {
        let s = FormStructure::parse(&kitchen_checklist()).unwrap();
        let missing = s
            .missing_required(&json!({ "fridge_temp": null, "handwash": "no" }))
            .unwrap();
        assert_eq!(missing, vec!["fridge_temp".to_string()]);
    }

    #[test]
    fn non_object_value_is_rejected() {
        let s = FormStructure::parse(&kitchen_checklist()).unwrap();
        assert!(s.missing_required(&json!("done")).is_err());
    }
}
