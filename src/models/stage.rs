//! Stage definitions and the stage catalog.
//!
//! A stage definition describes one kind of manufacturing step (SLS
//! printing, stress relief, wire EDM, CNC finishing, coating, assembly):
//! its default timing, hourly rate, which machines may run it, and the
//! schema of the custom fields a part's requirement may fill in.
//!
//! Definitions are immutable once registered. Changing one means creating a
//! new version with [`StageCatalog::revise`]; schedules that referenced the old
//! version keep pointing at it.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, FieldError};

/// Declared type of a custom field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    /// One of a closed set of options.
    Choice(Vec<String>),
}

impl FieldType {
    fn label(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Choice(_) => "choice",
        }
    }
}

/// A typed custom field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Choice(String),
}

/// One entry of a stage definition's custom field schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

impl CustomFieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn check(&self, value: &FieldValue) -> Result<(), FieldError> {
        let matches = match (&self.field_type, value) {
            (FieldType::Text, FieldValue::Text(_))
            | (FieldType::Number, FieldValue::Number(_))
            | (FieldType::Boolean, FieldValue::Boolean(_)) => true,
            (FieldType::Choice(options), FieldValue::Choice(v)) => {
                if !options.contains(v) {
                    return Err(FieldError::InvalidChoice {
                        field: self.name.clone(),
                        value: v.clone(),
                    });
                }
                true
            }
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(FieldError::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.label().to_string(),
            })
        }
    }
}

/// A manufacturing stage type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique definition identifier (includes the version suffix once revised).
    pub id: String,
    pub name: String,
    /// Starts at 1; bumped by [`StageCatalog::revise`].
    pub version: u32,
    pub default_duration_hours: f64,
    pub default_setup_minutes: i64,
    pub default_teardown_minutes: i64,
    pub default_hourly_rate: f64,
    /// Machines allowed to run this stage. Empty = any machine.
    pub eligible_machines: Vec<String>,
    /// Pool the stage draws machines from, if any.
    pub resource_pool: Option<String>,
    pub custom_fields: Vec<CustomFieldSchema>,
}

impl StageDefinition {
    /// Creates a definition with the given default run duration.
    pub fn new(id: impl Into<String>, duration_hours: f64) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            version: 1,
            default_duration_hours: duration_hours,
            default_setup_minutes: 0,
            default_teardown_minutes: 0,
            default_hourly_rate: 0.0,
            eligible_machines: Vec::new(),
            resource_pool: None,
            custom_fields: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_setup_minutes(mut self, minutes: i64) -> Self {
        self.default_setup_minutes = minutes;
        self
    }

    pub fn with_teardown_minutes(mut self, minutes: i64) -> Self {
        self.default_teardown_minutes = minutes;
        self
    }

    pub fn with_hourly_rate(mut self, rate: f64) -> Self {
        self.default_hourly_rate = rate;
        self
    }

    pub fn with_eligible_machine(mut self, machine_id: impl Into<String>) -> Self {
        self.eligible_machines.push(machine_id.into());
        self
    }

    pub fn with_resource_pool(mut self, pool_id: impl Into<String>) -> Self {
        self.resource_pool = Some(pool_id.into());
        self
    }

    pub fn with_field(mut self, field: CustomFieldSchema) -> Self {
        self.custom_fields.push(field);
        self
    }

    /// Whether `machine_id` may run this stage.
    pub fn is_eligible(&self, machine_id: &str) -> bool {
        self.eligible_machines.is_empty() || self.eligible_machines.iter().any(|m| m == machine_id)
    }

    /// Id without the `@vN` revision suffix.
    pub fn base_id(&self) -> &str {
        base_id(&self.id)
    }

    /// Validates custom field values against the declared schema.
    ///
    /// Rejects undeclared names, missing required fields, type mismatches and
    /// choice values outside the declared options. Reports the first problem.
    pub fn validate_fields(&self, values: &HashMap<String, FieldValue>) -> Result<(), FieldError> {
        let mut names: Vec<&String> = values.keys().collect();
        names.sort();
        for name in names {
            if !self.custom_fields.iter().any(|f| &f.name == name) {
                return Err(FieldError::Undeclared(name.clone()));
            }
        }
        for field in &self.custom_fields {
            match values.get(&field.name) {
                Some(value) => field.check(value)?,
                None if field.required => return Err(FieldError::Missing(field.name.clone())),
                None => {}
            }
        }
        Ok(())
    }
}

fn base_id(id: &str) -> &str {
    id.split_once("@v").map_or(id, |(base, _)| base)
}

/// Registry of stage definitions keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageCatalog {
    definitions: BTreeMap<String, StageDefinition>,
}

impl StageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: registers a definition.
    pub fn with_definition(mut self, definition: StageDefinition) -> Result<Self, CatalogError> {
        self.insert(definition)?;
        Ok(self)
    }

    /// Registers a new definition.
    pub fn insert(&mut self, definition: StageDefinition) -> Result<(), CatalogError> {
        if self.definitions.contains_key(&definition.id) {
            return Err(CatalogError::Duplicate(definition.id));
        }
        self.definitions.insert(definition.id.clone(), definition);
        Ok(())
    }

    /// Creates the next version of a definition.
    ///
    /// `edit` receives a copy of the latest version of `id`'s family; the
    /// result is stored as `{base}@v{n}` and returned. Earlier versions are
    /// left untouched.
    pub fn revise(
        &mut self,
        id: &str,
        edit: impl FnOnce(&mut StageDefinition),
    ) -> Result<&StageDefinition, CatalogError> {
        let latest = self
            .latest(base_id(id))
            .ok_or_else(|| CatalogError::Unknown(id.to_string()))?;
        let mut next = latest.clone();
        edit(&mut next);
        next.version = latest.version + 1;
        next.id = format!("{}@v{}", latest.base_id(), next.version);

        let key = next.id.clone();
        self.insert(next)?;
        self.definitions
            .get(&key)
            .ok_or(CatalogError::Unknown(key))
    }

    pub fn get(&self, id: &str) -> Option<&StageDefinition> {
        self.definitions.get(id)
    }

    /// Highest version registered for a base id.
    pub fn latest(&self, base: &str) -> Option<&StageDefinition> {
        self.definitions
            .values()
            .filter(|d| d.base_id() == base)
            .max_by_key(|d| d.version)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edm() -> StageDefinition {
        StageDefinition::new("EDM", 4.0)
            .with_name("Wire EDM")
            .with_setup_minutes(30)
            .with_teardown_minutes(15)
            .with_hourly_rate(85.0)
            .with_eligible_machine("EDM1")
            .with_field(CustomFieldSchema::new("wire_diameter_mm", FieldType::Number).required())
            .with_field(CustomFieldSchema::new(
                "finish",
                FieldType::Choice(vec!["rough".into(), "skim".into()]),
            ))
    }

    #[test]
    fn test_definition_builder() {
        let def = edm();
        assert_eq!(def.version, 1);
        assert_eq!(def.default_setup_minutes, 30);
        assert!(def.is_eligible("EDM1"));
        assert!(!def.is_eligible("CNC1"));
        assert!(StageDefinition::new("ANY", 1.0).is_eligible("CNC1"));
    }

    #[test]
    fn test_field_validation() {
        let def = edm();
        let mut values = HashMap::new();
        assert_eq!(
            def.validate_fields(&values),
            Err(FieldError::Missing("wire_diameter_mm".into()))
        );

        values.insert("wire_diameter_mm".into(), FieldValue::Text("0.25".into()));
        assert!(matches!(
            def.validate_fields(&values),
            Err(FieldError::TypeMismatch { .. })
        ));

        values.insert("wire_diameter_mm".into(), FieldValue::Number(0.25));
        assert_eq!(def.validate_fields(&values), Ok(()));

        values.insert("finish".into(), FieldValue::Choice("mirror".into()));
        assert!(matches!(
            def.validate_fields(&values),
            Err(FieldError::InvalidChoice { .. })
        ));

        values.insert("finish".into(), FieldValue::Choice("skim".into()));
        values.insert("coolant".into(), FieldValue::Boolean(true));
        assert_eq!(
            def.validate_fields(&values),
            Err(FieldError::Undeclared("coolant".into()))
        );
    }

    #[test]
    fn test_catalog_rejects_duplicates() {
        let mut catalog = StageCatalog::new();
        catalog.insert(edm()).unwrap();
        assert_eq!(
            catalog.insert(edm()),
            Err(CatalogError::Duplicate("EDM".into()))
        );
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_revise_creates_new_version() {
        let mut catalog = StageCatalog::new().with_definition(edm()).unwrap();

        let v2 = catalog
            .revise("EDM", |d| d.default_duration_hours = 5.0)
            .unwrap();
        assert_eq!(v2.id, "EDM@v2");
        assert_eq!(v2.version, 2);

        let v3_id = catalog
            .revise("EDM@v2", |d| d.default_setup_minutes = 45)
            .unwrap()
            .id
            .clone();
        assert_eq!(v3_id, "EDM@v3");

        // Original untouched.
        assert!((catalog.get("EDM").unwrap().default_duration_hours - 4.0).abs() < 1e-10);
        assert_eq!(catalog.latest("EDM").unwrap().id, "EDM@v3");
        assert_eq!(catalog.len(), 3);

        assert!(matches!(
            catalog.revise("CNC", |_| {}),
            Err(CatalogError::Unknown(_))
        ));
    }
}
