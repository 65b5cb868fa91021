//! Static step metadata.

use serde::Serialize;

use crate::mapping::MappingType;

/// Immutable description of an import step, built once at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepDefinition {
    name: String,
    title: String,
    dependencies: Vec<String>,
    required_mappings: Vec<(String, MappingType)>,
    required_sets: Vec<(String, String)>,
    target_table: String,
    columns: Vec<String>,
    mapping_type: Option<MappingType>,
}

impl StepDefinition {
    pub fn new(name: &str, target_table: &str) -> Self {
        Self {
            name: name.to_string(),
            title: format!("Importing {}", name.replace('_', " ")),
            dependencies: Vec::new(),
            required_mappings: Vec::new(),
            required_sets: Vec::new(),
            target_table: target_table.to_string(),
            columns: Vec::new(),
            mapping_type: None,
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn depends_on(mut self, dependency: &str) -> Self {
        if !self.dependencies.iter().any(|d| d == dependency) {
            self.dependencies.push(dependency.to_string());
        }
        self
    }

    /// Preload `original_id -> target_id` of one mapping type under `name`.
    pub fn requires_mapping(mut self, name: &str, mapping_type: MappingType) -> Self {
        self.required_mappings.push((name.to_string(), mapping_type));
        self
    }

    /// Preload the single-column result of a target query under `name`.
    pub fn requires_set(mut self, name: &str, sql: &str) -> Self {
        self.required_sets.push((name.to_string(), sql.to_string()));
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Assign target ids to new rows and record them under `mapping_type`.
    pub fn store_mapped_ids(mut self, mapping_type: MappingType) -> Self {
        self.mapping_type = Some(mapping_type);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_title(&self) -> &str {
        &self.title
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn required_mappings(&self) -> &[(String, MappingType)] {
        &self.required_mappings
    }

    pub fn required_sets(&self) -> &[(String, String)] {
        &self.required_sets
    }

    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn stores_mapped_ids(&self) -> bool {
        self.mapping_type.is_some()
    }

    pub fn mapping_type(&self) -> Option<MappingType> {
        self.mapping_type
    }
}
