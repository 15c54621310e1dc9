use crate::core::{MapperError, Result};
use crate::storage::schema::{FIELDS_TABLE, SECTIONS_TABLE};

pub const SECTIONS_TABLE_VAR: &str = "SECTIONMAPPER_SECTIONS_TABLE";
pub const FIELDS_TABLE_VAR: &str = "SECTIONMAPPER_FIELDS_TABLE";
pub const REQUIRE_FIELDS_VAR: &str = "SECTIONMAPPER_REQUIRE_FIELDS";

/// Repository configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperConfig {
    /// Table holding section rows
    pub sections_table: String,

    /// Table holding field rows
    pub fields_table: String,

    /// Reject `create` payloads without at least one field
    pub require_fields: bool,
}

impl MapperConfig {
    pub fn new() -> Self {
        Self {
            sections_table: SECTIONS_TABLE.to_string(),
            fields_table: FIELDS_TABLE.to_string(),
            require_fields: true,
        }
    }

    /// Set the sections table name
    pub fn sections_table(mut self, table: &str) -> Self {
        self.sections_table = table.to_string();
        self
    }

    /// Set the fields table name
    pub fn fields_table(mut self, table: &str) -> Self {
        self.fields_table = table.to_string();
        self
    }

    pub fn require_fields(mut self, required: bool) -> Self {
        self.require_fields = required;
        self
    }

    /// Defaults overridden by `SECTIONMAPPER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::new();

        if let Some(table) = lookup(SECTIONS_TABLE_VAR) {
            config = config.sections_table(table.trim());
        }
        if let Some(table) = lookup(FIELDS_TABLE_VAR) {
            config = config.fields_table(table.trim());
        }
        if let Some(raw) = lookup(REQUIRE_FIELDS_VAR) {
            let required = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(MapperError::invalid_argument(format!(
                        "{} must be a boolean, got '{}'",
                        REQUIRE_FIELDS_VAR, other
                    )));
                }
            };
            config = config.require_fields(required);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sections_table.is_empty() {
            return Err(MapperError::invalid_argument("sections_table cannot be empty"));
        }
        if self.fields_table.is_empty() {
            return Err(MapperError::invalid_argument("fields_table cannot be empty"));
        }
        if self.sections_table == self.fields_table {
            return Err(MapperError::invalid_argument(
                "sections_table and fields_table must differ",
            ));
        }
        Ok(())
    }
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self::new()
    }
}
