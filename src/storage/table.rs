use super::engine::Filter;
use crate::core::{Column, Record, Row, Schema, StoreError, StoreResult, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    schema: Schema,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            schema: Schema::new(columns),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Rows of one table keyed by an internal slot id, in insertion order.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<usize, Row>,
    next_row_id: usize,
    next_key: i64,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 0,
            next_key: 1,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Inserts a named record. Missing columns become NULL; an auto-increment
    /// key left NULL is generated. Returns the slot id and the generated key.
    pub fn insert(&mut self, record: Record) -> StoreResult<(usize, Option<i64>)> {
        self.check_known_columns(&record)?;

        let mut generated = None;
        let mut row = Vec::with_capacity(self.schema.schema().column_count());
        for column in self.schema.schema().columns() {
            let mut value = record.get(&column.name).cloned().unwrap_or(Value::Null);
            if column.auto_increment {
                match &value {
                    Value::Null => {
                        value = Value::Integer(self.next_key);
                        generated = Some(self.next_key);
                    }
                    Value::Integer(explicit) => {
                        generated = Some(*explicit);
                    }
                    _ => {}
                }
            }
            row.push(value);
        }

        self.validate_row(&row)?;
        self.check_uniqueness(&row, None)?;

        if let Some(key) = generated {
            self.next_key = self.next_key.max(key + 1);
        }

        let id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(id, row);
        Ok((id, generated))
    }

    /// Applies named values to one row and returns the previous image.
    pub fn update(&mut self, id: usize, values: &Record) -> StoreResult<Row> {
        self.check_known_columns(values)?;

        let old_row = self
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::ExecutionError(format!("Row {} not found", id)))?;

        let mut new_row = old_row.clone();
        for (name, value) in values {
            if let Some(idx) = self.schema.schema().find_column_index(name) {
                new_row[idx] = value.clone();
            }
        }

        self.validate_row(&new_row)?;
        self.check_uniqueness(&new_row, Some(id))?;
        self.rows.insert(id, new_row);
        Ok(old_row)
    }

    pub fn delete(&mut self, id: usize) -> Option<Row> {
        self.rows.remove(&id)
    }

    /// Puts a row image back into its slot (undo of update/delete).
    pub fn restore(&mut self, id: usize, row: Row) {
        self.rows.insert(id, row);
    }

    /// Slot ids and rows matching every filter.
    pub fn scan(&self, filters: &[Filter]) -> StoreResult<Vec<(usize, Row)>> {
        let mut positions = Vec::with_capacity(filters.len());
        for filter in filters {
            let idx = self
                .schema
                .schema()
                .find_column_index(filter.column())
                .ok_or_else(|| {
                    StoreError::ColumnNotFound(filter.column().to_string(), self.name().to_string())
                })?;
            positions.push((idx, filter));
        }

        Ok(self
            .rows
            .iter()
            .filter(|(_, row)| positions.iter().all(|(idx, filter)| filter.matches(&row[*idx])))
            .map(|(id, row)| (*id, row.clone()))
            .collect())
    }

    pub fn to_record(&self, row: &Row) -> Record {
        self.schema
            .schema()
            .columns()
            .iter()
            .zip(row.iter())
            .map(|(column, value)| (column.name.clone(), value.clone()))
            .collect()
    }

    fn check_known_columns(&self, record: &Record) -> StoreResult<()> {
        for name in record.keys() {
            if self.schema.schema().find_column_index(name).is_none() {
                return Err(StoreError::ColumnNotFound(name.clone(), self.name().to_string()));
            }
        }
        Ok(())
    }

    fn validate_row(&self, row: &Row) -> StoreResult<()> {
        for (column, value) in self.schema.schema().columns().iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }

    fn check_uniqueness(&self, row: &Row, ignore_id: Option<usize>) -> StoreResult<()> {
        for (col_idx, column) in self.schema.schema().columns().iter().enumerate() {
            if !(column.primary_key || column.unique) {
                continue;
            }
            let value = &row[col_idx];
            if value.is_null() {
                continue;
            }

            let clash = self
                .rows
                .iter()
                .filter(|(id, _)| Some(**id) != ignore_id)
                .any(|(_, existing)| &existing[col_idx] == value);

            if clash {
                return Err(StoreError::ConstraintViolation(format!(
                    "Unique constraint violation: Column '{}' already contains value {}",
                    column.name, value
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;

    fn table() -> Table {
        Table::new(TableSchema::new(
            "items",
            vec![
                Column::new("id", DataType::Integer).auto_increment_key(),
                Column::new("code", DataType::Text).not_null().unique(),
                Column::new("qty", DataType::Integer),
            ],
        ))
    }

    fn record(code: &str, qty: i64) -> Record {
        let mut record = Record::new();
        record.insert("code".into(), Value::from(code));
        record.insert("qty".into(), Value::Integer(qty));
        record
    }

    #[test]
    fn test_insert_generates_keys() {
        let mut table = table();
        let (_, first) = table.insert(record("a", 1)).unwrap();
        let (_, second) = table.insert(record("b", 2)).unwrap();
        assert_eq!(first, Some(1));
        assert_eq!(second, Some(2));
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_unique_violation_is_rejected() {
        let mut table = table();
        table.insert(record("a", 1)).unwrap();
        let err = table.insert(record("a", 5)).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let mut table = table();
        let mut bad = record("a", 1);
        bad.insert("nope".into(), Value::Integer(1));
        assert!(matches!(
            table.insert(bad),
            Err(StoreError::ColumnNotFound(_, _))
        ));
    }

    #[test]
    fn test_update_returns_previous_image() {
        let mut table = table();
        let (slot, _) = table.insert(record("a", 1)).unwrap();

        let mut change = Record::new();
        change.insert("qty".into(), Value::Integer(9));
        let old = table.update(slot, &change).unwrap();

        assert_eq!(old[2], Value::Integer(1));
        let rows = table.scan(&[Filter::Eq("code".into(), Value::from("a"))]).unwrap();
        assert_eq!(rows[0].1[2], Value::Integer(9));
    }

    #[test]
    fn test_scan_unknown_column_fails() {
        let table = table();
        assert!(table.scan(&[Filter::Eq("missing".into(), Value::Null)]).is_err());
    }
}
