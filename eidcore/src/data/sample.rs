use std::collections::BTreeMap;
use std::fmt::Display;

use crate::data::column::Column;
use crate::error::{CoreError, CoreResult};

/// Field-aligned in-memory record of events: every column holds the same rows
/// in the same order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    n_rows: usize,
    columns: BTreeMap<String, Column>,
}

impl Sample {
    pub fn new(n_rows: usize) -> Self {
        Sample { n_rows, columns: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn n_fields(&self) -> usize {
        self.columns.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Insert or replace a field; its row count must match the sample
    pub fn insert(&mut self, name: &str, column: Column) -> CoreResult<Option<Column>> {
        if column.n_rows() != self.n_rows {
            return Err(CoreError::SchemaMismatch(format!(
                "field `{}` has {} rows, sample has {}",
                name,
                column.n_rows(),
                self.n_rows
            )));
        }
        Ok(self.columns.insert(name.to_string(), column))
    }

    pub fn remove(&mut self, name: &str) -> Option<Column> {
        self.columns.remove(name)
    }

    /// Register `alias` as a copy of `source`; returns false when `source` is absent
    pub fn alias(&mut self, alias: &str, source: &str) -> bool {
        match self.columns.get(source).cloned() {
            Some(column) => {
                self.columns.insert(alias.to_string(), column);
                true
            }
            None => false,
        }
    }

    /// Modify a field in place; the closure must preserve the row count
    pub fn update<F>(&mut self, name: &str, f: F) -> CoreResult<()>
    where
        F: FnOnce(Column) -> CoreResult<Column>,
    {
        let column = self
            .columns
            .remove(name)
            .ok_or_else(|| CoreError::SchemaMismatch(format!("sample has no field `{}`", name)))?;
        let updated = f(column)?;
        self.insert(name, updated)?;
        Ok(())
    }

    /// Keep the rows where `mask` is true, identically across every field
    pub fn filter_rows(&self, mask: &[bool]) -> CoreResult<Sample> {
        if mask.len() != self.n_rows {
            return Err(CoreError::SchemaMismatch(format!(
                "row mask of length {} applied to {} rows",
                mask.len(),
                self.n_rows
            )));
        }
        let n_rows = mask.iter().filter(|&&keep| keep).count();
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| (name.clone(), column.filter(mask)))
            .collect();
        Ok(Sample { n_rows, columns })
    }

    /// Gather rows by index, identically across every field
    pub fn take_rows(&self, rows: &[usize]) -> CoreResult<Sample> {
        if let Some(&bad) = rows.iter().find(|&&row| row >= self.n_rows) {
            return Err(CoreError::Index { lo: bad, hi: bad + 1, total: self.n_rows });
        }
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| (name.clone(), column.take(rows)))
            .collect();
        Ok(Sample { n_rows: rows.len(), columns })
    }

    /// Concatenate samples along the row axis, in the given order.
    ///
    /// All samples must carry the same field names.
    pub fn concat(samples: &[Sample]) -> CoreResult<Sample> {
        let first = match samples.first() {
            Some(first) => first,
            None => return Ok(Sample::default()),
        };

        for sample in &samples[1..] {
            if sample.columns.len() != first.columns.len()
                || sample.columns.keys().zip(first.columns.keys()).any(|(a, b)| a != b)
            {
                return Err(CoreError::SchemaMismatch(
                    "cannot concatenate samples with different field sets".to_string(),
                ));
            }
        }

        let n_rows = samples.iter().map(|s| s.n_rows).sum();
        let mut columns = BTreeMap::new();
        for name in first.columns.keys() {
            let parts: Vec<&Column> = samples.iter().map(|s| &s.columns[name]).collect();
            columns.insert(name.clone(), Column::concat(&parts)?);
        }

        Ok(Sample { n_rows, columns })
    }
}

impl Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sample({} rows, {} fields)", self.n_rows, self.columns.len())
    }
}
