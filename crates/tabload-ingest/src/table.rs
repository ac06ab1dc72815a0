//! In-memory text table
//!
//! Every cell is opaque text. Identifier columns such as CNPJ roots keep their
//! leading zeros and no file can poison another with an inferred type; coercion
//! is left to the destination store. `None` is an empty field and is stored as
//! SQL `NULL`.

use std::collections::HashMap;

pub type Row = Vec<Option<String>>;

/// Column names plus rows aligned to them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl TextTable {
    /// Build a table, padding or truncating each row to the column count
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, None);
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `index`
    pub fn cell(&self, index: usize, column: &str) -> Option<&str> {
        let position = self.columns.iter().position(|c| c == column)?;
        self.rows.get(index)?.get(position)?.as_deref()
    }

    /// Concatenate tables, unioning columns by name
    ///
    /// Columns appear in first-seen order across the inputs. Rows keep their input
    /// order and cells for columns a table lacks are `None`.
    pub fn concat<I>(tables: I) -> TextTable
    where
        I: IntoIterator<Item = TextTable>,
    {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut rows: Vec<Row> = Vec::new();

        for table in tables {
            let mapping: Vec<usize> = table
                .columns
                .iter()
                .map(|name| {
                    *index.entry(name.clone()).or_insert_with(|| {
                        columns.push(name.clone());
                        columns.len() - 1
                    })
                })
                .collect();

            for row in table.rows {
                let mut aligned = vec![None; columns.len()];
                for (value, &target) in row.into_iter().zip(&mapping) {
                    aligned[target] = value;
                }
                rows.push(aligned);
            }
        }

        // Rows pushed before later columns appeared are shorter
        let width = columns.len();
        for row in &mut rows {
            row.resize(width, None);
        }

        TextTable { columns, rows }
    }
}
