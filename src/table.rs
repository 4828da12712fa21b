//! Header-driven reader for the feed's comma-separated tables.
//!
//! Each line is tokenized on its own, so a stray quote damages only the row
//! it sits on. Rows that are too short, carry an unbalanced quote or fail a
//! typed conversion are dropped and counted, never fatal. Only a header
//! lacking a required column fails the whole table.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::TableError;

const DELIMITER: char = ',';
const QUOTE: char = '"';

/// A row type that can be built from one table line.
pub trait FromRow: Sized {
    /// Columns without which the table is unusable.
    const REQUIRED: &'static [&'static str];

    /// `None` drops the row.
    fn from_row(row: &Row<'_>) -> Option<Self>;
}

#[derive(Debug)]
pub struct Parsed<T> {
    pub rows: Vec<T>,
    pub dropped: usize,
}

/// Column name to position, taken from the header line.
#[derive(Debug, Clone)]
pub struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn from_header(fields: Vec<String>) -> Self {
        let index = fields
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect();
        Columns { index }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

pub struct Row<'a> {
    columns: &'a Columns,
    fields: &'a [String],
}

impl<'a> Row<'a> {
    /// Field text, `None` when the column is absent or the row is short.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let fields = self.fields;
        self.columns
            .position(column)
            .and_then(|i| fields.get(i))
            .map(String::as_str)
    }

    /// Field text, `None` when absent or empty.
    pub fn non_empty(&self, column: &str) -> Option<&'a str> {
        self.get(column).filter(|s| !s.is_empty())
    }

    pub fn parse<T: FromStr>(&self, column: &str) -> Option<T> {
        self.get(column)?.parse().ok()
    }
}

/// Fields of one line plus whether its quotes were balanced.
fn tokenize(line: &str) -> (Vec<String>, bool) {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in line.chars() {
        match c {
            QUOTE => quoted = !quoted,
            DELIMITER if !quoted => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());

    (fields, !quoted)
}

/// Split one line into trimmed fields.
///
/// Every double quote toggles the quoted state and is not kept; a delimiter
/// inside quotes is plain content.
pub fn split_line(line: &str) -> Vec<String> {
    tokenize(line).0
}

/// Parse a whole table; the first line is the header. Blank lines are skipped.
pub fn parse_table<T: FromRow>(text: &str) -> Result<Parsed<T>, TableError> {
    let text = text.trim_start_matches('\u{feff}');
    let mut lines = text.lines();

    let header = lines
        .next()
        .filter(|line| !line.trim().is_empty())
        .ok_or_else(|| TableError::Header("table is empty".to_string()))?;
    let (header_fields, balanced) = tokenize(header);
    if !balanced {
        return Err(TableError::Header("unbalanced quote in header".to_string()));
    }
    let columns = Columns::from_header(header_fields);

    let mut min_len = 0;
    for &name in T::REQUIRED {
        let position = columns
            .position(name)
            .ok_or(TableError::MissingColumn(name))?;
        min_len = min_len.max(position + 1);
    }

    let mut rows = Vec::new();
    let mut dropped = 0;
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let (fields, balanced) = tokenize(line);
        if !balanced || fields.len() < min_len {
            dropped += 1;
            continue;
        }
        let row = Row {
            columns: &columns,
            fields: &fields,
        };
        match T::from_row(&row) {
            Some(value) => rows.push(value),
            None => dropped += 1,
        }
    }

    Ok(Parsed { rows, dropped })
}
