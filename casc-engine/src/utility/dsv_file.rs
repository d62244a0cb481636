use crate::error::{CascError, Result};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// A struct to hold a Delimiter Separated Value File (DSV)
#[derive(Debug)]
pub(crate) struct DSVFile {
    /// The delimiter string
    delimiter: String,
    /// The comment indicator string
    comment: Option<String>,
    /// The rows within the DSV file, with their 1-based line numbers
    pub(crate) rows: Vec<(usize, Vec<String>)>,
}

impl DSVFile {
    /// Initializes a new instance with a given delimiter and optional comment string
    pub(crate) fn with_delimiter(delimiter: &str, comment: Option<&str>) -> Self {
        Self {
            delimiter: delimiter.to_string(),
            comment: comment.map(|s| s.to_string()),
            rows: Vec::new(),
        }
    }

    /// Loads DSV data from a reader (e.g., File, BufReader, etc.)
    pub(crate) fn load<R: Read>(&mut self, reader: R) -> Result<()> {
        let buffered = BufReader::new(reader);
        let supports_commenting = self.comment.as_deref().is_some_and(|c| !c.is_empty());

        for (number, line) in buffered.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                continue;
            }
            if supports_commenting {
                if let Some(ref comment) = self.comment {
                    if line.trim_start().starts_with(comment.as_str()) {
                        continue;
                    }
                }
            }
            let row: Vec<String> = line
                .split(self.delimiter.as_str())
                .map(|s| s.to_string())
                .collect();
            self.rows.push((number + 1, row));
        }
        Ok(())
    }

    /// Gets the header row, if any (first row)
    pub(crate) fn header(&self) -> Option<&Vec<String>> {
        self.rows.first().map(|(_, row)| row)
    }
}

/// One column of a bar table header, `name!type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarColumn {
    pub name: String,
    /// The declared type (`STRING:0`, `HEX:16`, ...). Only kept for re-serialisation.
    pub type_name: Option<String>,
}

/// One data row of a bar table, keyed by column name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BarRow {
    values: HashMap<String, String>,
}

impl BarRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    /// The cell value, treating an empty cell like a missing one.
    pub fn get_non_empty(&self, column: &str) -> Option<&str> {
        self.get(column).filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A `|`-separated manifest (`versions`, `cdns`, `.build.info`).
///
/// The first non-comment line names the columns; every other line is a row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BarTable {
    columns: Vec<BarColumn>,
    rows: Vec<BarRow>,
}

impl BarTable {
    /// Parses a bar table. `origin` names the source in error messages.
    ///
    /// A row whose cell count differs from the header's is a hard error.
    pub fn parse<R: Read>(reader: R, origin: &str) -> Result<Self> {
        let mut dsv = DSVFile::with_delimiter("|", Some("#"));
        dsv.load(reader)?;

        let header = dsv.header().ok_or_else(|| CascError::Parse {
            origin: origin.to_string(),
            line: 0,
            reason: "missing header row".to_string(),
        })?;

        let columns: Vec<BarColumn> = header
            .iter()
            .map(|cell| match cell.split_once('!') {
                Some((name, type_name)) => BarColumn {
                    name: name.trim().to_string(),
                    type_name: Some(type_name.trim().to_string()),
                },
                None => BarColumn {
                    name: cell.trim().to_string(),
                    type_name: None,
                },
            })
            .collect();

        let mut rows = Vec::with_capacity(dsv.rows.len().saturating_sub(1));
        for (line, cells) in dsv.rows.iter().skip(1) {
            if cells.len() != columns.len() {
                return Err(CascError::HeaderMismatch {
                    origin: origin.to_string(),
                    line: *line,
                    expected: columns.len(),
                    found: cells.len(),
                });
            }
            let values = columns
                .iter()
                .zip(cells.iter())
                .map(|(column, value)| (column.name.clone(), value.clone()))
                .collect();
            rows.push(BarRow { values });
        }

        Ok(Self { columns, rows })
    }

    pub fn parse_str(text: &str, origin: &str) -> Result<Self> {
        Self::parse(text.as_bytes(), origin)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|_| CascError::FileNotFound(path.display().to_string()))?;
        Self::parse(file, &path.display().to_string())
    }

    pub fn columns(&self) -> &[BarColumn] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn rows(&self) -> &[BarRow] {
        &self.rows
    }

    /// The first row whose `column` equals `value`.
    pub fn find_row(&self, column: &str, value: &str) -> Option<&BarRow> {
        self.rows.iter().find(|row| row.get(column) == Some(value))
    }
}

impl fmt::Display for BarTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header: Vec<String> = self
            .columns
            .iter()
            .map(|c| match &c.type_name {
                Some(t) => format!("{}!{}", c.name, t),
                None => c.name.clone(),
            })
            .collect();
        writeln!(f, "{}", header.join("|"))?;
        for row in &self.rows {
            let cells: Vec<&str> = self
                .columns
                .iter()
                .map(|c| row.get(&c.name).unwrap_or(""))
                .collect();
            writeln!(f, "{}", cells.join("|"))?;
        }
        Ok(())
    }
}
