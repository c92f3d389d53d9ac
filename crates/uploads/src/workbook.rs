use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// One spreadsheet row. A `None` cell is physically absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub cells: Vec<Option<String>>,
}

impl Row {
    pub fn new(cells: Vec<Option<String>>) -> Self {
        Self { cells }
    }

    /// Build a row from plain strings; empty strings become absent cells.
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cells = values
            .into_iter()
            .map(Into::into)
            .map(|s: String| if s.is_empty() { None } else { Some(s) })
            .collect();
        Self { cells }
    }

    /// Cell text at `index`, or `None` when absent or blank.
    pub fn cell(&self, index: usize) -> Option<&str> {
        self.cells
            .get(index)
            .and_then(|c| c.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn is_blank(&self) -> bool {
        (0..self.cells.len()).all(|i| self.cell(i).is_none())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    /// All rows, header included (row 1).
    pub rows: Vec<Row>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Data rows with their 1-based line numbers (the header is line 1).
    pub fn data_rows(&self) -> impl Iterator<Item = (usize, &Row)> {
        self.rows
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, row)| (i + 1, row))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        Self { sheets }
    }

    /// First sheet matching one of `names`, trying names in order.
    pub fn sheet(&self, names: &[&str]) -> Option<&Sheet> {
        names
            .iter()
            .find_map(|n| self.sheets.iter().find(|s| s.name == *n))
    }
}

/// Spreadsheet container format (bytes <-> rows).
///
/// Cell layout is fixed by [`crate::layout`]; a codec only moves rows in and
/// out of a file format.
pub trait WorkbookCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Workbook, UploadError>;

    fn encode(&self, workbook: &Workbook) -> Result<Vec<u8>, UploadError>;
}

/// JSON rendition of the row contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWorkbookCodec;

impl WorkbookCodec for JsonWorkbookCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Workbook, UploadError> {
        serde_json::from_slice(bytes).map_err(|e| UploadError::Codec(e.to_string()))
    }

    fn encode(&self, workbook: &Workbook) -> Result<Vec<u8>, UploadError> {
        serde_json::to_vec(workbook).map_err(|e| UploadError::Codec(e.to_string()))
    }
}
