use serde::{Deserialize, Serialize};

// --- Values API ---

/// A range of cell values. Values come back formatted, so strings throughout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_dimension: Option<String>,
    #[serde(default)]
    pub values: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendValuesResponse {
    pub updates: Option<UpdateValuesResponse>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateValuesResponse {
    pub updated_range: Option<String>,
    pub updated_rows: Option<u32>,
}

/// Where an append landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendResult {
    pub updated_range: String,
    /// 1-based row of the first appended row.
    pub first_row: usize,
}

// --- Spreadsheet metadata ---

#[derive(Debug, Clone, Deserialize)]
pub struct Spreadsheet {
    #[serde(default)]
    pub sheets: Vec<Sheet>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sheet {
    pub properties: Option<SheetProperties>,
    #[serde(default)]
    pub data: Vec<GridData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    pub sheet_id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridData {
    #[serde(default)]
    pub row_data: Vec<RowData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowData {
    #[serde(default)]
    pub values: Vec<CellData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CellData {
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateResponse {
    #[serde(default)]
    pub replies: Vec<serde_json::Value>,
}

// --- OAuth ---

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// Parse the first row number out of an A1 range like `Profiles!A12:R12`
/// or `'Run List'!A7`.
/// A1 range on a named sheet, e.g. `'Online Log'!A2`. The title is always
/// quoted so spaces and punctuation survive; embedded quotes are doubled.
/// Empty `cells` addresses the whole sheet.
pub fn a1_range(title: &str, cells: &str) -> String {
    let quoted = format!("'{}'", title.replace('\'', "''"));
    if cells.is_empty() {
        quoted
    } else {
        format!("{quoted}!{cells}")
    }
}

pub fn first_row_of_range(range: &str) -> Option<usize> {
    let cells = range.rsplit_once('!').map_or(range, |(_, cells)| cells);
    let start = cells.split(':').next()?;
    let digits: String = start.chars().skip_while(|c| c.is_ascii_alphabetic()).collect();
    digits.parse().ok().filter(|row| *row > 0)
}

/// Spreadsheet column letter for a 0-based column index (`0` → `A`, `26` → `AA`).
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}
