pub mod auth;
pub mod error;
pub mod types;

pub use auth::ServiceAccountKey;
pub use error::{Result, SheetsError};
pub use types::{a1_range, column_letter, first_row_of_range, AppendResult, ValueRange};

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use url::Url;

use auth::TokenSource;
use types::{AppendValuesResponse, BatchUpdateResponse, Spreadsheet};

const BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Extract the spreadsheet id from a sharing URL
/// (`https://docs.google.com/spreadsheets/d/<id>/edit#gid=0`) or accept a bare id.
pub fn spreadsheet_id_from_location(location: &str) -> Option<String> {
    let location = location.trim();
    if let Some((_, rest)) = location.split_once("/spreadsheets/d/") {
        let id = rest.split(['/', '?', '#']).next().unwrap_or("");
        return (!id.is_empty()).then(|| id.to_string());
    }
    let bare = !location.is_empty()
        && location
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    bare.then(|| location.to_string())
}

pub struct SheetsClient {
    client: reqwest::Client,
    spreadsheet_id: String,
    tokens: TokenSource,
    /// Sheet title → numeric sheet id, loaded lazily.
    sheet_ids: Mutex<Option<HashMap<String, i64>>>,
}

impl SheetsClient {
    pub fn new(location: &str, key: ServiceAccountKey) -> Result<Self> {
        let spreadsheet_id = spreadsheet_id_from_location(location).ok_or_else(|| {
            SheetsError::Parse(format!("not a spreadsheet URL or id: {location}"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            spreadsheet_id,
            tokens: TokenSource::new(key)?,
            sheet_ids: Mutex::new(None),
        })
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    /// Read all values in an A1 range, rows in stored order. Trailing empty
    /// cells are omitted by the API, so rows may be ragged.
    pub async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let url = self.url(&[range], &[("majorDimension", "ROWS")])?;
        let token = self.tokens.token(&self.client).await?;
        let resp = self.client.get(url).bearer_auth(token).send().await?;
        let vr: ValueRange = Self::parse(resp).await?;
        Ok(vr.values)
    }

    /// Append one row after the last row of the table found in `range`.
    pub async fn append_row(&self, range: &str, row: Vec<String>) -> Result<AppendResult> {
        let url = self.url(
            &[&format!("{range}:append")],
            &[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")],
        )?;
        let body = ValueRange {
            range: None,
            major_dimension: Some("ROWS".to_string()),
            values: vec![row],
        };
        let token = self.tokens.token(&self.client).await?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let appended: AppendValuesResponse = Self::parse(resp).await?;
        let updated_range = appended
            .updates
            .and_then(|u| u.updated_range)
            .ok_or_else(|| SheetsError::Parse("append response carried no updatedRange".into()))?;
        let first_row = first_row_of_range(&updated_range).ok_or_else(|| {
            SheetsError::Parse(format!("cannot read row from updatedRange '{updated_range}'"))
        })?;

        tracing::debug!(range, updated_range = %updated_range, "Row appended");
        Ok(AppendResult {
            updated_range,
            first_row,
        })
    }

    /// Overwrite the cells of an A1 range.
    pub async fn update_values(&self, range: &str, rows: Vec<Vec<String>>) -> Result<()> {
        let url = self.url(&[range], &[("valueInputOption", "RAW")])?;
        let body = ValueRange {
            range: Some(range.to_string()),
            major_dimension: Some("ROWS".to_string()),
            values: rows,
        };
        let token = self.tokens.token(&self.client).await?;
        let resp = self
            .client
            .put(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let _: serde_json::Value = Self::parse(resp).await?;
        Ok(())
    }

    /// Numeric id of a sheet by title, or `None` if the sheet doesn't exist.
    pub async fn sheet_id(&self, title: &str) -> Result<Option<i64>> {
        let mut cache = self.sheet_ids.lock().await;
        if cache.is_none() {
            *cache = Some(self.load_sheet_ids().await?);
        }
        Ok(cache.as_ref().and_then(|ids| ids.get(title).copied()))
    }

    /// Add a sheet with the given title. Returns its numeric id.
    pub async fn add_sheet(&self, title: &str) -> Result<i64> {
        let request = serde_json::json!({
            "addSheet": { "properties": { "title": title } }
        });
        let reply = self.batch_update(vec![request]).await?;
        let sheet_id = reply
            .replies
            .first()
            .and_then(|r| r.pointer("/addSheet/properties/sheetId"))
            .and_then(|v| v.as_i64())
            .ok_or_else(|| SheetsError::Parse("addSheet reply carried no sheetId".into()))?;

        let mut cache = self.sheet_ids.lock().await;
        if let Some(ids) = cache.as_mut() {
            ids.insert(title.to_string(), sheet_id);
        }
        tracing::info!(title, sheet_id, "Created sheet");
        Ok(sheet_id)
    }

    /// Read the note on one cell. `row` is 1-based, `col` is 0-based.
    pub async fn get_note(&self, title: &str, row: usize, col: usize) -> Result<Option<String>> {
        let range = a1_range(title, &format!("{}{row}", column_letter(col)));
        let url = self.url(
            &[],
            &[
                ("ranges", range.as_str()),
                ("fields", "sheets.data.rowData.values.note"),
            ],
        )?;
        let token = self.tokens.token(&self.client).await?;
        let resp = self.client.get(url).bearer_auth(token).send().await?;
        let sheet: Spreadsheet = Self::parse(resp).await?;

        Ok(sheet
            .sheets
            .into_iter()
            .flat_map(|s| s.data)
            .flat_map(|g| g.row_data)
            .flat_map(|r| r.values)
            .find_map(|c| c.note))
    }

    /// Replace the note on one cell. `row` is 1-based, `col` is 0-based.
    pub async fn set_note(&self, title: &str, row: usize, col: usize, note: &str) -> Result<()> {
        let sheet_id = self
            .sheet_id(title)
            .await?
            .ok_or_else(|| SheetsError::Api {
                status: 404,
                message: format!("sheet '{title}' not found"),
            })?;

        let request = serde_json::json!({
            "updateCells": {
                "range": {
                    "sheetId": sheet_id,
                    "startRowIndex": row.saturating_sub(1),
                    "endRowIndex": row,
                    "startColumnIndex": col,
                    "endColumnIndex": col + 1,
                },
                "rows": [{ "values": [{ "note": note }] }],
                "fields": "note",
            }
        });
        self.batch_update(vec![request]).await?;
        Ok(())
    }

    async fn batch_update(&self, requests: Vec<serde_json::Value>) -> Result<BatchUpdateResponse> {
        let url = self.url(&[], &[])?;
        let url = Url::parse(&format!("{}:batchUpdate", url.as_str()))
            .map_err(|e| SheetsError::Parse(e.to_string()))?;
        let token = self.tokens.token(&self.client).await?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "requests": requests }))
            .send()
            .await?;
        Self::parse(resp).await
    }

    async fn load_sheet_ids(&self) -> Result<HashMap<String, i64>> {
        let url = self.url(&[], &[("fields", "sheets.properties")])?;
        let token = self.tokens.token(&self.client).await?;
        let resp = self.client.get(url).bearer_auth(token).send().await?;
        let sheet: Spreadsheet = Self::parse(resp).await?;

        Ok(sheet
            .sheets
            .into_iter()
            .filter_map(|s| s.properties)
            .map(|p| (p.title, p.sheet_id))
            .collect())
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(BASE_URL).map_err(|e| SheetsError::Parse(e.to_string()))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SheetsError::Parse("base URL cannot take path segments".into()))?;
            path.push(&self.spreadsheet_id);
            if !segments.is_empty() {
                path.push("values");
                path.extend(segments);
            }
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SheetsError::from_status(status.as_u16(), body));
        }
        Ok(resp.json().await?)
    }
}
