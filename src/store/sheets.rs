use crate::engine::util::truncate_with_ellipsis;
use crate::error::StoreError;
use crate::store::{
    BlockRef, CellRange, CollectionMeta, Grid, StructuralEdit, TabularStore, ValueWrite,
};
use anyhow::{Context, Result};
use rand::Rng;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::env;
use std::sync::Mutex;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";
const REQUEST_TIMEOUT_SECS: u64 = 60;
const MAX_ERROR_BODY_CHARS: usize = 300;

pub struct SheetsStore {
    client: Client,
    base_url: String,
    spreadsheet_id: String,
    token: String,
    sheet_ids: Mutex<BTreeMap<String, i64>>,
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

/// 408, 429 and 5xx are worth retrying; anything else is a caller or auth problem.
pub fn classify_status(op: &str, status: StatusCode, body: &str) -> StoreError {
    let message = format!(
        "HTTP {}: {}",
        status.as_u16(),
        truncate_with_ellipsis(body.trim(), MAX_ERROR_BODY_CHARS)
    );
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        StoreError::transient(op, message)
    } else {
        StoreError::permanent(op, message)
    }
}

fn classify_send_error(op: &str, err: reqwest::Error) -> StoreError {
    if err.is_builder() {
        StoreError::permanent(op, err.to_string())
    } else {
        StoreError::transient(op, err.to_string())
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_grid(range: &Value) -> Grid {
    range
        .get("values")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| cells.iter().map(cell_text).collect())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn grid_range(sheet_id: i64, block: &BlockRef) -> Value {
    json!({
        "sheetId": sheet_id,
        "startRowIndex": block.start_row.saturating_sub(1),
        "endRowIndex": block.end_row,
        "startColumnIndex": 0,
        "endColumnIndex": block.column_count.max(1),
    })
}

impl SheetsStore {
    pub fn new(spreadsheet_id: &str, token: &str, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            token: token.to_string(),
            sheet_ids: Mutex::new(BTreeMap::new()),
        })
    }

    /// Authentication is handled outside this tool; it only needs a bearer token.
    pub fn from_env(spreadsheet_id: &str) -> Result<Self> {
        let token = env_non_empty("ROWMIGRATE_SHEETS_TOKEN")
            .or_else(|| env_non_empty("GOOGLE_OAUTH_ACCESS_TOKEN"))
            .context(
                "ROWMIGRATE_SHEETS_TOKEN (or GOOGLE_OAUTH_ACCESS_TOKEN) is required \
                 for the sheets store",
            )?;
        let base_url = env_non_empty("ROWMIGRATE_SHEETS_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::new(spreadsheet_id, &token, &base_url)
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}{}",
            self.base_url, self.spreadsheet_id, suffix
        )
    }

    fn send(&self, op: &str, request: RequestBuilder) -> Result<Value, StoreError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .map_err(|err| classify_send_error(op, err))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| StoreError::transient(op, format!("failed to read body: {err}")))?;
        if !status.is_success() {
            return Err(classify_status(op, status, &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|err| StoreError::permanent(op, format!("invalid JSON response: {err}")))
    }

    fn sheet_id(&self, op: &str, name: &str) -> Result<i64, StoreError> {
        let cached = self
            .sheet_ids
            .lock()
            .map_err(|_| StoreError::permanent(op, "sheet id cache poisoned"))?
            .get(name)
            .copied();
        if let Some(id) = cached {
            return Ok(id);
        }
        self.collections()?
            .into_iter()
            .find(|meta| meta.name == name)
            .map(|meta| meta.id)
            .ok_or_else(|| StoreError::permanent(op, format!("collection not found: {name}")))
    }

    fn resolve_id(
        &self,
        op: &str,
        name: &str,
        ids: &mut BTreeMap<String, i64>,
    ) -> Result<i64, StoreError> {
        if let Some(id) = ids.get(name) {
            return Ok(*id);
        }
        let id = self.sheet_id(op, name)?;
        ids.insert(name.to_string(), id);
        Ok(id)
    }

    fn edit_request(
        &self,
        op: &str,
        edit: &StructuralEdit,
        ids: &mut BTreeMap<String, i64>,
    ) -> Result<Value, StoreError> {
        let request = match edit {
            StructuralEdit::AddCollection { name } => {
                // Pick the id up front so later edits in the same batch can address the sheet.
                let mut id = rand::thread_rng().gen_range(1..i32::MAX as i64);
                while ids.values().any(|existing| *existing == id) {
                    id = rand::thread_rng().gen_range(1..i32::MAX as i64);
                }
                ids.insert(name.clone(), id);
                json!({ "addSheet": { "properties": { "sheetId": id, "title": name } } })
            }
            StructuralEdit::AppendRows { collection, count } => json!({
                "appendDimension": {
                    "sheetId": self.resolve_id(op, collection, ids)?,
                    "dimension": "ROWS",
                    "length": count,
                }
            }),
            StructuralEdit::CopyBlock {
                source,
                destination,
            } => {
                let source_id = self.resolve_id(op, &source.collection, ids)?;
                let destination_id = self.resolve_id(op, &destination.collection, ids)?;
                json!({
                    "copyPaste": {
                        "source": grid_range(source_id, source),
                        "destination": grid_range(destination_id, destination),
                        "pasteType": "PASTE_NORMAL",
                        "pasteOrientation": "NORMAL",
                    }
                })
            }
            StructuralEdit::DeleteRows {
                collection,
                start_row,
                end_row,
            } => json!({
                "deleteDimension": {
                    "range": {
                        "sheetId": self.resolve_id(op, collection, ids)?,
                        "dimension": "ROWS",
                        "startIndex": start_row.saturating_sub(1),
                        "endIndex": end_row,
                    }
                }
            }),
        };
        Ok(request)
    }
}

impl TabularStore for SheetsStore {
    fn collections(&self) -> Result<Vec<CollectionMeta>, StoreError> {
        const OP: &str = "collections";
        let request = self.client.get(self.url("")).query(&[(
            "fields",
            "sheets.properties(sheetId,title,gridProperties(rowCount,columnCount))",
        )]);
        let body = self.send(OP, request)?;
        let sheets = body
            .get("sheets")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut out = Vec::with_capacity(sheets.len());
        for sheet in sheets {
            let props = &sheet["properties"];
            let Some(id) = props.get("sheetId").and_then(Value::as_i64) else {
                continue;
            };
            let Some(name) = props.get("title").and_then(Value::as_str) else {
                continue;
            };
            let grid = &props["gridProperties"];
            out.push(CollectionMeta {
                id,
                name: name.to_string(),
                row_count: grid.get("rowCount").and_then(Value::as_u64).unwrap_or(0) as u32,
                column_count: grid.get("columnCount").and_then(Value::as_u64).unwrap_or(0) as u32,
            });
        }

        if let Ok(mut cache) = self.sheet_ids.lock() {
            *cache = out.iter().map(|meta| (meta.name.clone(), meta.id)).collect();
        }
        Ok(out)
    }

    fn read_range(&self, range: &CellRange) -> Result<Grid, StoreError> {
        let mut grids = self.read_ranges(std::slice::from_ref(range))?;
        Ok(grids.pop().unwrap_or_default())
    }

    fn read_ranges(&self, ranges: &[CellRange]) -> Result<Vec<Grid>, StoreError> {
        const OP: &str = "read-ranges";
        if ranges.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = vec![
            ("majorDimension".to_string(), "ROWS".to_string()),
            ("valueRenderOption".to_string(), "FORMATTED_VALUE".to_string()),
        ];
        query.extend(ranges.iter().map(|r| ("ranges".to_string(), r.to_a1())));
        let body = self.send(OP, self.client.get(self.url("/values:batchGet")).query(&query))?;
        let value_ranges = body
            .get("valueRanges")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if value_ranges.len() != ranges.len() {
            return Err(StoreError::permanent(
                OP,
                format!(
                    "requested {} ranges but received {}",
                    ranges.len(),
                    value_ranges.len()
                ),
            ));
        }
        Ok(value_ranges.iter().map(parse_grid).collect())
    }

    fn write_values(&self, writes: &[ValueWrite]) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }
        let data = writes
            .iter()
            .map(|w| json!({ "range": w.range.to_a1(), "values": w.values }))
            .collect::<Vec<_>>();
        let payload = json!({ "valueInputOption": "RAW", "data": data });
        let request = self
            .client
            .post(self.url("/values:batchUpdate"))
            .json(&payload);
        self.send("write-values", request)?;
        Ok(())
    }

    fn apply_edits(&self, edits: &[StructuralEdit]) -> Result<(), StoreError> {
        const OP: &str = "apply-edits";
        if edits.is_empty() {
            return Ok(());
        }
        let mut ids = self
            .sheet_ids
            .lock()
            .map_err(|_| StoreError::permanent(OP, "sheet id cache poisoned"))?
            .clone();
        let requests = edits
            .iter()
            .map(|edit| self.edit_request(OP, edit, &mut ids))
            .collect::<Result<Vec<_>, _>>()?;
        let request = self
            .client
            .post(self.url(":batchUpdate"))
            .json(&json!({ "requests": requests }));
        self.send(OP, request)?;
        if let Ok(mut cache) = self.sheet_ids.lock() {
            *cache = ids;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_matches_retry_taxonomy() {
        assert!(classify_status("op", StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status("op", StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(classify_status("op", StatusCode::REQUEST_TIMEOUT, "").is_transient());
        assert!(!classify_status("op", StatusCode::UNAUTHORIZED, "").is_transient());
        assert!(!classify_status("op", StatusCode::BAD_REQUEST, "bad range").is_transient());
    }

    #[test]
    fn parse_grid_stringifies_non_text_cells() {
        let body = json!({ "range": "A!A1:C2", "values": [["a", 1, true], []] });
        assert_eq!(
            parse_grid(&body),
            vec![vec!["a".to_string(), "1".into(), "true".into()], Vec::<String>::new()]
        );
        assert!(parse_grid(&json!({ "range": "A!A1:A1" })).is_empty());
    }

    #[test]
    fn grid_range_is_zero_based_half_open() {
        let block = BlockRef {
            collection: "A".into(),
            start_row: 5,
            end_row: 5,
            column_count: 12,
        };
        let range = grid_range(7, &block);
        assert_eq!(range["startRowIndex"], 4);
        assert_eq!(range["endRowIndex"], 5);
        assert_eq!(range["endColumnIndex"], 12);
    }
}
