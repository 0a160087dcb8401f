// gsheets_update_cell: write a single value into a spreadsheet cell

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Result, ToolError};
use crate::http_client::{Api, GoogleHttpClient};
use crate::models::mcp::{ToolDefinition, ToolResult};
use crate::models::sheets::{UpdateValuesResponse, ValueRange};

pub const NAME: &str = "gsheets_update_cell";

/// A1 reference to one cell, optionally prefixed by a (quoted) sheet name
static CELL_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(?:'[^']+'|[A-Za-z0-9_ ]+)!)?[A-Za-z]{1,3}[0-9]+$").unwrap());

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateCellArgs {
    file_id: String,
    range: String,
    value: Value,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: NAME,
        description: "Update a single cell in a Google Spreadsheet",
        input_schema: json!({
            "type": "object",
            "properties": {
                "fileId": {
                    "type": "string",
                    "description": "ID of the spreadsheet"
                },
                "range": {
                    "type": "string",
                    "description": "Cell in A1 notation, e.g. 'Sheet1!A1'"
                },
                "value": {
                    "type": ["string", "number", "boolean", "null"],
                    "description": "New cell value; null clears the cell"
                }
            },
            "required": ["fileId", "range", "value"]
        }),
    }
}

pub fn is_single_cell(range: &str) -> bool {
    CELL_RANGE.is_match(range)
}

pub async fn handle(client: &GoogleHttpClient, arguments: Value) -> Result<ToolResult> {
    let args: UpdateCellArgs = serde_json::from_value(arguments)?;

    let file_id = args.file_id.trim();
    if file_id.is_empty() {
        return Err(ToolError::InvalidArguments("fileId must not be empty".to_string()));
    }

    let range = args.range.trim();
    if !is_single_cell(range) {
        return Err(ToolError::InvalidArguments(format!(
            "range must reference a single cell in A1 notation, got '{}'",
            range
        )));
    }

    let value = match args.value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => args.value,
        Value::Null => Value::String(String::new()),
        Value::Array(_) | Value::Object(_) => {
            return Err(ToolError::InvalidArguments(
                "value must be a string, number or boolean".to_string(),
            ))
        }
    };

    let url = client.url(
        Api::Sheets,
        &["spreadsheets", file_id, "values", range],
    )?;
    let body = ValueRange::single(range, value.clone());
    let response: UpdateValuesResponse = client
        .put_json(url, &[("valueInputOption", "RAW".to_string())], &body)
        .await?;

    let updated = response.updated_range.as_deref().unwrap_or(range);
    tracing::info!(
        spreadsheet_id = file_id,
        range = updated,
        cells = response.updated_cells.unwrap_or(0),
        "Cell updated"
    );

    Ok(ToolResult::text(format!(
        "Updated cell {} to value: {}",
        updated,
        display_value(&value)
    )))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
