// gsheets_read: read values from one or more ranges of a spreadsheet

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, ToolError};
use crate::http_client::{Api, GoogleHttpClient};
use crate::models::mcp::{ToolDefinition, ToolResult};
use crate::models::sheets::{BatchGetValuesResponse, Spreadsheet, ValueRange};

pub const NAME: &str = "gsheets_read";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadSheetArgs {
    spreadsheet_id: String,
    #[serde(default)]
    ranges: Option<Vec<String>>,
    #[serde(default)]
    sheet_id: Option<i64>,
}

/// One range of values as returned to the caller
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RangeOutput {
    range: String,
    rows: usize,
    columns: usize,
    values: Vec<Vec<Value>>,
}

impl From<ValueRange> for RangeOutput {
    fn from(range: ValueRange) -> Self {
        let columns = range.values.iter().map(Vec::len).max().unwrap_or(0);
        Self {
            range: range.range.unwrap_or_default(),
            rows: range.values.len(),
            columns,
            values: range.values,
        }
    }
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: NAME,
        description: "Read data from a Google Spreadsheet. Reads the given A1 ranges, or a whole sheet when no ranges are given",
        input_schema: json!({
            "type": "object",
            "properties": {
                "spreadsheetId": {
                    "type": "string",
                    "description": "ID of the spreadsheet"
                },
                "ranges": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional A1 ranges, e.g. ['Sheet1!A1:B10']"
                },
                "sheetId": {
                    "type": "number",
                    "description": "Optional sheet ID to read when no ranges are given"
                }
            },
            "required": ["spreadsheetId"]
        }),
    }
}

/// Quote a sheet title for use as an A1 range
pub fn quote_sheet_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

pub async fn handle(client: &GoogleHttpClient, arguments: Value) -> Result<ToolResult> {
    let args: ReadSheetArgs = serde_json::from_value(arguments)?;

    let spreadsheet_id = args.spreadsheet_id.trim();
    if spreadsheet_id.is_empty() {
        return Err(ToolError::InvalidArguments(
            "spreadsheetId must not be empty".to_string(),
        ));
    }

    let ranges: Vec<String> = args
        .ranges
        .unwrap_or_default()
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();

    let output: Vec<RangeOutput> = if ranges.is_empty() {
        let range = whole_sheet_range(client, spreadsheet_id, args.sheet_id).await?;
        let url = client.url(Api::Sheets, &["spreadsheets", spreadsheet_id, "values", &range])?;
        let values: ValueRange = client.get_json(url, &[]).await?;
        vec![values.into()]
    } else {
        let url = client.url(
            Api::Sheets,
            &["spreadsheets", spreadsheet_id, "values:batchGet"],
        )?;
        let query: Vec<(&str, String)> = ranges.into_iter().map(|r| ("ranges", r)).collect();
        let response: BatchGetValuesResponse = client.get_json(url, &query).await?;
        response.value_ranges.into_iter().map(RangeOutput::from).collect()
    };

    let text = serde_json::to_string_pretty(&output)
        .map_err(|e| ToolError::Internal(anyhow::anyhow!("Failed to render sheet values: {}", e)))?;
    Ok(ToolResult::text(text))
}

/// Resolve the A1 range covering the requested sheet, or the first sheet
async fn whole_sheet_range(
    client: &GoogleHttpClient,
    spreadsheet_id: &str,
    sheet_id: Option<i64>,
) -> Result<String> {
    let url = client.url(Api::Sheets, &["spreadsheets", spreadsheet_id])?;
    let spreadsheet: Spreadsheet = client
        .get_json(url, &[("fields", "sheets.properties(sheetId,title)".to_string())])
        .await?;

    select_sheet_title(&spreadsheet, sheet_id).map(|title| quote_sheet_title(&title))
}

fn select_sheet_title(spreadsheet: &Spreadsheet, sheet_id: Option<i64>) -> Result<String> {
    let sheet = match sheet_id {
        Some(id) => spreadsheet
            .sheets
            .iter()
            .find(|s| s.properties.sheet_id == id)
            .ok_or_else(|| ToolError::InvalidArguments(format!("sheet {} not found", id)))?,
        None => spreadsheet
            .sheets
            .first()
            .ok_or_else(|| ToolError::Unsupported("spreadsheet has no sheets".to_string()))?,
    };
    Ok(sheet.properties.title.clone())
}
