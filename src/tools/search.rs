// gdrive_search: full-text search over Drive files

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Result, ToolError};
use crate::http_client::{Api, GoogleHttpClient};
use crate::models::drive::{FileList, FILE_FIELDS};
use crate::models::mcp::{ToolDefinition, ToolResult};

pub const NAME: &str = "gdrive_search";

const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchArgs {
    query: String,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    page_size: Option<u32>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: NAME,
        description: "Search for files in Google Drive by full-text query",
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text to search for in file names and content"
                },
                "pageToken": {
                    "type": "string",
                    "description": "Token for the next page of results"
                },
                "pageSize": {
                    "type": "number",
                    "description": "Number of results per page (max 100)"
                }
            },
            "required": ["query"]
        }),
    }
}

/// Escape a user string for use inside a single-quoted Drive query literal
pub fn escape_query(query: &str) -> String {
    query.replace('\\', "\\\\").replace('\'', "\\'")
}

pub async fn handle(client: &GoogleHttpClient, arguments: Value) -> Result<ToolResult> {
    let args: SearchArgs = serde_json::from_value(arguments)?;

    let query = args.query.trim();
    if query.is_empty() {
        return Err(ToolError::InvalidArguments("query must not be empty".to_string()));
    }

    let page_size = args
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let mut params = vec![
        (
            "q",
            format!("fullText contains '{}' and trashed = false", escape_query(query)),
        ),
        ("pageSize", page_size.to_string()),
        ("fields", format!("nextPageToken,files({})", FILE_FIELDS)),
        ("supportsAllDrives", "true".to_string()),
        ("includeItemsFromAllDrives", "true".to_string()),
    ];
    if let Some(token) = args.page_token.filter(|t| !t.is_empty()) {
        params.push(("pageToken", token));
    }

    let url = client.url(Api::Drive, &["files"])?;
    let list: FileList = client.get_json(url, &params).await?;

    tracing::debug!(results = list.files.len(), "Drive search complete");
    Ok(ToolResult::text(format_results(query, &list)))
}

fn format_results(query: &str, list: &FileList) -> String {
    if list.files.is_empty() {
        return format!("No files found matching \"{}\"", query);
    }

    let mut out = format!("Found {} files:\n", list.files.len());
    for file in &list.files {
        out.push_str(&format!("{} ({}) - ID: {}", file.name, file.mime_type, file.id));
        if let Some(modified) = &file.modified_time {
            out.push_str(&format!(" - Modified: {}", modified));
        }
        out.push('\n');
    }

    if let Some(token) = &list.next_page_token {
        out.push_str(&format!("\nMore results available. Use pageToken: {}", token));
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::drive::DriveFile;
    use proptest::prelude::*;

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("budget"), "budget");
        assert_eq!(escape_query("Bob's notes"), "Bob\\'s notes");
        assert_eq!(escape_query("a\\b"), "a\\\\b");
        assert_eq!(escape_query("\\'"), "\\\\\\'");
    }

    proptest! {
        #[test]
        fn test_escaped_query_has_no_bare_quote(query in ".*") {
            let escaped = escape_query(&query);
            // Every quote must be preceded by an odd run of backslashes
            let chars: Vec<char> = escaped.chars().collect();
            for (i, c) in chars.iter().enumerate() {
                if *c == '\'' {
                    let run = chars[..i].iter().rev().take_while(|c| **c == '\\').count();
                    prop_assert_eq!(run % 2, 1);
                }
            }
        }
    }

    #[test]
    fn test_format_results() {
        let list = FileList {
            files: vec![DriveFile {
                id: "abc".to_string(),
                name: "Budget".to_string(),
                mime_type: "application/vnd.google-apps.spreadsheet".to_string(),
                modified_time: None,
                size: None,
            }],
            next_page_token: Some("next-1".to_string()),
        };

        let text = format_results("budget", &list);
        assert!(text.starts_with("Found 1 files:"));
        assert!(text.contains("Budget (application/vnd.google-apps.spreadsheet) - ID: abc"));
        assert!(text.ends_with("Use pageToken: next-1"));
    }

    #[test]
    fn test_format_empty_results() {
        let list = FileList {
            files: vec![],
            next_page_token: None,
        };
        assert_eq!(
            format_results("nothing", &list),
            "No files found matching \"nothing\""
        );
    }
}
