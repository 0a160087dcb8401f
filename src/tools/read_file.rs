// gdrive_read_file: export native Google files, download everything else

use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Result, ToolError};
use crate::http_client::{Api, GoogleHttpClient};
use crate::models::drive::{export_mime_type, is_text_mime_type, DriveFile, FILE_FIELDS};
use crate::models::mcp::{ResourceContents, ToolDefinition, ToolResult};

pub const NAME: &str = "gdrive_read_file";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadFileArgs {
    file_id: String,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: NAME,
        description: "Read the contents of a file from Google Drive. Google Docs are exported as Markdown, Sheets as CSV, Slides as plain text and Drawings as PNG",
        input_schema: json!({
            "type": "object",
            "properties": {
                "fileId": {
                    "type": "string",
                    "description": "ID of the file to read"
                }
            },
            "required": ["fileId"]
        }),
    }
}

pub async fn handle(
    client: &GoogleHttpClient,
    arguments: Value,
    max_download_bytes: u64,
) -> Result<ToolResult> {
    let args: ReadFileArgs = serde_json::from_value(arguments)?;
    let file_id = args.file_id.trim();
    if file_id.is_empty() {
        return Err(ToolError::InvalidArguments("fileId must not be empty".to_string()));
    }

    let url = client.url(Api::Drive, &["files", file_id])?;
    let file: DriveFile = client
        .get_json(
            url,
            &[
                ("fields", FILE_FIELDS.to_string()),
                ("supportsAllDrives", "true".to_string()),
            ],
        )
        .await?;

    let (bytes, mime_type) = if file.is_google_native() {
        let target = export_mime_type(&file.mime_type).ok_or_else(|| {
            ToolError::Unsupported(format!("cannot export files of type {}", file.mime_type))
        })?;

        tracing::debug!(file_id = file_id, export = target, "Exporting Google file");
        let url = client.url(Api::Drive, &["files", file_id, "export"])?;
        let (bytes, _) = client
            .get_bytes(url, &[("mimeType", target.to_string())], max_download_bytes)
            .await?;
        (bytes, target.to_string())
    } else {
        if let Some(size) = file.size_bytes() {
            if size > max_download_bytes {
                return Err(ToolError::Unsupported(format!(
                    "{} is {} bytes, larger than the {} byte limit",
                    file.name, size, max_download_bytes
                )));
            }
        }

        tracing::debug!(file_id = file_id, mime_type = %file.mime_type, "Downloading file");
        let url = client.url(Api::Drive, &["files", file_id])?;
        let (bytes, content_type) = client
            .get_bytes(
                url,
                &[
                    ("alt", "media".to_string()),
                    ("supportsAllDrives", "true".to_string()),
                ],
                max_download_bytes,
            )
            .await?;

        let mime_type = if file.mime_type.is_empty() {
            content_type.unwrap_or_else(|| "application/octet-stream".to_string())
        } else {
            file.mime_type.clone()
        };
        (bytes, mime_type)
    };

    Ok(ToolResult::resource(to_resource(&file.id, bytes, mime_type)))
}

fn to_resource(file_id: &str, bytes: Vec<u8>, mime_type: String) -> ResourceContents {
    let uri = format!("gdrive:///{}", file_id);

    if is_text_mime_type(&mime_type) {
        ResourceContents {
            uri,
            mime_type,
            text: Some(String::from_utf8_lossy(&bytes).into_owned()),
            blob: None,
        }
    } else {
        ResourceContents {
            uri,
            mime_type,
            text: None,
            blob: Some(base64::engine::general_purpose::STANDARD.encode(&bytes)),
        }
    }
}
