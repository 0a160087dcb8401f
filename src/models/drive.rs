use serde::Deserialize;

/// Prefix shared by all native Google Workspace mime types
pub const GOOGLE_APPS_PREFIX: &str = "application/vnd.google-apps.";

pub const GOOGLE_DOCUMENT: &str = "application/vnd.google-apps.document";
pub const GOOGLE_SPREADSHEET: &str = "application/vnd.google-apps.spreadsheet";
pub const GOOGLE_PRESENTATION: &str = "application/vnd.google-apps.presentation";
pub const GOOGLE_DRAWING: &str = "application/vnd.google-apps.drawing";

/// Fields requested for search results and metadata lookups
pub const FILE_FIELDS: &str = "id,name,mimeType,modifiedTime,size";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub modified_time: Option<String>,
    /// Byte size as a decimal string; absent for native Google files
    #[serde(default)]
    pub size: Option<String>,
}

impl DriveFile {
    pub fn is_google_native(&self) -> bool {
        self.mime_type.starts_with(GOOGLE_APPS_PREFIX)
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Export target for a native Google file type
pub fn export_mime_type(google_mime_type: &str) -> Option<&'static str> {
    match google_mime_type {
        GOOGLE_DOCUMENT => Some("text/markdown"),
        GOOGLE_SPREADSHEET => Some("text/csv"),
        GOOGLE_PRESENTATION => Some("text/plain"),
        GOOGLE_DRAWING => Some("image/png"),
        _ => None,
    }
}

/// Mime types returned to the caller as text rather than base64
pub fn is_text_mime_type(mime_type: &str) -> bool {
    let essence = mime_type.split(';').next().unwrap_or("").trim();
    essence.starts_with("text/")
        || matches!(
            essence,
            "application/json" | "application/xml" | "application/javascript"
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_mime_types() {
        assert_eq!(export_mime_type(GOOGLE_DOCUMENT), Some("text/markdown"));
        assert_eq!(export_mime_type(GOOGLE_SPREADSHEET), Some("text/csv"));
        assert_eq!(export_mime_type(GOOGLE_PRESENTATION), Some("text/plain"));
        assert_eq!(export_mime_type(GOOGLE_DRAWING), Some("image/png"));
        assert_eq!(export_mime_type("application/vnd.google-apps.form"), None);
    }

    #[test]
    fn test_text_mime_types() {
        assert!(is_text_mime_type("text/plain"));
        assert!(is_text_mime_type("text/csv; charset=utf-8"));
        assert!(is_text_mime_type("application/json"));
        assert!(!is_text_mime_type("application/pdf"));
        assert!(!is_text_mime_type("image/png"));
    }

    #[test]
    fn test_drive_file_parsing() {
        let file: DriveFile = serde_json::from_str(
            r#"{"id":"1","name":"a.pdf","mimeType":"application/pdf","size":"2048"}"#,
        )
        .unwrap();
        assert_eq!(file.size_bytes(), Some(2048));
        assert!(!file.is_google_native());

        let doc: DriveFile =
            serde_json::from_str(&format!(r#"{{"id":"2","mimeType":"{}"}}"#, GOOGLE_DOCUMENT))
                .unwrap();
        assert!(doc.is_google_native());
        assert_eq!(doc.size_bytes(), None);
    }
}
