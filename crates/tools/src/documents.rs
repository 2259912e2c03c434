//! Document tools over the uploads directory.
//!
//! `document_qa` extracts the text of an uploaded PDF and asks the model
//! a question grounded in that text. `list_documents` and `document_path`
//! let the agent discover what has been uploaded.

use async_trait::async_trait;
use deskmate_core::error::ToolError;
use deskmate_core::provider::ProviderRequest;
use deskmate_core::tool::{Tool, ToolResult};
use deskmate_core::{Message, Provider};
use lopdf::Document;
use std::path::PathBuf;
use std::sync::Arc;

/// How many characters of extracted PDF text are sent as context.
const PDF_CONTEXT_CHARS: usize = 2000;

/// Reject filenames that could escape the uploads directory.
///
/// Returns the trimmed bare name only if it contains no path separators
/// or parent-directory components.
pub fn sanitize_filename(filename: &str) -> Option<&str> {
    let name = filename.trim();
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return None;
    }
    Some(name)
}

/// Truncate `text` to at most `max_chars` characters.
///
/// Char-aware so multi-byte UTF-8 never gets split mid-character.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    // Byte length <= max_chars guarantees the char count fits too.
    if text.len() <= max_chars {
        return text;
    }
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Extract the plain text of every page of a PDF.
///
/// lopdf parsing is CPU-bound, so it runs on the blocking pool. Pages
/// that fail to decode are skipped rather than failing the whole file.
async fn extract_pdf_text(path: PathBuf) -> Result<String, String> {
    let handle = tokio::task::spawn_blocking(move || {
        let doc = Document::load(&path).map_err(|e| format!("Error reading PDF: {e}"))?;
        let mut text = String::new();
        for (page_number, _) in doc.get_pages() {
            if let Ok(page_text) = doc.extract_text(&[page_number]) {
                text.push_str(&page_text);
                text.push('\n');
            }
        }
        Ok(text)
    });
    handle
        .await
        .map_err(|e| format!("PDF extraction task failed: {e}"))?
}

/// Answer a question about an uploaded PDF.
///
/// The document text is extracted, truncated to a context window, and
/// sent to the model together with the question as a nested completion.
pub struct DocumentQaTool {
    provider: Arc<dyn Provider>,
    model: String,
    uploads_dir: PathBuf,
}

impl DocumentQaTool {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        uploads_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            uploads_dir: uploads_dir.into(),
        }
    }
}

#[async_trait]
impl Tool for DocumentQaTool {
    fn name(&self) -> &str {
        "document_qa"
    }

    fn description(&self) -> &str {
        "Answer a question about an uploaded PDF document. Reads the document's text and answers based on its content."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Name of the uploaded PDF file, e.g. 'report.pdf'"
                },
                "question": {
                    "type": "string",
                    "description": "The question to answer about the document"
                }
            },
            "required": ["filename", "question"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let filename = arguments["filename"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'filename' argument".into()))?;
        let question = arguments["question"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'question' argument".into()))?;

        let Some(safe_name) = sanitize_filename(filename) else {
            return Ok(ToolResult {
                call_id: String::new(),
                success: false,
                output: format!("File not found: {filename}"),
                data: None,
            });
        };
        let path = self.uploads_dir.join(safe_name);
        if !path.exists() {
            return Ok(ToolResult {
                call_id: String::new(),
                success: false,
                output: format!("File not found: {filename}"),
                data: None,
            });
        }

        let text = match extract_pdf_text(path).await {
            Ok(text) => text,
            Err(reason) => {
                return Ok(ToolResult {
                    call_id: String::new(),
                    success: false,
                    output: reason,
                    data: None,
                });
            }
        };
        if text.trim().is_empty() {
            return Ok(ToolResult {
                call_id: String::new(),
                success: false,
                output: format!(
                    "No text content found in '{filename}'. The PDF may be image-only or encrypted."
                ),
                data: None,
            });
        }

        let excerpt = truncate_chars(&text, PDF_CONTEXT_CHARS);
        let prompt = format!(
            "Context from PDF:\n{excerpt}\n\nQuestion: {question}\nAnswer based on the context."
        );
        let request = ProviderRequest::new(&self.model, vec![Message::user(prompt)]);

        match self.provider.complete(request).await {
            Ok(response) => Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: response.message.content,
                data: None,
            }),
            Err(e) => Ok(ToolResult {
                call_id: String::new(),
                success: false,
                output: format!("Failed to answer question about '{filename}': {e}"),
                data: None,
            }),
        }
    }
}

/// List the documents the user has uploaded.
pub struct ListDocumentsTool {
    uploads_dir: PathBuf,
}

impl ListDocumentsTool {
    pub fn new(uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
        }
    }
}

#[async_trait]
impl Tool for ListDocumentsTool {
    fn name(&self) -> &str {
        "list_documents"
    }

    fn description(&self) -> &str {
        "List the documents the user has uploaded and can ask questions about."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        if !self.uploads_dir.exists() {
            return Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: "No uploads folder found.".into(),
                data: None,
            });
        }

        let mut entries = match tokio::fs::read_dir(&self.uploads_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                return Ok(ToolResult {
                    call_id: String::new(),
                    success: false,
                    output: format!("Failed to list documents: {e}"),
                    data: None,
                });
            }
        };

        let mut names: Vec<String> = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                    if is_file {
                        names.push(entry.file_name().to_string_lossy().into_owned());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    return Ok(ToolResult {
                        call_id: String::new(),
                        success: false,
                        output: format!("Failed to list documents: {e}"),
                        data: None,
                    });
                }
            }
        }
        names.sort();

        if names.is_empty() {
            return Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: "No documents available.".into(),
                data: None,
            });
        }

        let mut output = String::from("Available documents:\n");
        output.push_str(&names.join("\n"));
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output,
            data: Some(serde_json::json!({ "documents": names })),
        })
    }
}

/// Resolve an uploaded document's stored path.
pub struct DocumentPathTool {
    uploads_dir: PathBuf,
}

impl DocumentPathTool {
    pub fn new(uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
        }
    }
}

#[async_trait]
impl Tool for DocumentPathTool {
    fn name(&self) -> &str {
        "document_path"
    }

    fn description(&self) -> &str {
        "Get the stored file path of an uploaded document so it can be referenced directly."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Name of the uploaded file, e.g. 'report.pdf'"
                }
            },
            "required": ["filename"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let filename = arguments["filename"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'filename' argument".into()))?;

        let path = sanitize_filename(filename).map(|name| self.uploads_dir.join(name));
        match path {
            Some(path) if path.exists() => {
                let file_path = path.display().to_string();
                Ok(ToolResult {
                    call_id: String::new(),
                    success: true,
                    output: format!("Document path: {file_path}"),
                    data: Some(serde_json::json!({ "path": file_path })),
                })
            }
            _ => Ok(ToolResult {
                call_id: String::new(),
                success: false,
                output: format!("File not found: {filename}"),
                data: None,
            }),
        }
    }
}
