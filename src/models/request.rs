use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::classification::{Complexity, Priority};

/// Broad attachment category used for classification signals and token
/// estimation. Derived from the declared content type and filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Text,
    Code,
    Document,
    Data,
    Image,
}

impl AttachmentKind {
    /// Estimated tokens per megabyte for this kind of payload.
    pub fn tokens_per_mb(&self) -> u64 {
        match self {
            AttachmentKind::Text => 500_000,
            AttachmentKind::Code => 300_000,
            AttachmentKind::Document => 400_000,
            AttachmentKind::Data => 200_000,
            AttachmentKind::Image => 1_000_000,
        }
    }
}

/// File extensions treated as source code (forces the technical domain).
const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "c", "cc", "cpp", "h", "hpp", "cs", "rb",
    "php", "swift", "kt", "scala", "sh", "sql",
];

/// A request attachment with a declared length and content type.
///
/// `bytes` carries the base64-encoded payload when the caller inlines it;
/// large callers may send metadata only.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
    /// Base64-encoded payload, optional.
    #[serde(default)]
    pub bytes: Option<String>,
}

impl Attachment {
    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    pub fn is_code(&self) -> bool {
        self.extension()
            .map(|ext| CODE_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    pub fn kind(&self) -> AttachmentKind {
        let ct = self.content_type.to_ascii_lowercase();
        if ct.starts_with("image/") {
            return AttachmentKind::Image;
        }
        if self.is_code() {
            return AttachmentKind::Code;
        }
        if ct == "application/pdf"
            || ct.contains("msword")
            || ct.contains("officedocument")
            || matches!(self.extension().as_deref(), Some("pdf" | "doc" | "docx" | "md"))
        {
            return AttachmentKind::Document;
        }
        if ct.contains("json")
            || ct.contains("csv")
            || ct.contains("octet-stream")
            || matches!(self.extension().as_deref(), Some("json" | "csv" | "parquet" | "xml"))
        {
            return AttachmentKind::Data;
        }
        AttachmentKind::Text
    }

    /// Decode the inline payload, if present.
    pub fn decode_bytes(&self) -> Option<Vec<u8>> {
        use base64::Engine;
        self.bytes
            .as_deref()
            .and_then(|b| base64::engine::general_purpose::STANDARD.decode(b).ok())
    }
}

/// Caller-supplied routing hints. All fields optional; the classifier treats
/// them as high-confidence signals rather than commands.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestHints {
    #[serde(rename = "useCase")]
    pub use_case: Option<String>,
    pub complexity: Option<Complexity>,
    pub priority: Option<Priority>,
    /// Maximum spend for this request in USD.
    pub budget: Option<f64>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// An ingress routing request. Immutable after construction.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    /// Stable identifier (correlation id from the caller, or generated).
    pub id: String,
    /// Caller identity as established by the outer auth layer.
    pub caller: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub hints: RequestHints,
    pub received_at: std::time::Instant,
}

impl RouteRequest {
    pub fn new(id: impl Into<String>, caller: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            caller: caller.into(),
            content: content.into(),
            attachments: Vec::new(),
            hints: RequestHints::default(),
            received_at: std::time::Instant::now(),
        }
    }

    pub fn with_hints(mut self, hints: RequestHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Combined declared size of all attachments.
    pub fn attachment_bytes(&self) -> u64 {
        self.attachments.iter().map(|a| a.size_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn att(name: &str, ct: &str, size: u64) -> Attachment {
        Attachment {
            filename: name.to_string(),
            content_type: ct.to_string(),
            size_bytes: size,
            bytes: None,
        }
    }

    #[test]
    fn code_extension_detection() {
        assert!(att("main.rs", "text/plain", 10).is_code());
        assert!(att("script.PY", "text/plain", 10).is_code());
        assert!(!att("notes.txt", "text/plain", 10).is_code());
        assert!(!att("no_extension", "text/plain", 10).is_code());
    }

    #[test]
    fn kind_classification() {
        assert_eq!(att("photo.png", "image/png", 10).kind(), AttachmentKind::Image);
        assert_eq!(att("report.pdf", "application/pdf", 10).kind(), AttachmentKind::Document);
        assert_eq!(att("rows.csv", "text/csv", 10).kind(), AttachmentKind::Data);
        assert_eq!(att("lib.rs", "text/plain", 10).kind(), AttachmentKind::Code);
        assert_eq!(att("notes.txt", "text/plain", 10).kind(), AttachmentKind::Text);
    }

    #[test]
    fn inline_payload_decodes() {
        let mut a = att("notes.txt", "text/plain", 5);
        a.bytes = Some("aGVsbG8=".to_string());
        assert_eq!(a.decode_bytes().as_deref(), Some(b"hello".as_slice()));

        a.bytes = Some("not base64!!".to_string());
        assert!(a.decode_bytes().is_none());
    }

    #[test]
    fn aggregate_attachment_size() {
        let req = RouteRequest::new("r1", "caller", "hello").with_attachments(vec![
            att("a.txt", "text/plain", 1000),
            att("b.txt", "text/plain", 2000),
        ]);
        assert_eq!(req.attachment_bytes(), 3000);
    }
}
