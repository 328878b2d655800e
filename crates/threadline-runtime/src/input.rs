//! Validation of user-submitted messages and attachments.

use base64::Engine as _;
use tracing::warn;

use threadline_core::content::{Content, Part, Role};

use crate::error::RuntimeError;

pub const PDF_MIME_TYPE: &str = "application/pdf";

const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp", PDF_MIME_TYPE];

const FILE_NAMES_PREFIX: &str = "<!-- FILE_NAMES:";
const FILE_NAMES_SUFFIX: &str = "-->";

/// Upload bounds applied to chat and edit payloads.
#[derive(Clone, Debug)]
pub struct AttachmentLimits {
    pub max_files: usize,
    pub max_image_bytes: usize,
    pub max_pdf_bytes: usize,
}

impl Default for AttachmentLimits {
    fn default() -> Self {
        Self {
            max_files: 4,
            max_image_bytes: 5 * 1024 * 1024,
            max_pdf_bytes: 20 * 1024 * 1024,
        }
    }
}

/// A decoded data-URI upload.
#[derive(Clone, Debug, PartialEq)]
pub struct Attachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Decode `data:<mime>;base64,<payload>` and enforce type and size limits.
pub fn parse_data_uri(uri: &str, limits: &AttachmentLimits) -> Result<Attachment, RuntimeError> {
    if uri.is_empty() {
        return Err(RuntimeError::validation("empty file data"));
    }
    let Some(rest) = uri.strip_prefix("data:") else {
        return Err(RuntimeError::validation("invalid data URI"));
    };
    let Some((header, payload)) = rest.split_once(',') else {
        return Err(RuntimeError::validation("invalid data URI"));
    };
    if header.is_empty() || payload.is_empty() {
        return Err(RuntimeError::validation("invalid data URI"));
    }

    let mut params = header.split(';');
    let mime_type = match params.next().map(str::trim).unwrap_or_default() {
        "" => return Err(RuntimeError::validation("missing file MIME type")),
        "image/jpg" => "image/jpeg",
        other => other,
    };
    if !params.any(|p| p.trim() == "base64") {
        return Err(RuntimeError::validation("file data must be base64 encoded"));
    }
    if !ALLOWED_MIME_TYPES.contains(&mime_type) {
        return Err(RuntimeError::validation(format!("unsupported file type: {mime_type}")));
    }

    let data = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| RuntimeError::validation(format!("invalid base64 data: {e}")))?;
    if data.is_empty() {
        return Err(RuntimeError::validation("empty file data"));
    }

    let max_size = if mime_type == PDF_MIME_TYPE {
        if !data.starts_with(b"%PDF-") {
            return Err(RuntimeError::validation("invalid PDF data"));
        }
        limits.max_pdf_bytes
    } else {
        limits.max_image_bytes
    };
    if data.len() > max_size {
        return Err(RuntimeError::validation(format!("file size exceeds {max_size} bytes")));
    }

    Ok(Attachment {
        mime_type: mime_type.to_string(),
        data,
    })
}

/// Strip CR/LF from both ends, keeping interior line breaks.
pub fn trim_message(message: &str) -> &str {
    message.trim_matches(|c| c == '\n' || c == '\r')
}

/// Build the user content for a chat or edit submission.
///
/// File names ride along in the text as a leading HTML comment so history
/// can show them next to the attachments later.
pub fn build_user_content(
    message: &str,
    images: &[String],
    file_names: &[String],
    limits: &AttachmentLimits,
) -> Result<Content, RuntimeError> {
    if images.len() > limits.max_files {
        return Err(RuntimeError::validation(format!(
            "too many images (max {})",
            limits.max_files
        )));
    }
    if !file_names.is_empty() && file_names.len() != images.len() {
        return Err(RuntimeError::validation("file_names length must match images"));
    }

    let text = trim_message(message);
    let text = if file_names.is_empty() {
        text.to_string()
    } else {
        embed_file_names(text, file_names)
    };

    let mut parts = Vec::with_capacity(1 + images.len());
    if !text.is_empty() {
        parts.push(Part::text(text));
    }
    for image in images {
        let attachment = parse_data_uri(image, limits).inspect_err(|e| {
            warn!(error = %e, "rejected attachment");
        })?;
        parts.push(Part::inline_data(attachment.mime_type, attachment.data));
    }

    if parts.is_empty() {
        return Err(RuntimeError::validation("message or images required"));
    }
    Ok(Content::new(Role::User, parts))
}

pub fn embed_file_names(text: &str, file_names: &[String]) -> String {
    let names = serde_json::to_string(file_names).unwrap_or_else(|_| "[]".to_string());
    format!("{FILE_NAMES_PREFIX} {names} {FILE_NAMES_SUFFIX}\n{text}")
}

/// Split a leading file-name marker off `text`.
/// Text without a well-formed marker is returned unchanged.
pub fn extract_file_names(text: &str) -> (Vec<String>, &str) {
    let Some(rest) = text.strip_prefix(FILE_NAMES_PREFIX) else {
        return (Vec::new(), text);
    };
    let Some(end) = rest.find(FILE_NAMES_SUFFIX) else {
        return (Vec::new(), text);
    };
    match serde_json::from_str::<Vec<String>>(rest[..end].trim()) {
        Ok(names) => {
            let body = &rest[end + FILE_NAMES_SUFFIX.len()..];
            (names, body.strip_prefix('\n').unwrap_or(body))
        }
        Err(_) => (Vec::new(), text),
    }
}

/// Seed text for the title model: the message, or a note about attachments.
pub fn title_seed(message: &str, attachment_count: usize) -> String {
    let text = trim_message(message);
    if text.is_empty() && attachment_count > 0 {
        format!("User sent {attachment_count} files")
    } else {
        text.to_string()
    }
}
