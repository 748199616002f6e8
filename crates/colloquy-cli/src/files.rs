//! File attachments

use anyhow::Context;
use base64::Engine;
use colloquy_engine::FileRef;
use std::path::Path;

/// Guess a mime type from a file extension
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "md" | "markdown" => "text/markdown",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        _ => "text/plain",
    }
}

/// Read a file into an attachment.
///
/// Images become `data:` URLs; everything else is read as text.
pub fn load_attachment(path: &Path) -> anyhow::Result<FileRef> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime_type = mime_for_path(path);

    if mime_type.starts_with("image/") {
        let bytes =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        return Ok(FileRef {
            name,
            mime_type: mime_type.to_string(),
            text: None,
            url: Some(format!("data:{};base64,{}", mime_type, data)),
        });
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {} as text", path.display()))?;
    Ok(FileRef {
        name,
        mime_type: mime_type.to_string(),
        text: Some(text),
        url: None,
    })
}
