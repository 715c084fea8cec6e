//! File type labelling for cached records
//!
//! The label is a dotted extension such as `.exe` or `.tar.gz`. It is taken
//! from the upload's filename when there is one, otherwise sniffed from the
//! content.

pub mod magic;

/// Known media types and their canonical extensions
static MEDIA_EXTENSIONS: &[(&str, &str)] = &[
    ("text/plain", ".txt"),
    ("text/html", ".html"),
    ("text/xml", ".xml"),
    ("text/rtf", ".rtf"),
    ("text/x-shellscript", ".sh"),
    ("application/json", ".json"),
    ("application/pdf", ".pdf"),
    ("application/postscript", ".ps"),
    ("application/zip", ".zip"),
    ("application/gzip", ".gz"),
    ("application/x-bzip2", ".bz2"),
    ("application/x-xz", ".xz"),
    ("application/zstd", ".zst"),
    ("application/x-7z-compressed", ".7z"),
    ("application/vnd.rar", ".rar"),
    ("application/x-tar", ".tar"),
    ("application/vnd.microsoft.portable-executable", ".exe"),
    ("application/x-executable", ".elf"),
    ("application/java-vm", ".class"),
    ("application/wasm", ".wasm"),
    ("application/octet-stream", ".bin"),
    ("image/png", ".png"),
    ("image/jpeg", ".jpg"),
    ("image/gif", ".gif"),
];

/// Derive a type label from a filename and/or file content.
///
/// Returns `None` for extension-less names with no content to sniff, and for
/// empty content.
pub fn detect_type(filename: Option<&str>, content: Option<&[u8]>) -> Option<String> {
    if let Some(suffix) = filename.and_then(compound_suffix) {
        return Some(suffix);
    }

    let media_type = sniff_media_type(content?)?;
    Some(extension_for_media_type(media_type))
}

/// All dot-delimited suffixes of the final path component, joined.
///
/// Leading dots (hidden files) and trailing dots do not count as suffixes.
pub fn compound_suffix(filename: &str) -> Option<String> {
    let name = filename.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(filename);
    if name.is_empty() || name.ends_with('.') {
        return None;
    }

    let stem_and_suffixes = name.trim_start_matches('.');
    let (_, suffixes) = stem_and_suffixes.split_once('.')?;
    Some(format!(".{}", suffixes.to_ascii_lowercase()))
}

/// Media type of raw content. Empty content cannot be sniffed.
pub fn sniff_media_type(content: &[u8]) -> Option<&'static str> {
    if content.is_empty() {
        return None;
    }

    if let Some(sig) = magic::detect_signature(content) {
        tracing::trace!("Matched signature: {}", sig.description);
        return Some(sig.media_type);
    }

    Some(magic::detect_text(content).unwrap_or("application/octet-stream"))
}

/// Map a media type to an extension, falling back to its subtype token.
pub fn extension_for_media_type(media_type: &str) -> String {
    let essence = media_type
        .split(';')
        .next()
        .unwrap_or(media_type)
        .trim()
        .to_ascii_lowercase();

    if let Some((_, ext)) = MEDIA_EXTENSIONS.iter().find(|(mt, _)| *mt == essence) {
        return (*ext).to_string();
    }

    let subtype = essence.rsplit('/').next().unwrap_or(&essence);
    format!(".{}", subtype)
}
