//! Magic byte detection for media types

/// Magic signature mapped to the media type it identifies
#[derive(Debug, Clone)]
pub struct MagicSignature {
    pub offset: usize,
    pub bytes: &'static [u8],
    pub media_type: &'static str,
    pub description: &'static str,
}

impl MagicSignature {
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() >= self.offset + self.bytes.len()
            && &data[self.offset..self.offset + self.bytes.len()] == self.bytes
    }
}

/// All known binary signatures, most specific first
pub static MAGIC_SIGNATURES: &[MagicSignature] = &[
    // Executables
    MagicSignature {
        offset: 0,
        bytes: &[0x7F, b'E', b'L', b'F'],
        media_type: "application/x-executable",
        description: "ELF executable",
    },
    MagicSignature {
        offset: 0,
        bytes: &[b'M', b'Z'],
        media_type: "application/vnd.microsoft.portable-executable",
        description: "DOS/PE executable",
    },
    MagicSignature {
        offset: 0,
        bytes: &[0xCF, 0xFA, 0xED, 0xFE],
        media_type: "application/x-mach-binary",
        description: "Mach-O 64-bit",
    },
    MagicSignature {
        offset: 0,
        bytes: &[0xCA, 0xFE, 0xBA, 0xBE],
        media_type: "application/java-vm",
        description: "Java class file",
    },
    MagicSignature {
        offset: 0,
        bytes: &[0x00, b'a', b's', b'm'],
        media_type: "application/wasm",
        description: "WebAssembly module",
    },
    // Documents
    MagicSignature {
        offset: 0,
        bytes: b"%PDF-",
        media_type: "application/pdf",
        description: "PDF document",
    },
    MagicSignature {
        offset: 0,
        bytes: &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1],
        media_type: "application/x-ole-storage",
        description: "OLE2 compound document",
    },
    MagicSignature {
        offset: 0,
        bytes: b"{\\rtf",
        media_type: "text/rtf",
        description: "Rich Text Format",
    },
    MagicSignature {
        offset: 0,
        bytes: b"%!PS",
        media_type: "application/postscript",
        description: "PostScript document",
    },
    // Images
    MagicSignature {
        offset: 0,
        bytes: &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
        media_type: "image/png",
        description: "PNG image",
    },
    MagicSignature {
        offset: 0,
        bytes: &[0xFF, 0xD8, 0xFF],
        media_type: "image/jpeg",
        description: "JPEG image",
    },
    MagicSignature {
        offset: 0,
        bytes: b"GIF8",
        media_type: "image/gif",
        description: "GIF image",
    },
    // Archives
    MagicSignature {
        offset: 0,
        bytes: &[b'P', b'K', 0x03, 0x04],
        media_type: "application/zip",
        description: "ZIP archive",
    },
    MagicSignature {
        offset: 0,
        bytes: &[0x1f, 0x8b],
        media_type: "application/gzip",
        description: "gzip compressed",
    },
    MagicSignature {
        offset: 0,
        bytes: &[b'B', b'Z', b'h'],
        media_type: "application/x-bzip2",
        description: "bzip2 compressed",
    },
    MagicSignature {
        offset: 0,
        bytes: &[0xFD, b'7', b'z', b'X', b'Z', 0x00],
        media_type: "application/x-xz",
        description: "xz compressed",
    },
    MagicSignature {
        offset: 0,
        bytes: &[0x28, 0xB5, 0x2F, 0xFD],
        media_type: "application/zstd",
        description: "zstd compressed",
    },
    MagicSignature {
        offset: 0,
        bytes: &[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C],
        media_type: "application/x-7z-compressed",
        description: "7-zip archive",
    },
    MagicSignature {
        offset: 0,
        bytes: b"Rar!\x1a\x07",
        media_type: "application/vnd.rar",
        description: "RAR archive",
    },
    MagicSignature {
        offset: 257,
        bytes: b"ustar",
        media_type: "application/x-tar",
        description: "POSIX tar archive",
    },
];

/// Media type of a binary signature, if any matches
pub fn detect_signature(data: &[u8]) -> Option<&'static MagicSignature> {
    MAGIC_SIGNATURES.iter().find(|sig| sig.matches(data))
}

/// Classify content that matched no binary signature.
///
/// Text is recognised when the bytes are valid UTF-8 without control
/// characters other than common whitespace.
pub fn detect_text(data: &[u8]) -> Option<&'static str> {
    let text = std::str::from_utf8(data).ok()?;
    let printable = text
        .chars()
        .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t' | '\x0c'));
    if !printable {
        return None;
    }

    let head = text.trim_start();
    let lowered: String = head.chars().take(64).collect::<String>().to_ascii_lowercase();

    if head.starts_with("#!") {
        return Some("text/x-shellscript");
    }
    if lowered.starts_with("<!doctype html") || lowered.starts_with("<html") {
        return Some("text/html");
    }
    if lowered.starts_with("<?xml") {
        return Some("text/xml");
    }
    if (head.starts_with('{') || head.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(text).is_ok()
    {
        return Some("application/json");
    }

    Some("text/plain")
}
