//! Content-type detection and the content-type → extension / coarse-type
//! tables used when deriving file facets from inscription payloads.

/// Detects the effective content type of a payload by sniffing the first
/// 512 bytes. The declared type wins only when sniffing comes back with the
/// generic `application/octet-stream` and a declared type is present.
pub fn detect_content_type(content: &[u8], declared: &str) -> String {
  let sniffed = sniff(content);
  if sniffed == "application/octet-stream" && !declared.is_empty() {
    normalize(declared).to_string()
  } else {
    sniffed.to_string()
  }
}

/// Magic-number sniff over the first 512 bytes.
fn sniff(content: &[u8]) -> &'static str {
  let header = &content[..content.len().min(512)];

  for (magic, content_type) in MAGIC_NUMBERS {
    if header.starts_with(magic) {
      return content_type;
    }
  }

  // RIFF containers carry their subtype at offset 8
  if header.starts_with(b"RIFF") && header.len() >= 12 {
    match &header[8..12] {
      b"WEBP" => return "image/webp",
      b"WAVE" => return "audio/wav",
      b"AVI " => return "video/x-msvideo",
      _ => {}
    }
  }

  // ISO base media files carry "ftyp" at offset 4
  if header.len() >= 8 && &header[4..8] == b"ftyp" {
    return "video/mp4";
  }

  if looks_like_html(header) {
    return "text/html";
  }

  if !header.is_empty() && std::str::from_utf8(header).is_ok() {
    return "text/plain";
  }

  "application/octet-stream"
}

const MAGIC_NUMBERS: &[(&[u8], &str)] = &[
  (b"\x89PNG\r\n\x1a\n", "image/png"),
  (b"\xff\xd8\xff", "image/jpeg"),
  (b"GIF87a", "image/gif"),
  (b"GIF89a", "image/gif"),
  (b"BM", "image/bmp"),
  (b"\x00\x00\x01\x00", "image/ico"),
  (b"%PDF-", "application/pdf"),
  (b"PK\x03\x04", "application/zip"),
  (b"\x1f\x8b", "application/gzip"),
  (b"Rar!\x1a\x07", "application/x-rar-compressed"),
  (b"7z\xbc\xaf\x27\x1c", "application/x-7z-compressed"),
  (b"ID3", "audio/mpeg"),
  (b"\xff\xfb", "audio/mpeg"),
  (b"OggS", "audio/ogg"),
  (b"fLaC", "audio/flac"),
  (b"\x1a\x45\xdf\xa3", "video/webm"),
];

fn looks_like_html(header: &[u8]) -> bool {
  let Ok(text) = std::str::from_utf8(header) else {
    return false;
  };
  let trimmed = text.trim_start().to_ascii_lowercase();
  trimmed.starts_with("<!doctype html") || trimmed.starts_with("<html")
}

/// Strips content-type parameters, e.g. `image/jpeg;binary` → `image/jpeg`.
fn normalize(content_type: &str) -> &str {
  content_type
    .split(';')
    .next()
    .unwrap_or_default()
    .trim()
}

/// Maps a content type to its canonical file extension, empty string when
/// unknown.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
  match normalize(content_type).to_lowercase().as_str() {
    // images
    "image/jpeg" | "image/jpg" => ".jpg",
    "image/png" => ".png",
    "image/gif" => ".gif",
    "image/webp" => ".webp",
    "image/svg+xml" => ".svg",
    "image/bmp" => ".bmp",
    "image/tiff" => ".tiff",
    "image/ico" => ".ico",
    // videos
    "video/mp4" => ".mp4",
    "video/mpeg" => ".mpeg",
    "video/webm" => ".webm",
    "video/ogg" => ".ogv",
    "video/quicktime" => ".mov",
    "video/x-msvideo" => ".avi",
    // audio
    "audio/mpeg" | "audio/mp3" => ".mp3",
    "audio/wav" => ".wav",
    "audio/ogg" => ".ogg",
    "audio/webm" => ".weba",
    "audio/aac" => ".aac",
    "audio/flac" => ".flac",
    // documents
    "application/pdf" => ".pdf",
    "application/msword" => ".doc",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
    "application/vnd.ms-excel" => ".xls",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => ".xlsx",
    "application/vnd.ms-powerpoint" => ".ppt",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation" => ".pptx",
    // text
    "text/plain" => ".txt",
    "text/html" => ".html",
    "text/css" => ".css",
    "text/javascript" | "application/javascript" => ".js",
    "application/json" => ".json",
    "text/xml" | "application/xml" => ".xml",
    "text/csv" => ".csv",
    "text/markdown" => ".md",
    // archives
    "application/zip" => ".zip",
    "application/x-rar-compressed" => ".rar",
    "application/x-7z-compressed" => ".7z",
    "application/x-tar" => ".tar",
    "application/gzip" => ".gz",
    _ => "",
  }
}

/// Coarse file-type bucket of a content type.
pub fn file_type(content_type: &str) -> &'static str {
  let content_type = normalize(content_type).to_lowercase();

  if content_type.starts_with("image/") {
    "image"
  } else if content_type.starts_with("video/") {
    "video"
  } else if content_type.starts_with("audio/") {
    "audio"
  } else if content_type.starts_with("text/") {
    "text"
  } else if content_type.contains("pdf")
    || content_type.contains("word")
    || content_type.contains("excel")
    || content_type.contains("powerpoint")
    || content_type.contains("document")
  {
    "document"
  } else if content_type.contains("zip")
    || content_type.contains("rar")
    || content_type.contains("tar")
    || content_type.contains("gzip")
    || content_type.contains("compressed")
  {
    "archive"
  } else if content_type.contains("json") || content_type.contains("xml") {
    "data"
  } else {
    "other"
  }
}

/// Extracts a file name from a MetaID path, empty when the path carries no
/// real file name (e.g. a bare `/file`). A `host:` prefix is stripped first.
pub fn file_name(path: &str) -> String {
  let path = strip_host(path);
  let base = path.rsplit('/').next().unwrap_or_default();
  match base {
    "" | "/" | "." | "file" => String::new(),
    name => name.to_string(),
  }
}

/// Extension of the path's file name, including the leading dot; falls back
/// to the content-type table when the path has none.
pub fn file_extension(path: &str, content_type: &str) -> String {
  let path = strip_host(path);
  let base = path.rsplit('/').next().unwrap_or_default();

  if let Some(index) = base.rfind('.') {
    if index > 0 && index + 1 < base.len() {
      return base[index..].to_string();
    }
  }

  extension_for_content_type(content_type).to_string()
}

fn strip_host(path: &str) -> &str {
  match path.find(':') {
    Some(index) => &path[index + 1..],
    None => path,
  }
}
