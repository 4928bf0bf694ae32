use std::path::Path;

/// How a workspace file is surfaced on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Text,
    Image,
    Binary,
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "ico", "tiff", "tif",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "py", "js", "ts", "vue", "html", "css", "scss", "less", "json", "xml", "yaml",
    "yml", "toml", "ini", "cfg", "conf", "c", "cpp", "cc", "cxx", "h", "hpp", "hxx", "java", "kt",
    "scala", "rs", "go", "php", "rb", "swift", "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd",
    "sql", "r", "m", "pl", "lua", "vim", "dockerfile", "gitignore", "gitattributes",
    "editorconfig", "log", "out", "err", "debug", "trace", "csv",
];

pub fn detect(path: &str) -> FileType {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        FileType::Image
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        FileType::Text
    } else {
        // Documents, archives, fonts, media and unknown extensions alike are
        // served as binary: metadata plus a download hint.
        FileType::Binary
    }
}

pub fn is_image(path: &str) -> bool {
    detect(path) == FileType::Image
}

pub fn mime_type(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" | "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" | "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}
