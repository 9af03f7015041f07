//! Artifact file naming
//!
//! Client-supplied names never become paths; only a sanitised extension is
//! kept so the engine can still sniff the container format.

const MAX_EXTENSION_LEN: usize = 8;

/// Lowercase, alphanumeric extension of a client file name
pub fn file_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    sanitize(ext)
}

/// Extension for a MIME content type (`audio/mpeg` → `mp3`)
pub fn extension_for_content_type(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
    let known = match essence.as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => Some("wav"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/ogg" | "application/ogg" => Some("ogg"),
        "audio/mp4" | "audio/x-m4a" | "audio/aac" => Some("m4a"),
        "audio/aiff" | "audio/x-aiff" => Some("aiff"),
        "audio/webm" => Some("webm"),
        _ => None,
    };

    match known {
        Some(ext) => Some(ext.to_string()),
        None => essence.split_once('/').and_then(|(_, subtype)| sanitize(subtype)),
    }
}

fn sanitize(ext: &str) -> Option<String> {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext)
}
