//! Cache-Control policy per response flavor and file extension.

use crate::config::CacheControlSettings;

const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Long-lived binary assets: images, fonts, media, archives.
const LONG_LIVED_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".ico", ".woff", ".woff2", ".ttf", ".otf",
    ".eot", ".mp4", ".webm", ".mp3", ".wav", ".pdf", ".zip", ".tar", ".gz",
];

/// Scripts and styles change more often than images but still cache long.
const SCRIPT_STYLE_EXTENSIONS: &[&str] = &[".css", ".js", ".mjs"];

/// Document-like content that should revalidate on the short max-age.
const REVALIDATE_EXTENSIONS: &[&str] = &[
    ".html", ".htm", ".json", ".xml", ".txt", ".md", ".yml", ".yaml", ".toml",
];

/// Pick the `Cache-Control` value for a response.
///
/// Versioned-flavor responses are content-addressed and therefore immutable;
/// everything else is decided by extension.
pub fn cache_control(path: &str, versioned: bool, settings: &CacheControlSettings) -> String {
    if versioned {
        return IMMUTABLE_CACHE_CONTROL.to_string();
    }

    let ext = extension_of(path).to_ascii_lowercase();
    if LONG_LIVED_EXTENSIONS.contains(&ext.as_str())
        || SCRIPT_STYLE_EXTENSIONS.contains(&ext.as_str())
    {
        format!("public, max-age={}", settings.static_max_age)
    } else if REVALIDATE_EXTENSIONS.contains(&ext.as_str()) {
        format!("public, max-age={}, must-revalidate", settings.dynamic_max_age)
    } else {
        format!("public, max-age={}", settings.dynamic_max_age)
    }
}

fn extension_of(path: &str) -> &str {
    let name_start = path.rfind('/').map_or(0, |idx| idx + 1);
    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => &path[name_start + dot..],
        _ => "",
    }
}
