//! Key and content-type helpers.

/// Content type of a typical website file, by extension.
///
/// The extension is everything after the last `.`, compared
/// case-insensitively; unknown extensions map to
/// `application/octet-stream`.
///
/// # Examples
///
/// ```
/// use zipdrop_core::utils::content_type_for;
///
/// assert_eq!(content_type_for("css/app.CSS"), "text/css");
/// assert_eq!(content_type_for("LICENSE"), "application/octet-stream");
/// ```
#[must_use]
pub fn content_type_for(path: &str) -> &'static str {
    let extension = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match extension.as_str() {
        "bmp" => "image/bmp",
        "css" => "text/css",
        "gif" => "image/gif",
        "htm" | "html" => "text/html",
        "ico" => "image/x-icon",
        "jpeg" | "jpg" => "image/jpeg",
        "js" => "application/x-javascript",
        "json" => "application/json",
        "png" => "image/png",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Destination key for an archive path.
///
/// Archive separators are kept as-is; only leading separators are dropped.
/// A non-empty `prefix` (already stripped of surrounding `/`) is joined
/// with a single `/`.
///
/// # Examples
///
/// ```
/// use zipdrop_core::utils::object_key;
///
/// assert_eq!(object_key(None, "/css/app.css"), "css/app.css");
/// assert_eq!(object_key(Some("v2"), "index.html"), "v2/index.html");
/// ```
#[must_use]
pub fn object_key(prefix: Option<&str>, path: &str) -> String {
    let path = path.trim_start_matches('/');
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}/{path}"),
        _ => path.to_owned(),
    }
}
