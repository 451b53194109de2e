//! GitHub repository coordinates derived from remote URLs.
//!
//! The downstream remote is usually a GitHub repository; its `owner/name`
//! slug and the matching REST API base are derived from the clone URL so
//! that they rarely need to be configured. GitHub Enterprise Server hosts
//! expose the API under `https://<host>/api/v3`.

/// Extract the `owner/name` slug from a GitHub clone URL.
///
/// Accepts `https://host/owner/name(.git)`, `ssh://git@host/owner/name(.git)`
/// and the scp-like `git@host:owner/name(.git)`. Returns `None` for local
/// paths and anything that does not end in exactly two path segments.
pub fn repo_slug(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/');
    let path = match url.split_once("://") {
        Some(("file", _)) => return None,
        Some((_, rest)) => rest.split_once('/')?.1,
        None => {
            let (host, path) = url.split_once(':')?;
            if host.contains('/') || !host.contains('@') {
                return None;
            }
            path
        }
    };
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
            Some(format!("{}/{}", owner, name))
        }
        _ => None,
    }
}

/// Host part of a clone URL, without user info or port.
pub fn host(url: &str) -> Option<String> {
    let url = url.trim();
    let authority = match url.split_once("://") {
        Some((_, rest)) => rest.split('/').next()?,
        None => url.split_once(':')?.0,
    };
    let authority = authority.rsplit('@').next()?;
    let host = authority.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// REST API base URL for the host serving `url`.
///
/// - `github.com` → `https://api.github.com`
/// - any other host → `https://<host>/api/v3`
pub fn derive_api_url(url: &str) -> Option<String> {
    let host = host(url)?;
    if host == "github.com" {
        Some("https://api.github.com".to_string())
    } else {
        Some(format!("https://{}/api/v3", host))
    }
}
