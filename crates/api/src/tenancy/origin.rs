//! Embedding host checks for widget keys

/// Whether `host` may embed a widget whose key carries `allowed`.
///
/// `allowed` is a comma-separated list. A missing or blank list and the
/// entry `*` allow every host. `*.example.com` matches any subdomain of
/// `example.com` (not the apex itself). Comparison ignores case, and an
/// entry without a port also matches the host with a port.
pub fn host_allowed(allowed: Option<&str>, host: &str) -> bool {
    let allowed = match allowed.map(str::trim) {
        None | Some("") => return true,
        Some(list) => list,
    };

    let host = host.trim().to_ascii_lowercase();
    let hostname = host.split(':').next().unwrap_or_default();

    allowed
        .split(',')
        .map(|entry| entry.trim().to_ascii_lowercase())
        .filter(|entry| !entry.is_empty())
        .any(|entry| {
            if entry == "*" {
                return true;
            }
            match entry.strip_prefix("*.") {
                Some(base) => hostname
                    .strip_suffix(base)
                    .and_then(|prefix| prefix.strip_suffix('.'))
                    .is_some_and(|label| !label.is_empty()),
                None => entry == host || entry == hostname,
            }
        })
}
