/// Resolve a link target against the current tag-path, producing an absolute
/// directory and a base name.
///
/// A target that already starts with the separator is split at its last
/// separator as-is. A relative target is evaluated against a working path
/// built from the mount point plus the context tag texts; `.` segments are
/// skipped and `..` pops one segment, which may walk out of the mount point
/// entirely.
pub fn resolve_target(context: &[&str], target: &str, mount_point: &str) -> (String, String) {
    if let Some(rest) = target.strip_prefix('/') {
        return match rest.rfind('/') {
            Some(idx) => (format!("/{}", &rest[..idx]), rest[idx + 1..].to_string()),
            None => ("/".to_string(), rest.to_string()),
        };
    }

    let mut cwd: Vec<&str> = mount_point.split('/').filter(|s| !s.is_empty()).collect();
    cwd.extend(context);

    let tokens: Vec<&str> = target.split('/').collect();
    let mut base_name = "";
    for (i, token) in tokens.iter().enumerate() {
        if i == tokens.len() - 1 {
            base_name = token;
        } else if *token == "." || token.is_empty() {
            continue;
        } else if *token == ".." {
            cwd.pop();
        } else {
            cwd.push(token);
        }
    }

    (format!("/{}", cwd.join("/")), base_name.to_string())
}
