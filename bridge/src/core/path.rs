//! Path helpers: sanitizing remote path components and normalizing relative paths.

use std::path::{Component, Path};

/// Fallback used when sanitizing leaves nothing behind.
pub const UNKNOWN_COMPONENT: &str = "unknown";

/// Sanitize `value` for use as a single remote path component.
///
/// The result never contains `..`, `/` or `\`, only `[A-Za-z0-9._@-]`
/// characters, and never starts or ends with a dot or space.
pub fn sanitize_path_component(value: &str) -> String {
    let stripped = value.replace("..", "").replace(['/', '\\'], "_");
    let replaced: String = stripped
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        UNKNOWN_COMPONENT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Render `path` relative to `root` with `/` separators.
///
/// Returns `None` when `path` is not under `root` or has no normal components.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn normal_email_is_unchanged() {
        assert_eq!(
            sanitize_path_component("user@example.com"),
            "user@example.com"
        );
    }

    #[test]
    fn traversal_sequences_are_removed() {
        for value in ["../../admin", "../../../etc/passwd"] {
            let sanitized = sanitize_path_component(value);
            assert!(!sanitized.contains(".."), "{sanitized}");
            assert!(!sanitized.contains('/'), "{sanitized}");
        }
        assert_eq!(sanitize_path_component("../../admin"), "__admin");
    }

    #[test]
    fn separators_become_underscores() {
        assert_eq!(sanitize_path_component("user/name"), "user_name");
        assert_eq!(sanitize_path_component("user\\name"), "user_name");
    }

    #[test]
    fn special_characters_are_replaced() {
        let sanitized = sanitize_path_component("user<>:\"'|?*name");
        assert!(
            sanitized
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "._@-".contains(c))
        );
    }

    #[test]
    fn empty_or_dots_become_unknown() {
        assert_eq!(sanitize_path_component(""), "unknown");
        assert_eq!(sanitize_path_component("..."), "unknown");
        assert_eq!(sanitize_path_component(".."), "unknown");
    }

    #[test]
    fn leading_and_trailing_dots_are_trimmed() {
        assert_eq!(sanitize_path_component(".user."), "user");
    }

    #[test]
    fn relative_path_uses_forward_slashes() {
        let root = PathBuf::from("/project");
        let path = root.join("pkg").join("mod.py");
        assert_eq!(
            relative_slash_path(&root, &path),
            Some("pkg/mod.py".to_string())
        );
        assert_eq!(relative_slash_path(&root, &root), None);
        assert_eq!(relative_slash_path(&root, Path::new("/elsewhere/x")), None);
    }
}
