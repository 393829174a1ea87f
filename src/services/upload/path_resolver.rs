//! Turns a logical destination into the storage key an upload is written to.

use crate::models::upload::{ScopeMode, StorageScope};

use super::UploadError;

/// Resolve the key for `file_name`.
///
/// Precedence: a relative path that differs from the bare file name is used
/// verbatim (folder uploads keep their structure), then `folder/file_name`,
/// then the file name alone. Namespaced scopes prefix the result with
/// `{scope}/` unless the scope id is empty. Leading slashes are dropped so
/// every key is relative to the bucket.
pub fn resolve_key(
    folder: Option<&str>,
    relative_path: Option<&str>,
    file_name: &str,
    scope: &StorageScope,
) -> Result<String, UploadError> {
    let file_name = file_name.trim_start_matches('/');
    let folder = folder
        .map(|f| f.trim_start_matches('/'))
        .filter(|f| !f.is_empty());
    let relative_path = relative_path
        .map(|p| p.trim_start_matches('/'))
        .filter(|p| !p.is_empty() && *p != file_name);

    let key = match (relative_path, folder) {
        (Some(path), _) => path.to_string(),
        (None, Some(folder)) => format!("{}/{}", folder.trim_end_matches('/'), file_name),
        (None, None) => file_name.to_string(),
    };

    let key = match scope.mode {
        ScopeMode::Namespaced if !scope.id.trim_matches('/').is_empty() => {
            format!("{}/{}", scope.id.trim_matches('/'), key)
        }
        _ => key,
    };

    if key.is_empty() {
        return Err(UploadError::InvalidDestination("resolved key is empty".into()));
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(UploadError::InvalidDestination(format!(
            "`{}` contains a path traversal segment",
            key
        )));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> StorageScope {
        StorageScope::namespaced("alice")
    }

    #[test]
    fn folder_is_joined_and_namespaced() {
        let key = resolve_key(Some("reports"), None, "q1.pdf", &alice()).unwrap();
        assert_eq!(key, "alice/reports/q1.pdf");
    }

    #[test]
    fn relative_path_wins_over_folder() {
        let path = Some("photos/2024/img.jpg");
        let key = resolve_key(Some("ignored"), path, "img.jpg", &StorageScope::whole()).unwrap();
        assert_eq!(key, "photos/2024/img.jpg");

        let key = resolve_key(Some("ignored"), path, "img.jpg", &alice()).unwrap();
        assert_eq!(key, "alice/photos/2024/img.jpg");
    }

    #[test]
    fn relative_path_equal_to_file_name_falls_back_to_folder() {
        let key = resolve_key(Some("docs"), Some("a.txt"), "a.txt", &StorageScope::whole()).unwrap();
        assert_eq!(key, "docs/a.txt");
    }

    #[test]
    fn bare_file_name_and_empty_scope() {
        let key = resolve_key(None, None, "a.txt", &StorageScope::namespaced("")).unwrap();
        assert_eq!(key, "a.txt");
        let key = resolve_key(Some(""), Some(""), "a.txt", &StorageScope::whole()).unwrap();
        assert_eq!(key, "a.txt");
    }

    #[test]
    fn whole_scope_ignores_scope_id() {
        let scope = StorageScope {
            mode: ScopeMode::WholeScope,
            id: "alice".into(),
        };
        assert_eq!(resolve_key(Some("r"), None, "f", &scope).unwrap(), "r/f");
    }

    #[test]
    fn trailing_slash_on_folder_is_not_doubled() {
        let key = resolve_key(Some("reports/"), None, "q1.pdf", &StorageScope::whole()).unwrap();
        assert_eq!(key, "reports/q1.pdf");
    }

    #[test]
    fn traversal_and_empty_keys_are_rejected() {
        let err = resolve_key(None, Some("../etc/passwd"), "passwd", &alice()).unwrap_err();
        assert!(matches!(err, UploadError::InvalidDestination(_)));

        let err = resolve_key(Some("a/../../b"), None, "f", &StorageScope::whole()).unwrap_err();
        assert!(matches!(err, UploadError::InvalidDestination(_)));

        let err = resolve_key(None, None, "", &StorageScope::whole()).unwrap_err();
        assert!(matches!(err, UploadError::InvalidDestination(_)));
    }

    #[test]
    fn dots_inside_names_are_fine() {
        let key = resolve_key(None, None, "archive..tar", &StorageScope::whole()).unwrap();
        assert_eq!(key, "archive..tar");
    }

    #[test]
    fn leading_slashes_are_dropped() {
        let whole = StorageScope::whole();
        let key = resolve_key(None, Some("/photos/a.jpg"), "a.jpg", &whole).unwrap();
        assert_eq!(key, "photos/a.jpg");

        let key = resolve_key(Some("/docs/"), None, "a.txt", &whole).unwrap();
        assert_eq!(key, "docs/a.txt");

        let key = resolve_key(Some("/"), Some("/a.txt"), "a.txt", &alice()).unwrap();
        assert_eq!(key, "alice/a.txt");

        let err = resolve_key(None, Some("/"), "/", &whole).unwrap_err();
        assert!(matches!(err, UploadError::InvalidDestination(_)));
    }
}
