//! Request path validation and secure resolution against the content root.

use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::error::ServeError;

const MAX_PATH_LENGTH: usize = 2048;

/// Tokens that mark a traversal or smuggling attempt. Matched
/// case-insensitively against both the raw and the decoded request path.
const SUSPICIOUS_TOKENS: &[&str] = &[
    "../", "..\\", "..%2f", "..%5c", "%00", "./.", ".%2e", "%252e",
];

/// Reject NUL bytes, oversized paths, and traversal tokens.
pub fn validate_path(path: &str) -> Result<(), ServeError> {
    if path.contains('\0') {
        return Err(ServeError::security("http.validate", "path contains NUL byte").with_path(path));
    }
    if path.len() > MAX_PATH_LENGTH {
        let preview = path.get(..64).unwrap_or_default();
        return Err(
            ServeError::validation("http.validate", "path exceeds maximum length")
                .with_path(preview),
        );
    }

    let lowered = path.to_ascii_lowercase();
    for token in SUSPICIOUS_TOKENS {
        if lowered.contains(token) {
            return Err(ServeError::security(
                "http.validate",
                format!("path contains suspicious token `{token}`"),
            )
            .with_path(path));
        }
    }

    Ok(())
}

/// Percent-decode the raw request path for file resolution.
pub fn decode_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Join a logical path under the canonical root and verify the canonical
/// result stays inside it. Symlink escapes surface as security errors.
pub fn resolve_under_root(canonical_root: &Path, logical: &str) -> Result<PathBuf, ServeError> {
    let relative = logical.trim_start_matches('/');
    let joined = canonical_root.join(relative);

    match joined.canonicalize() {
        Ok(resolved) if resolved.starts_with(canonical_root) => Ok(resolved),
        Ok(_) => Err(
            ServeError::security("http.resolve", "resolved path escapes the content root")
                .with_path(logical),
        ),
        Err(err) => Err(ServeError::from_io("http.resolve", logical, err)),
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;

    use super::*;

    #[test]
    fn plain_paths_pass() {
        assert!(validate_path("/index.html").is_ok());
        assert!(validate_path("/static/app.js").is_ok());
        assert!(validate_path("/a/b/c/d.png").is_ok());
    }

    #[test]
    fn every_suspicious_token_is_rejected() {
        for token in SUSPICIOUS_TOKENS {
            let path = format!("/files/{token}etc/passwd");
            let err = validate_path(&path).expect_err("token should be rejected");
            assert_eq!(err.kind, ErrorKind::Security, "token `{token}`");
        }
    }

    #[test]
    fn token_match_is_case_insensitive() {
        assert!(validate_path("/a/..%2F/etc").is_err());
        assert!(validate_path("/a/%252E%252E/etc").is_err());
    }

    #[test]
    fn nul_byte_is_rejected() {
        assert_eq!(
            validate_path("/a\0b").unwrap_err().kind,
            ErrorKind::Security
        );
    }

    #[test]
    fn oversized_path_is_rejected() {
        let long = format!("/{}", "a".repeat(MAX_PATH_LENGTH + 1));
        assert_eq!(
            validate_path(&long).unwrap_err().kind,
            ErrorKind::Validation
        );
    }

    #[test]
    fn decode_path_unescapes_percent_sequences() {
        assert_eq!(decode_path("/hello%20world.txt"), "/hello world.txt");
        assert_eq!(decode_path("/plain.txt"), "/plain.txt");
    }

    #[test]
    fn resolve_rejects_paths_outside_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(root.join("inside.txt"), b"ok").unwrap();

        assert!(resolve_under_root(&root, "/inside.txt").is_ok());

        let err = resolve_under_root(&root, "/missing.txt").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn resolve_rejects_symlink_escape() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"secret").unwrap();

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(
                outside.path().join("secret.txt"),
                root.join("sneaky.txt"),
            )
            .unwrap();

            let err = resolve_under_root(&root, "/sneaky.txt").unwrap_err();
            assert_eq!(err.kind, ErrorKind::Security);
        }
    }
}
