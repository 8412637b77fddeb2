//! Sensitive files that stay off-limits even inside scoped folders.

use std::path::Path;

const DENIED_EXTENSIONS: &[&str] = &[".key", ".pem", ".p12", ".pfx", ".jks"];

const DENIED_PREFIXES: &[&str] = &[".env", "id_rsa", "id_ed25519", "id_ecdsa", "id_dsa"];

const DENIED_DIRS: &[&str] = &[
    ".git",
    ".ssh",
    ".aws",
    ".gnupg",
    "node_modules",
    "__pycache__",
    ".venv",
    ".terraform",
];

const DENIED_EXACT: &[&str] = &[
    ".gitconfig",
    ".npmrc",
    ".pypirc",
    "credentials.json",
    "service-account.json",
];

/// Whether `path` names a sensitive file or lives under a sensitive directory.
#[must_use]
pub fn is_denied(path: &Path) -> bool {
    let in_denied_dir = path.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        DENIED_DIRS.iter().any(|dir| name == *dir)
    });
    if in_denied_dir {
        return true;
    }

    let Some(file_name) = path.file_name() else {
        return false;
    };
    let lower = file_name.to_string_lossy().to_lowercase();

    DENIED_EXACT.contains(&lower.as_str())
        // `.env`, `.env.local`, `id_rsa.pub`, ...
        || DENIED_PREFIXES
            .iter()
            .any(|prefix| lower == *prefix || lower.starts_with(&format!("{prefix}.")))
        || DENIED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}
