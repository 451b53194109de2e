//! Deleting working-tree files selected by a [`Matcher`].

use std::io;
use std::path::Path;

use tracing::debug;

use super::filters::Matcher;

/// Delete every regular file under `root` whose root-relative path matches.
///
/// The `.git` directory at the root is never visited. Returns the relative
/// paths that were removed, in traversal order.
pub fn delete_files(root: &Path, matcher: &Matcher) -> io::Result<Vec<String>> {
    let mut deleted = Vec::new();
    delete_inner(root, "", matcher, &mut deleted)?;
    Ok(deleted)
}

fn delete_inner(dir: &Path, prefix: &str, matcher: &Matcher, deleted: &mut Vec<String>) -> io::Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if prefix.is_empty() && name == ".git" {
            continue;
        }
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            delete_inner(&entry.path(), &rel, matcher, deleted)?;
        } else if matcher.matches(&rel) {
            std::fs::remove_file(entry.path())?;
            debug!(path = %rel, "deleted file");
            deleted.push(rel);
        }
    }
    Ok(())
}
