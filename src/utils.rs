//! Utility functions for file naming, staging and relocation

use std::io;
use std::path::Path;

/// Fallback file name when the URL has no usable last segment
pub const FALLBACK_FILENAME: &str = "download";

/// Derive the output file name for a URL
///
/// Takes the last path segment of the URL (query and fragment ignored) and
/// percent-decodes it. With an override, the override becomes the base name
/// and the original extension is kept.
///
/// # Examples
///
/// ```
/// use batch_dl::utils::derive_filename;
///
/// assert_eq!(
///     derive_filename("https://example.com/files/My%20Report.pdf", None),
///     "My Report.pdf"
/// );
/// assert_eq!(
///     derive_filename("https://example.com/files/My%20Report.pdf", Some("q3")),
///     "q3.pdf"
/// );
/// assert_eq!(derive_filename("https://example.com/", None), "download");
/// ```
pub fn derive_filename(url: &str, filename_override: Option<&str>) -> String {
    let original = last_segment(url)
        .map(|segment| match urlencoding::decode(&segment) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => segment,
        })
        .map(|name| sanitize_filename(&name))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string());

    let Some(base) = filename_override
        .map(sanitize_filename)
        .filter(|base| !base.is_empty())
    else {
        return original;
    };

    match Path::new(&original).extension().and_then(|e| e.to_str()) {
        Some(extension) => format!("{}.{}", base, extension),
        None => base,
    }
}

fn last_segment(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let mut segments = parsed.path_segments()?;
    segments
        .next_back()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Make a decoded name safe to join onto a directory
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned == "." || cleaned == ".." {
        return String::new();
    }
    cleaned
}

/// Name of the staging file for a task
///
/// Prefixed with the task id so two requests resolving to the same file name
/// never share a staging file.
pub(crate) fn staged_name(task_id: u64, filename: &str) -> String {
    format!("{:08}-{}.part", task_id, filename)
}

/// Move a file, falling back to copy + delete across filesystems
pub async fn relocate_file(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                ?from,
                ?to,
                "rename crosses filesystems, falling back to copy"
            );
            copy_then_remove(from, to).await
        }
        Err(e) => Err(e),
    }
}

async fn copy_then_remove(from: &Path, to: &Path) -> io::Result<()> {
    if let Err(e) = tokio::fs::copy(from, to).await {
        // Never leave a truncated copy behind
        tokio::fs::remove_file(to).await.ok();
        return Err(e);
    }
    tokio::fs::remove_file(from).await
}

/// Remove every entry inside `dir`, keeping the directory itself
///
/// Returns the number of entries removed. A missing directory counts as empty.
pub async fn clear_directory(dir: &Path) -> io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

/// Whether `dir` exists and is a directory
pub async fn is_directory(dir: &Path) -> bool {
    tokio::fs::metadata(dir)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// Create `dir` and its parents, naming the directory in the error
pub(crate) async fn ensure_directory(dir: &Path, what: &str) -> io::Result<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("Failed to create {} '{}': {}", what, dir.display(), e),
        )
    })
}
