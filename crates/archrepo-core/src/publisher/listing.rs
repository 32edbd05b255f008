//! Static `index.html` listing of the repository's packages.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::builder::{ArtifactName, find_artifacts};
use crate::catalog::Catalog;

/// File name of the listing page inside the output directory.
pub const LISTING_FILE: &str = "index.html";

/// Errors rendering or writing the listing page.
#[derive(thiserror::Error, Debug)]
pub enum ListingError {
    /// The page template cannot be read.
    #[error("failed to read listing template {path}: {source}")]
    Template {
        /// Template path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The output directory cannot be listed or written.
    #[error("{path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Human-readable size: `512B`, `12KB`, `3.4MB`, `1.2GB`.
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{bytes}B")
    } else if bytes < MB {
        format!("{}KB", bytes / KB)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    }
}

/// Relative age of something `seconds` old.
pub fn format_time_ago(seconds: i64) -> String {
    match seconds {
        s if s < 60 => "just now".to_string(),
        s if s < 3_600 => format!("{} minutes ago", s / 60),
        s if s < 86_400 => format!("{} hours ago", s / 3_600),
        s => format!("{} days ago", s / 86_400),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

struct BuiltFile {
    file_name: String,
    size: u64,
    modified: DateTime<Utc>,
}

fn built_files(output_dir: &Path, package: &str) -> Result<Vec<BuiltFile>, ListingError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ListingError::Io { path, source }
    };

    let mut files = Vec::new();
    if !output_dir.is_dir() {
        return Ok(files);
    }

    for path in find_artifacts(output_dir).map_err(io_err(output_dir))? {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if ArtifactName::parse(file_name).is_none_or(|a| a.name != package) {
            continue;
        }
        let meta = std::fs::metadata(&path).map_err(io_err(&path))?;
        let modified = meta.modified().map_err(io_err(&path))?;
        files.push(BuiltFile {
            file_name: file_name.to_string(),
            size: meta.len(),
            modified: DateTime::<Utc>::from(modified),
        });
    }
    Ok(files)
}

/// Render the listing page.
///
/// Replaces `{{GENERATION_TIME}}`, `{{PACKAGE_COUNT}}` and
/// `{{PACKAGE_TABLE}}` in `template`. The table has one row per built
/// archive of each catalog package, or a "not built" row when there is none.
///
/// # Errors
///
/// Returns an error if the output directory cannot be inspected.
pub fn render_listing(
    template: &str,
    catalog: &Catalog,
    output_dir: &Path,
    now: DateTime<Utc>,
) -> Result<String, ListingError> {
    let mut table = String::new();

    for entry in catalog.entries() {
        let name = escape_html(entry.name.as_str());
        let version = escape_html(&entry.version);
        let description = escape_html(&entry.description);
        let files = built_files(output_dir, entry.name.as_str())?;

        if files.is_empty() {
            table.push_str(&format!(
                "\n<tr>\n  <td>{name}</td>\n  <td>{version}</td>\n  <td>{description}</td>\n  <td>-</td>\n  <td>not built</td>\n</tr>"
            ));
            continue;
        }

        for file in files {
            let href = escape_html(&file.file_name);
            let size = format_size(file.size);
            let age = format_time_ago((now - file.modified).num_seconds());
            table.push_str(&format!(
                "\n<tr>\n  <td><a href=\"{href}\">{name}</a></td>\n  <td>{version}</td>\n  <td>{description}</td>\n  <td>{size}</td>\n  <td>{age}</td>\n</tr>"
            ));
        }
    }

    Ok(template
        .replace(
            "{{GENERATION_TIME}}",
            &now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
        .replace("{{PACKAGE_COUNT}}", &catalog.len().to_string())
        .replace("{{PACKAGE_TABLE}}", &table))
}

/// Render the listing page from `template_path` into
/// `<output_dir>/index.html`.
///
/// # Errors
///
/// Returns an error if the template cannot be read or the page cannot be
/// written.
pub fn write_listing(
    template_path: &Path,
    catalog: &Catalog,
    output_dir: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf, ListingError> {
    let template =
        std::fs::read_to_string(template_path).map_err(|source| ListingError::Template {
            path: template_path.to_path_buf(),
            source,
        })?;
    let page = render_listing(&template, catalog, output_dir, now)?;

    std::fs::create_dir_all(output_dir).map_err(|source| ListingError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;
    let path = output_dir.join(LISTING_FILE);
    std::fs::write(&path, page).map_err(|source| ListingError::Io {
        path: path.clone(),
        source,
    })?;

    tracing::info!(path = %path.display(), packages = catalog.len(), "listing written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2KB");
        assert_eq!(format_size(3 * 1024 * 1024 + 512 * 1024), "3.5MB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.0GB");
    }

    #[test]
    fn test_format_time_ago() {
        assert_eq!(format_time_ago(5), "just now");
        assert_eq!(format_time_ago(125), "2 minutes ago");
        assert_eq!(format_time_ago(7_200), "2 hours ago");
        assert_eq!(format_time_ago(3 * 86_400 + 10), "3 days ago");
    }

    #[test]
    fn test_render_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("demo-1.0.0-1-x86_64.pkg.tar.zst"), vec![0u8; 2048]).unwrap();
        // Same prefix, different package
        std::fs::write(dir.path().join("demo-extra-1.0.0-1-x86_64.pkg.tar.zst"), "x").unwrap();

        let catalog = Catalog::parse(
            r#"
[packages.demo]
description = "Fast & <small>"
version = "1.0.0"
url = "https://example.com"
license = "MIT"
architectures = ["x86_64"]
upstream = { type = "git", git_url = "https://example.com/demo.git" }

[packages.later]
description = "Not built yet"
version = "0.1.0"
url = "https://example.com"
license = "MIT"
architectures = ["x86_64"]
upstream = { type = "git", git_url = "https://example.com/later.git" }
"#,
        )
        .unwrap();

        let now = Utc::now() + chrono::Duration::hours(3);
        let page = render_listing(
            "<p>{{PACKAGE_COUNT}} packages</p><table>{{PACKAGE_TABLE}}</table>",
            &catalog,
            dir.path(),
            now,
        )
        .unwrap();

        assert!(page.starts_with("<p>2 packages</p>"));
        assert!(page.contains("<a href=\"demo-1.0.0-1-x86_64.pkg.tar.zst\">demo</a>"));
        assert!(page.contains("Fast &amp; &lt;small&gt;"));
        assert!(page.contains("<td>2KB</td>"));
        assert!(page.contains("<td>3 hours ago</td>"));
        assert!(page.contains("<td>later</td>"));
        assert!(page.contains("<td>not built</td>"));
        assert!(!page.contains("demo-extra"));
    }

    #[test]
    fn test_write_listing_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::parse("").unwrap();
        let err = write_listing(
            &dir.path().join("nope.html"),
            &catalog,
            dir.path(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ListingError::Template { .. }));
    }
}
