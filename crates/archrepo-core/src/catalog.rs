//! The package catalog (`packages.toml`).
//!
//! The catalog is held twice: as a format-preserving [`DocumentMut`] and as
//! a typed, validated `Vec<PackageEntry>` in file order. Reads go through
//! the typed view; writes go through [`Catalog::apply`], which edits both,
//! so fields nobody touched keep their exact bytes (comments, key order,
//! quoting, whitespace).
//!
//! There is no locking. Running the resolver and the generator against the
//! same file at the same time is undefined; CI runs one job at a time.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use archrepo_schema::{Arch, Checksum, PackageEntry, PackageName, Upstream};
use serde::Deserialize;
use toml_edit::{DocumentMut, InlineTable, Item, TableLike, Value};

/// Errors loading or saving the catalog.
#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("failed to read catalog {path}: {source}")]
    Read {
        /// Catalog path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML.
    #[error("catalog is not valid TOML: {0}")]
    Syntax(String),

    /// A package is missing a required field or holds an invalid value.
    #[error("schema error in package '{package}': {message}")]
    Schema {
        /// Offending package (or `packages` for the top-level table).
        package: String,
        /// What is wrong.
        message: String,
    },

    /// An update names a package the catalog does not have.
    #[error("unknown package '{0}'")]
    UnknownPackage(PackageName),

    /// The catalog could not be written.
    #[error("failed to write catalog {path}: {source}")]
    Write {
        /// Catalog path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// A new upstream version for one package, produced by the resolver and
/// committed with [`Catalog::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionUpdate {
    /// Package to update.
    pub name: PackageName,
    /// Version stored before the update.
    pub previous: String,
    /// New normalized version.
    pub version: String,
    /// Raw upstream tag of the new version, for kinds that track tags.
    pub tag: Option<String>,
    /// Checksums of the new version's sources, one per architecture.
    pub checksums: BTreeMap<Arch, Checksum>,
}

/// Loaded and validated package catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    doc: DocumentMut,
    entries: Vec<PackageEntry>,
}

impl Catalog {
    /// Read and validate a catalog file.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Read`] if the file cannot be read, and
    /// [`CatalogError::Syntax`] / [`CatalogError::Schema`] if it is invalid.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse and validate catalog text.
    ///
    /// A document without a `packages` table is an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Syntax`] for malformed TOML and
    /// [`CatalogError::Schema`] for the first invalid package, including a
    /// package defined twice.
    pub fn parse(text: &str) -> Result<Self, CatalogError> {
        let doc: DocumentMut = text.parse().map_err(|e: toml_edit::TomlError| {
            duplicate_key(e.message()).unwrap_or_else(|| CatalogError::Syntax(e.to_string()))
        })?;
        let table: toml::Table =
            toml::from_str(text).map_err(|e| CatalogError::Syntax(e.to_string()))?;

        let mut entries = Vec::new();
        match table.get("packages") {
            None => {}
            Some(toml::Value::Table(packages)) => {
                for (name, value) in packages {
                    entries.push(parse_entry(name, value)?);
                }
            }
            Some(_) => {
                return Err(CatalogError::Schema {
                    package: "packages".to_string(),
                    message: "`packages` must be a table".to_string(),
                });
            }
        }

        Ok(Self { doc, entries })
    }

    /// Entries in file order.
    pub fn entries(&self) -> &[PackageEntry] {
        &self.entries
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&PackageEntry> {
        self.entries.iter().find(|e| e.name.as_str() == name)
    }

    /// Number of packages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog has no packages.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Commit resolver results.
    ///
    /// For each update sets `version`, resets `pkgrel` to 1, records the
    /// upstream `tag` and replaces the `checksums` table. Everything else in
    /// the document is left byte-for-byte as it was.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownPackage`] if an update names a package
    /// that is not in the catalog. Updates before it have been applied.
    pub fn apply(&mut self, updates: &[VersionUpdate]) -> Result<(), CatalogError> {
        for update in updates {
            let idx = self
                .entries
                .iter()
                .position(|e| e.name == update.name)
                .ok_or_else(|| CatalogError::UnknownPackage(update.name.clone()))?;

            let pkg = package_table_mut(&mut self.doc, update.name.as_str())?;
            set_value(pkg, "version", update.version.as_str());
            set_value(pkg, "pkgrel", 1_i64);

            if let Some(tag) = &update.tag {
                let upstream = pkg
                    .get_mut("upstream")
                    .and_then(Item::as_table_like_mut)
                    .ok_or_else(|| CatalogError::Schema {
                        package: update.name.to_string(),
                        message: "upstream is not a table".to_string(),
                    })?;
                set_value(upstream, "tag", tag.as_str());
            }

            match pkg.get_mut("checksums").and_then(Item::as_table_like_mut) {
                Some(table) => {
                    let stale: Vec<String> = table
                        .iter()
                        .map(|(k, _)| k.to_string())
                        .filter(|k| {
                            !update
                                .checksums
                                .keys()
                                .any(|arch| arch.as_str() == k.as_str())
                        })
                        .collect();
                    for key in stale {
                        table.remove(&key);
                    }
                    for (arch, checksum) in &update.checksums {
                        set_value(table, arch.as_str(), checksum.as_str());
                    }
                }
                None => {
                    let mut inline = InlineTable::new();
                    for (arch, checksum) in &update.checksums {
                        inline.insert(arch.as_str(), Value::from(checksum.as_str()));
                    }
                    inline.fmt();
                    pkg.insert("checksums", Item::Value(Value::InlineTable(inline)));
                }
            }

            let entry = &mut self.entries[idx];
            entry.version.clone_from(&update.version);
            entry.pkgrel = 1;
            entry.checksums.clone_from(&update.checksums);
            if let Some(tag) = &update.tag {
                match &mut entry.upstream {
                    Upstream::GithubRelease(gh) => gh.tag = Some(tag.clone()),
                    Upstream::GitUpstream(git) => git.tag = Some(tag.clone()),
                    Upstream::ObjectStorageRelease(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Write the catalog atomically.
    ///
    /// The document is written to a temporary file in the destination
    /// directory and renamed over `path`, so readers see either the old or
    /// the new catalog, never a partial one.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Write`] if the temporary file cannot be
    /// created, written or renamed.
    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let write_err = |source| CatalogError::Write {
            path: path.to_path_buf(),
            source,
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(self.doc.to_string().as_bytes())
            .map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

impl std::fmt::Display for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.doc)
    }
}

/// Turn a TOML duplicate-key message into a schema error naming the package.
///
/// A repeated package is reported by the parser as a duplicate key in
/// `packages`; a repeated field as a duplicate key in `packages.<name>`.
fn duplicate_key(message: &str) -> Option<CatalogError> {
    let (_, rest) = message.split_once("duplicate key `")?;
    let (key, rest) = rest.split_once('`')?;
    let table = rest
        .split_once("in table `")
        .and_then(|(_, t)| t.split_once('`'))
        .map(|(t, _)| t);

    let package = match table {
        Some("packages") | None => key,
        Some(t) => {
            let nested = t.strip_prefix("packages.")?;
            nested.split('.').next().unwrap_or(nested)
        }
    };
    let message = if package == key {
        "package is defined more than once".to_string()
    } else {
        format!("field `{key}` is defined more than once")
    };
    Some(CatalogError::Schema {
        package: package.trim_matches('"').to_string(),
        message,
    })
}

fn parse_entry(name: &str, value: &toml::Value) -> Result<PackageEntry, CatalogError> {
    let schema_err = |message: String| CatalogError::Schema {
        package: name.to_string(),
        message,
    };

    let mut entry = PackageEntry::deserialize(value.clone()).map_err(|e| schema_err(e.to_string()))?;
    entry.name = PackageName::new(name);
    entry.validate().map_err(schema_err)?;
    Ok(entry)
}

fn package_table_mut<'a>(
    doc: &'a mut DocumentMut,
    name: &str,
) -> Result<&'a mut dyn TableLike, CatalogError> {
    doc.get_mut("packages")
        .and_then(Item::as_table_like_mut)
        .and_then(|packages| packages.get_mut(name))
        .and_then(Item::as_table_like_mut)
        .ok_or_else(|| CatalogError::UnknownPackage(PackageName::new(name)))
}

/// Replace a value, keeping the whitespace and comments around the old one.
fn set_value(table: &mut dyn TableLike, key: &str, new: impl Into<Value>) {
    let mut new_value: Value = new.into();
    if let Some(item) = table.get_mut(key) {
        if let Some(old) = item.as_value() {
            *new_value.decor_mut() = old.decor().clone();
        }
        *item = Item::Value(new_value);
    } else {
        table.insert(key, Item::Value(new_value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const DIGEST_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    const CATALOG: &str = r#"# Package catalog for the repository.
# Versions and checksums below are maintained by `archrepo update`.

[packages.zeta-bin]
description = "Listed first on purpose"   # order must survive
version = "1.0.0"
pkgrel = 3
url = "https://github.com/acme/zeta"
license = ["MIT"]
architectures = ["x86_64", "aarch64"]
provides = ["zeta"]

[packages.zeta-bin.upstream]
type = "github-release"
repo = "acme/zeta"
tag = "v1.0.0"
asset = "zeta-{version}-{target}.tar.gz"

[packages.zeta-bin.checksums]
x86_64 = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
aarch64 = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"

[packages.alpha-cli]
description = 'Single quoted'
version = "2.1"
url = "https://alpha.example.com"
license = "Apache-2.0"
architectures = [ "x86_64" ]
upstream = { type = "gcs", bucket_url = "https://storage.example.com/alpha", version_endpoint = "stable", asset = "{version}/linux-x64/alpha" }
"#;

    fn update(name: &str, version: &str, tag: Option<&str>, archs: &[(Arch, &str)]) -> VersionUpdate {
        VersionUpdate {
            name: PackageName::new(name),
            previous: String::new(),
            version: version.to_string(),
            tag: tag.map(str::to_string),
            checksums: archs
                .iter()
                .map(|(a, d)| (*a, Checksum::parse(d).unwrap()))
                .collect(),
        }
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        assert_eq!(catalog.to_string(), CATALOG);
    }

    #[test]
    fn test_save_load_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.toml");
        std::fs::write(&path, CATALOG).unwrap();

        Catalog::load(&path).unwrap().save(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), CATALOG);
    }

    #[test]
    fn test_entries_keep_file_order() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        let names: Vec<&str> = catalog.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["zeta-bin", "alpha-cli"]);
        assert_eq!(catalog.get("zeta-bin").unwrap().pkgrel, 3);
        assert_eq!(catalog.get("alpha-cli").unwrap().pkgrel, 1);
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = Catalog::parse("# nothing yet\n").unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_missing_required_field_is_schema_error() {
        let broken = CATALOG.replace("version = \"2.1\"\n", "");
        match Catalog::parse(&broken) {
            Err(CatalogError::Schema { package, message }) => {
                assert_eq!(package, "alpha-cli");
                assert!(message.contains("version"), "{message}");
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_source_kind_is_schema_error() {
        let broken = CATALOG.replace("type = \"gcs\"", "type = \"sourceforge\"");
        assert!(matches!(
            Catalog::parse(&broken),
            Err(CatalogError::Schema { package, .. }) if package == "alpha-cli"
        ));
    }

    #[test]
    fn test_invalid_checksum_is_schema_error() {
        let broken = CATALOG.replacen(DIGEST_A, "not-a-digest", 1);
        assert!(matches!(
            Catalog::parse(&broken),
            Err(CatalogError::Schema { package, .. }) if package == "zeta-bin"
        ));
    }

    #[test]
    fn test_duplicate_package_is_rejected() {
        let dup = format!("{CATALOG}\n[packages.zeta-bin]\ndescription = \"again\"\n");
        let err = Catalog::parse(&dup).unwrap_err();
        assert!(
            matches!(&err, CatalogError::Schema { package, .. } if package == "zeta-bin"),
            "{err}"
        );
    }

    #[test]
    fn test_duplicate_field_is_a_schema_error() {
        let text = r#"
[packages.alpha]
description = "Alpha"
version = "1.0.0"
version = "1.1.0"
"#;
        let err = Catalog::parse(text).unwrap_err();
        assert!(
            matches!(&err, CatalogError::Schema { package, message } if package == "alpha" && message.contains("version")),
            "{err}"
        );
    }

    #[test]
    fn test_duplicate_key_message() {
        assert!(duplicate_key("invalid table header").is_none());
        assert!(matches!(
            duplicate_key("duplicate key `beta` in table `packages`"),
            Some(CatalogError::Schema { package, .. }) if package == "beta"
        ));
        // Duplicates outside the catalog table stay syntax errors
        assert!(duplicate_key("duplicate key `x` in table `other`").is_none());
    }

    #[test]
    fn test_apply_touches_only_updated_fields() {
        let mut catalog = Catalog::parse(CATALOG).unwrap();
        catalog
            .apply(&[update(
                "zeta-bin",
                "1.2.0",
                Some("v1.2.0"),
                &[(Arch::X86_64, DIGEST_B), (Arch::Aarch64, DIGEST_B)],
            )])
            .unwrap();

        let expected = CATALOG
            .replace("version = \"1.0.0\"", "version = \"1.2.0\"")
            .replace("pkgrel = 3", "pkgrel = 1")
            .replace("tag = \"v1.0.0\"", "tag = \"v1.2.0\"")
            .replace(DIGEST_A, DIGEST_B);
        assert_eq!(catalog.to_string(), expected);

        let entry = catalog.get("zeta-bin").unwrap();
        assert_eq!(entry.version, "1.2.0");
        assert_eq!(entry.pkgrel, 1);
        assert_eq!(entry.upstream.tag(), Some("v1.2.0"));
        assert_eq!(entry.checksums[&Arch::Aarch64].as_str(), DIGEST_B);
    }

    #[test]
    fn test_apply_adds_checksums_to_inline_entry() {
        let mut catalog = Catalog::parse(CATALOG).unwrap();
        catalog
            .apply(&[update("alpha-cli", "2.2", None, &[(Arch::X86_64, DIGEST_B)])])
            .unwrap();

        let reparsed = Catalog::parse(&catalog.to_string()).unwrap();
        let entry = reparsed.get("alpha-cli").unwrap();
        assert_eq!(entry.version, "2.2");
        assert!(entry.checksums_cover_architectures());
        // The other package is untouched
        assert_eq!(reparsed.get("zeta-bin").unwrap().version, "1.0.0");
    }

    #[test]
    fn test_apply_unknown_package() {
        let mut catalog = Catalog::parse(CATALOG).unwrap();
        let err = catalog
            .apply(&[update("nope", "1", None, &[])])
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownPackage(_)));
    }
}
