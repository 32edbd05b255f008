use std::path::PathBuf;

/// Environment variable overriding the repository root.
pub const ROOT_ENV: &str = "ARCHREPO_ROOT";

/// Default locations of every file the pipeline reads or writes, relative
/// to the repository root.
///
/// ```text
/// <root>/
/// ├── packages.toml               # catalog
/// ├── templates/<kind>.pkgbuild   # recipe templates
/// ├── pkgbuilds/<name>/PKGBUILD   # generated recipes (+ build logs, artifacts)
/// ├── static/index-template.html  # listing page template
/// └── x86_64/                     # published packages and database
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    root: PathBuf,
    catalog: Option<PathBuf>,
    output_dir: Option<PathBuf>,
}

impl RepoLayout {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            catalog: None,
            output_dir: None,
        }
    }

    /// Use `path` as the catalog instead of `<root>/packages.toml`.
    #[must_use]
    pub fn with_catalog(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog = Some(path.into());
        self
    }

    /// Publish into `dir` instead of `<root>/x86_64`.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Catalog file: `<root>/packages.toml`
    pub fn catalog(&self) -> PathBuf {
        self.catalog
            .clone()
            .unwrap_or_else(|| self.root.join("packages.toml"))
    }

    /// Recipe templates: `<root>/templates`
    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    /// Generated recipes: `<root>/pkgbuilds`
    pub fn recipes_dir(&self) -> PathBuf {
        self.root.join("pkgbuilds")
    }

    /// Recipe directory of one package: `<root>/pkgbuilds/<name>`
    pub fn recipe_dir(&self, package: &str) -> PathBuf {
        self.recipes_dir().join(package)
    }

    /// Published repository: `<root>/x86_64`
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.root.join("x86_64"))
    }

    /// Listing page template: `<root>/static/index-template.html`
    pub fn listing_template(&self) -> PathBuf {
        self.root.join("static").join("index-template.html")
    }
}
