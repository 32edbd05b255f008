//! Recipe template language.
//!
//! Templates are plain `PKGBUILD` text with three kinds of tags:
//!
//! | Tag | Meaning |
//! |---|---|
//! | `{{ name }}` | entry field; list fields render as bash array contents |
//! | `{{ upstream.repo }}` | field of the entry's upstream table |
//! | `{{#each arch}}` … `{{/each}}` | repeated per architecture, binding `arch`, `target`, `asset`, `source` and `checksum` |
//!
//! A block tag alone on its line consumes the whole line, so blocks do not
//! leave blank lines behind. Values are substituted verbatim.

use archrepo_schema::{Arch, PackageEntry, PackageName, SourceError, SourceKind};
use regex::Regex;

/// Entry fields rendered as single values.
const SCALAR_FIELDS: [&str; 6] = ["name", "version", "pkgrel", "description", "url", "tag"];

/// Entry fields rendered as bash array contents.
const LIST_FIELDS: [&str; 7] = [
    "license",
    "architectures",
    "depends",
    "optdepends",
    "makedepends",
    "provides",
    "conflicts",
];

/// Fields only bound inside `{{#each arch}}`.
const ARCH_FIELDS: [&str; 5] = ["arch", "target", "asset", "source", "checksum"];

/// Every field name any upstream kind defines.
const UPSTREAM_FIELDS: [&str; 10] = [
    "type",
    "repo",
    "asset",
    "tag",
    "tag_prefix",
    "only_stable",
    "bucket_url",
    "version_endpoint",
    "prerelease_endpoint",
    "git_url",
];

/// Syntax errors in a template file.
#[derive(thiserror::Error, Debug)]
pub enum TemplateError {
    /// `{{` without a closing `}}`.
    #[error("line {line}: unterminated tag")]
    Unterminated {
        /// 1-based line of the opening braces.
        line: usize,
    },

    /// Tag content that is neither a field nor a block.
    #[error("line {line}: invalid tag '{{{{ {tag} }}}}'")]
    InvalidTag {
        /// 1-based line.
        line: usize,
        /// Tag content.
        tag: String,
    },

    /// `{{#each x}}` for anything but `arch`.
    #[error("line {line}: unknown block '{name}' (only 'arch' can be iterated)")]
    UnknownBlock {
        /// 1-based line.
        line: usize,
        /// Requested block name.
        name: String,
    },

    /// `{{/each}}` without an open block, an unclosed block, or a nested one.
    #[error("line {line}: unbalanced block")]
    Unbalanced {
        /// 1-based line.
        line: usize,
    },

    /// Internal tag pattern failed to compile.
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

/// Errors binding a catalog entry to a template.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// The template references a field no entry has.
    #[error("{package}: template references unknown field '{field}'")]
    UnknownField {
        /// Package being rendered.
        package: PackageName,
        /// Referenced field.
        field: String,
    },

    /// The field exists but this entry has no value for it.
    #[error("{package}: field '{field}' is not set")]
    MissingField {
        /// Package being rendered.
        package: PackageName,
        /// Referenced field.
        field: String,
    },

    /// A per-architecture field used outside `{{#each arch}}`.
    #[error("{package}: '{field}' is only available inside {{{{#each arch}}}}")]
    ArchFieldOutsideBlock {
        /// Package being rendered.
        package: PackageName,
        /// Referenced field.
        field: String,
    },

    /// Checksum keys differ from the entry's architectures.
    #[error("{package}: checksums cover {found:?} but architectures are {expected:?}")]
    ChecksumKeys {
        /// Package being rendered.
        package: PackageName,
        /// The entry's architectures.
        expected: Vec<Arch>,
        /// Architectures that have checksums.
        found: Vec<Arch>,
    },

    /// No template exists for the entry's source kind.
    #[error("{package}: no template for source kind '{kind}'")]
    MissingTemplate {
        /// Package being rendered.
        package: PackageName,
        /// Its source kind.
        kind: SourceKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Field(String),
    EachArch(Vec<Node>),
}

/// A parsed recipe template for one source kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    kind: SourceKind,
    nodes: Vec<Node>,
}

enum Tag<'a> {
    Field(&'a str),
    Open,
    Close,
}

impl Template {
    /// Parse template text.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] for unterminated or malformed tags and
    /// unbalanced blocks.
    pub fn parse(kind: SourceKind, text: &str) -> Result<Self, TemplateError> {
        let field_re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")?;
        let each_re = Regex::new(r"^#each\s+(\S+)$")?;

        let mut root: Vec<Node> = Vec::new();
        let mut block: Option<Vec<Node>> = None;
        let mut rest = text;
        let mut consumed = 0;

        while let Some(start) = rest.find("{{") {
            let line = 1 + text[..consumed + start].matches('\n').count();
            let after_open = &rest[start + 2..];
            let end = after_open
                .find("}}")
                .ok_or(TemplateError::Unterminated { line })?;
            let inner = after_open[..end].trim();
            let after = &after_open[end + 2..];

            let tag = if inner == "/each" {
                Tag::Close
            } else if let Some(caps) = each_re.captures(inner) {
                if &caps[1] != "arch" {
                    return Err(TemplateError::UnknownBlock {
                        line,
                        name: caps[1].to_string(),
                    });
                }
                Tag::Open
            } else if field_re.is_match(inner) {
                Tag::Field(inner)
            } else {
                return Err(TemplateError::InvalidTag {
                    line,
                    tag: inner.to_string(),
                });
            };

            let before = &rest[..start];
            let at_line_start = consumed == 0 || text[..consumed].ends_with('\n');
            let nodes = block.as_mut().unwrap_or(&mut root);

            let next = match tag {
                Tag::Field(name) => {
                    push_text(nodes, before);
                    nodes.push(Node::Field(name.to_string()));
                    after
                }
                Tag::Open | Tag::Close => {
                    let (keep, remainder) = trim_standalone(before, after, at_line_start);
                    push_text(nodes, keep);
                    match (tag, block.take()) {
                        (Tag::Open, None) => block = Some(Vec::new()),
                        (Tag::Close, Some(inner_nodes)) => root.push(Node::EachArch(inner_nodes)),
                        _ => return Err(TemplateError::Unbalanced { line }),
                    }
                    remainder
                }
            };

            consumed = text.len() - next.len();
            rest = next;
        }

        if block.is_some() {
            let line = 1 + text.matches('\n').count();
            return Err(TemplateError::Unbalanced { line });
        }
        push_text(&mut root, rest);

        Ok(Self { kind, nodes: root })
    }

    /// Source kind this template renders.
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Render the template for one entry.
    ///
    /// # Errors
    ///
    /// Returns a [`BindingError`] if the entry's checksums do not match its
    /// architectures or a referenced field cannot be bound.
    pub fn render(&self, entry: &PackageEntry) -> Result<String, BindingError> {
        if !entry.checksums_cover_architectures() {
            return Err(BindingError::ChecksumKeys {
                package: entry.name.clone(),
                expected: entry.architectures.clone(),
                found: entry.checksums.keys().copied().collect(),
            });
        }

        let mut out = String::new();
        render_nodes(&self.nodes, entry, None, &mut out)?;
        Ok(out)
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str) {
    if !text.is_empty() {
        nodes.push(Node::Text(text.to_string()));
    }
}

/// Drop the indentation and line break around a block tag that sits alone
/// on its line. Returns the text to keep before the tag and the text to
/// continue parsing after it.
fn trim_standalone<'a>(before: &'a str, after: &'a str, at_line_start: bool) -> (&'a str, &'a str) {
    let line_start = before.rfind('\n').map(|i| i + 1);
    let indent = &before[line_start.unwrap_or(0)..];
    let starts_line = line_start.is_some() || at_line_start;
    let is_blank = |s: &str| s.chars().all(|c| c == ' ' || c == '\t');

    let (trailing, remainder) = match after.find('\n') {
        Some(i) => (&after[..i], &after[i + 1..]),
        None => (after, ""),
    };

    if starts_line && is_blank(indent) && is_blank(trailing.trim_end_matches('\r')) {
        (&before[..before.len() - indent.len()], remainder)
    } else {
        (before, after)
    }
}

fn render_nodes(
    nodes: &[Node],
    entry: &PackageEntry,
    arch: Option<Arch>,
    out: &mut String,
) -> Result<(), BindingError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Field(name) => out.push_str(&bind(entry, name, arch)?),
            Node::EachArch(body) => {
                for &a in &entry.architectures {
                    render_nodes(body, entry, Some(a), out)?;
                }
            }
        }
    }
    Ok(())
}

fn bind(entry: &PackageEntry, field: &str, arch: Option<Arch>) -> Result<String, BindingError> {
    let missing = || BindingError::MissingField {
        package: entry.name.clone(),
        field: field.to_string(),
    };
    let unknown = || BindingError::UnknownField {
        package: entry.name.clone(),
        field: field.to_string(),
    };
    let tag_missing = |_: SourceError| BindingError::MissingField {
        package: entry.name.clone(),
        field: "tag".to_string(),
    };

    if let Some(sub) = field.strip_prefix("upstream.") {
        if !UPSTREAM_FIELDS.contains(&sub) {
            return Err(unknown());
        }
        return entry.upstream.field(sub).ok_or_else(missing);
    }
    if field.contains('.') {
        return Err(unknown());
    }

    if ARCH_FIELDS.contains(&field) {
        let Some(arch) = arch else {
            return Err(BindingError::ArchFieldOutsideBlock {
                package: entry.name.clone(),
                field: field.to_string(),
            });
        };
        return match field {
            "arch" => Ok(arch.as_str().to_string()),
            "target" => Ok(entry.target(arch).to_string()),
            "asset" => entry.asset_name(arch).map_err(tag_missing)?.ok_or_else(missing),
            "source" => entry.source_url(arch).map_err(tag_missing),
            _ => entry
                .checksums
                .get(&arch)
                .map(ToString::to_string)
                .ok_or_else(missing),
        };
    }

    if LIST_FIELDS.contains(&field) {
        let items: Vec<String> = match field {
            "license" => entry.license.clone(),
            "architectures" => entry
                .architectures
                .iter()
                .map(|a| a.as_str().to_string())
                .collect(),
            "depends" => entry.depends.clone(),
            "optdepends" => entry.optdepends.clone(),
            "makedepends" => entry.makedepends.clone(),
            "provides" => entry.provides.clone(),
            _ => entry.conflicts.clone(),
        };
        return Ok(bash_array(&items));
    }

    if SCALAR_FIELDS.contains(&field) {
        return match field {
            "name" => Ok(entry.name.to_string()),
            "version" => Ok(entry.version.clone()),
            "pkgrel" => Ok(entry.pkgrel.to_string()),
            "description" => Ok(entry.description.clone()),
            "url" => Ok(entry.url.clone()),
            _ => entry
                .current_tag()
                .map(str::to_string)
                .map_err(tag_missing),
        };
    }

    Err(unknown())
}

/// Render items as the inside of a bash array: `'a' 'b'`.
fn bash_array(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("'{}'", item.replace('\'', r"'\''")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use archrepo_schema::Checksum;

    const DIGEST_X86: &str = "1111111111111111111111111111111111111111111111111111111111111111";
    const DIGEST_ARM: &str = "2222222222222222222222222222222222222222222222222222222222222222";

    fn entry() -> PackageEntry {
        let mut e: PackageEntry = toml::from_str(&format!(
            r#"
            description = "Demo tool"
            version = "1.2.0"
            pkgrel = 2
            url = "https://example.com"
            license = ["MIT", "Apache-2.0"]
            architectures = ["x86_64", "aarch64"]
            optdepends = ["git: for 'vcs' support"]

            [upstream]
            type = "github-release"
            repo = "acme/demo"
            tag = "v1.2.0"
            asset = "demo-{{version}}-{{target}}.tar.gz"

            [checksums]
            x86_64 = "{DIGEST_X86}"
            aarch64 = "{DIGEST_ARM}"
            "#
        ))
        .unwrap();
        e.name = PackageName::new("demo-bin");
        e
    }

    fn render(text: &str) -> Result<String, BindingError> {
        Template::parse(SourceKind::GithubRelease, text)
            .unwrap()
            .render(&entry())
    }

    #[test]
    fn test_scalars_and_lists() {
        let out = render(
            "pkgname={{ name }}\npkgver={{version}}\npkgrel={{ pkgrel }}\nlicense=({{ license }})\n",
        )
        .unwrap();
        assert_eq!(
            out,
            "pkgname=demo-bin\npkgver=1.2.0\npkgrel=2\nlicense=('MIT' 'Apache-2.0')\n"
        );
    }

    #[test]
    fn test_list_items_are_quoted() {
        let out = render("optdepends=({{ optdepends }})\ndepends=({{ depends }})").unwrap();
        assert_eq!(
            out,
            r"optdepends=('git: for '\''vcs'\'' support')
depends=()"
        );
    }

    #[test]
    fn test_each_arch_block_is_trimmed() {
        let text = "\
arch=({{ architectures }})
  {{#each arch}}
source_{{ arch }}=(\"{{ source }}\")
sha256sums_{{ arch }}=('{{ checksum }}')
  {{/each}}
end
";
        let out = render(text).unwrap();
        let expected = format!(
            "\
arch=('x86_64' 'aarch64')
source_x86_64=(\"https://github.com/acme/demo/releases/download/v1.2.0/demo-1.2.0-x86_64-unknown-linux-gnu.tar.gz\")
sha256sums_x86_64=('{DIGEST_X86}')
source_aarch64=(\"https://github.com/acme/demo/releases/download/v1.2.0/demo-1.2.0-aarch64-unknown-linux-gnu.tar.gz\")
sha256sums_aarch64=('{DIGEST_ARM}')
end
"
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn test_inline_block_keeps_surrounding_text() {
        let out = render("targets: {{#each arch}}[{{ target }}]{{/each}}!\n").unwrap();
        assert_eq!(
            out,
            "targets: [x86_64-unknown-linux-gnu][aarch64-unknown-linux-gnu]!\n"
        );
    }

    #[test]
    fn test_upstream_fields() {
        assert_eq!(render("{{ upstream.repo }}").unwrap(), "acme/demo");
        assert!(matches!(
            render("{{ upstream.bucket_url }}"),
            Err(BindingError::MissingField { field, .. }) if field == "upstream.bucket_url"
        ));
        assert!(matches!(
            render("{{ upstream.nope }}"),
            Err(BindingError::UnknownField { .. })
        ));
        // Targets are only bound per arch, as `target`
        assert!(matches!(
            render("{{ upstream.targets }}"),
            Err(BindingError::UnknownField { field, .. }) if field == "upstream.targets"
        ));
    }

    #[test]
    fn test_binding_errors() {
        assert!(matches!(
            render("{{ maintainer }}"),
            Err(BindingError::UnknownField { field, .. }) if field == "maintainer"
        ));
        assert!(matches!(
            render("{{ checksum }}"),
            Err(BindingError::ArchFieldOutsideBlock { field, .. }) if field == "checksum"
        ));
    }

    #[test]
    fn test_checksum_keys_must_match_architectures() {
        let template = Template::parse(SourceKind::GithubRelease, "{{ name }}").unwrap();

        let mut e = entry();
        e.checksums.remove(&Arch::Aarch64);
        assert!(matches!(
            template.render(&e),
            Err(BindingError::ChecksumKeys { found, .. }) if found == vec![Arch::X86_64]
        ));

        let mut e = entry();
        e.architectures = vec![Arch::X86_64];
        assert!(matches!(
            template.render(&e),
            Err(BindingError::ChecksumKeys { .. })
        ));

        let mut e = entry();
        e.checksums.insert(Arch::Aarch64, Checksum::Skip);
        assert!(template.render(&e).is_ok());
    }

    #[test]
    fn test_parse_errors() {
        let parse = |t: &str| Template::parse(SourceKind::GitUpstream, t);
        assert!(matches!(
            parse("a\n{{ name"),
            Err(TemplateError::Unterminated { line: 2 })
        ));
        assert!(matches!(
            parse("{{ name | upper }}"),
            Err(TemplateError::InvalidTag { .. })
        ));
        assert!(matches!(
            parse("{{#each depends}}{{/each}}"),
            Err(TemplateError::UnknownBlock { .. })
        ));
        assert!(matches!(
            parse("{{/each}}"),
            Err(TemplateError::Unbalanced { line: 1 })
        ));
        assert!(matches!(
            parse("{{#each arch}}\n{{#each arch}}\n{{/each}}\n{{/each}}\n"),
            Err(TemplateError::Unbalanced { line: 2 })
        ));
        assert!(matches!(
            parse("{{#each arch}}\nx\n"),
            Err(TemplateError::Unbalanced { .. })
        ));
    }

    #[test]
    fn test_bash_variables_pass_through() {
        let out = render("cd \"${srcdir}/${pkgname}\"\n").unwrap();
        assert_eq!(out, "cd \"${srcdir}/${pkgname}\"\n");
    }
}
