//! Package architectures.

/// Target CPU architecture of a package.
///
/// The repository publishes for the two architectures Arch Linux and
/// Arch Linux ARM ship: `x86_64` and `aarch64`. Ordering follows the
/// declaration order so maps keyed by `Arch` serialize deterministically.
///
/// # Example
///
/// ```
/// use archrepo_schema::Arch;
///
/// let arch: Arch = "arm64".parse().unwrap();
/// assert_eq!(arch, Arch::Aarch64);
/// assert_eq!(arch.target_triple(), "aarch64-unknown-linux-gnu");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Arch {
    /// 64-bit x86 (`x86_64`, also known as `amd64`).
    #[serde(rename = "x86_64", alias = "amd64")]
    X86_64,
    /// 64-bit ARM (`aarch64`, also known as `arm64`).
    #[serde(rename = "aarch64", alias = "arm64")]
    Aarch64,
}

impl Arch {
    /// Every supported architecture, in canonical order.
    pub const ALL: [Arch; 2] = [Arch::X86_64, Arch::Aarch64];

    /// Pacman architecture name (`x86_64` / `aarch64`), as used in `arch=()`
    /// and in `source_<arch>` / `sha256sums_<arch>` variable names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
        }
    }

    /// Default target-triple mapping substituted for `{target}` when a
    /// package does not override it.
    pub fn target_triple(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64-unknown-linux-gnu",
            Self::Aarch64 => "aarch64-unknown-linux-gnu",
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Self::X86_64),
            "aarch64" | "arm64" => Ok(Self::Aarch64),
            _ => Err(format!("Unknown architecture: {s}")),
        }
    }
}
