//! Platform and architecture tags with their naming aliases.
//!
//! Release assets are named inconsistently upstream (`x86_64` vs `amd64`,
//! `macos` vs `darwin`), so every tag carries the set of spellings it answers
//! to. Two tags are equal when their alias sets intersect.

use std::fmt;

/// Operating system an asset targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    Darwin,
    Windows,
    Unknown,
}

impl Platform {
    /// Platforms recognized in asset names, in matching order.
    pub const KNOWN: [Platform; 3] = [Platform::Linux, Platform::Darwin, Platform::Windows];

    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Linux => &["linux"],
            Self::Darwin => &["darwin", "macos"],
            Self::Windows => &["windows"],
            Self::Unknown => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
            Self::Unknown => "unknown",
        }
    }

    /// Platform of the running host.
    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    fn from_os(os: &str) -> Self {
        match os {
            "linux" => Self::Linux,
            "macos" => Self::Darwin,
            "windows" => Self::Windows,
            _ => Self::Unknown,
        }
    }

    /// Whether both tags share a spelling.
    pub fn matches(&self, other: &Platform) -> bool {
        aliases_intersect(self.aliases(), other.aliases())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture an asset targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    Amd64,
    Arm64,
    Arm,
    Unknown,
}

impl Architecture {
    /// Architectures recognized in asset names, in matching order.
    ///
    /// `arm64` must be tried before `arm`: `-arm` is a prefix of `-arm64`.
    pub const KNOWN: [Architecture; 3] =
        [Architecture::Amd64, Architecture::Arm64, Architecture::Arm];

    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Amd64 => &["amd64", "x64", "x86_64"],
            Self::Arm64 => &["arm64"],
            Self::Arm => &["arm"],
            Self::Unknown => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
            Self::Unknown => "unknown",
        }
    }

    /// Architecture of the running host.
    pub fn current() -> Self {
        Self::from_arch(std::env::consts::ARCH)
    }

    fn from_arch(arch: &str) -> Self {
        match arch {
            "x86_64" => Self::Amd64,
            "aarch64" => Self::Arm64,
            "arm" => Self::Arm,
            _ => Self::Unknown,
        }
    }

    pub fn matches(&self, other: &Architecture) -> bool {
        aliases_intersect(self.aliases(), other.aliases())
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (platform, architecture) pair artifacts are selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTarget {
    pub platform: Platform,
    pub architecture: Architecture,
}

impl HostTarget {
    pub fn new(platform: Platform, architecture: Architecture) -> Self {
        Self {
            platform,
            architecture,
        }
    }

    /// Target of the running host.
    pub fn current() -> Self {
        Self::new(Platform::current(), Architecture::current())
    }

    /// Architectures acceptable on this host, most preferred first.
    ///
    /// Apple Silicon hosts can run amd64 binaries under Rosetta, so amd64 is
    /// accepted there as a fallback when no native build exists.
    pub fn candidate_architectures(&self) -> Vec<Architecture> {
        let mut archs = vec![self.architecture];
        if self.platform == Platform::Darwin && self.architecture == Architecture::Arm64 {
            archs.push(Architecture::Amd64);
        }
        archs
    }
}

fn aliases_intersect(a: &[&str], b: &[&str]) -> bool {
    a.iter().any(|x| b.contains(x))
}
