//! Cross-compile platform identifiers.
//!
//! A [`PlatformTriple`] names the machine doing the compiling (`build`), the
//! machine the produced tool runs on (`host`), and the machine the tool's own
//! output targets (`target`). A [`DependencyKind`] says which two of those a
//! dependency inherits from its dependent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// An opaque `(os, arch)` platform identifier, displayed as `os-arch`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Platform {
    os: String,
    arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this process is running on.
    pub fn current() -> Self {
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "x86" => "386",
            "aarch64" => "arm64",
            other => other,
        };
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        Self::new(os, arch)
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

impl FromStr for Platform {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((os, arch)) if !os.is_empty() && !arch.is_empty() => Ok(Self::new(os, arch)),
            _ => Err(TypeError::InvalidPlatform(s.to_string())),
        }
    }
}

impl From<Platform> for String {
    fn from(p: Platform) -> Self {
        p.to_string()
    }
}

impl TryFrom<String> for Platform {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// The `(build, host, target)` platforms of one derivation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformTriple {
    pub build: Platform,
    pub host: Platform,
    pub target: Platform,
}

impl PlatformTriple {
    pub fn new(build: Platform, host: Platform, target: Platform) -> Self {
        Self {
            build,
            host,
            target,
        }
    }

    /// A native triple: all three slots are the same platform.
    pub fn uniform(platform: Platform) -> Self {
        Self {
            build: platform.clone(),
            host: platform.clone(),
            target: platform,
        }
    }
}

impl fmt::Display for PlatformTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.build, self.host, self.target)
    }
}

/// Relationship between a dependent and one of its dependencies.
///
/// The first half names the dependent's slot the dependency runs on, the
/// second half the slot it produces output for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DependencyKind {
    BuildBuild,
    BuildHost,
    BuildTarget,
    HostHost,
    HostTarget,
    TargetTarget,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 6] = [
        Self::BuildBuild,
        Self::BuildHost,
        Self::BuildTarget,
        Self::HostHost,
        Self::HostTarget,
        Self::TargetTarget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildBuild => "build->build",
            Self::BuildHost => "build->host",
            Self::BuildTarget => "build->target",
            Self::HostHost => "host->host",
            Self::HostTarget => "host->target",
            Self::TargetTarget => "target->target",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyKind {
    type Err = TypeError;

    /// Accepts `build->host`, `build_host`, `buildHost` and friends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "buildbuild" => Ok(Self::BuildBuild),
            "buildhost" => Ok(Self::BuildHost),
            "buildtarget" => Ok(Self::BuildTarget),
            "hosthost" => Ok(Self::HostHost),
            "hosttarget" => Ok(Self::HostTarget),
            "targettarget" => Ok(Self::TargetTarget),
            _ => Err(TypeError::UnknownDependencyType(s.to_string())),
        }
    }
}

impl TryFrom<u32> for DependencyKind {
    type Error = TypeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| TypeError::UnknownDependencyType(value.to_string()))
    }
}

impl From<DependencyKind> for String {
    fn from(kind: DependencyKind) -> Self {
        kind.as_str().to_string()
    }
}

impl TryFrom<String> for DependencyKind {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
