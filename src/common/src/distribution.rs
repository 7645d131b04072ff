use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgrammingLanguage {
    Java,
    Python,
    Go,
    DotNet,
    JavaScript,
    Php,
    Ruby,
    Rust,
    Cplusplus,
    Nginx,
}

impl ProgrammingLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgrammingLanguage::Java => "java",
            ProgrammingLanguage::Python => "python",
            ProgrammingLanguage::Go => "go",
            ProgrammingLanguage::DotNet => "dotnet",
            ProgrammingLanguage::JavaScript => "javascript",
            ProgrammingLanguage::Php => "php",
            ProgrammingLanguage::Ruby => "ruby",
            ProgrammingLanguage::Rust => "rust",
            ProgrammingLanguage::Cplusplus => "cplusplus",
            ProgrammingLanguage::Nginx => "nginx",
        }
    }
}

impl fmt::Display for ProgrammingLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgrammingLanguage {
    type Err = ParseDistributionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "java" => Ok(ProgrammingLanguage::Java),
            "python" => Ok(ProgrammingLanguage::Python),
            "go" => Ok(ProgrammingLanguage::Go),
            "dotnet" => Ok(ProgrammingLanguage::DotNet),
            "javascript" | "nodejs" => Ok(ProgrammingLanguage::JavaScript),
            "php" => Ok(ProgrammingLanguage::Php),
            "ruby" => Ok(ProgrammingLanguage::Ruby),
            "rust" => Ok(ProgrammingLanguage::Rust),
            "cplusplus" | "cpp" => Ok(ProgrammingLanguage::Cplusplus),
            "nginx" => Ok(ProgrammingLanguage::Nginx),
            other => Err(ParseDistributionError::UnknownLanguage(other.to_string())),
        }
    }
}

/// The flavour of OpenTelemetry SDK an engine attaches for a language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtelSdk {
    Community,
    Enterprise,
    Ebpf,
    Native,
}

impl OtelSdk {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtelSdk::Community => "community",
            OtelSdk::Enterprise => "enterprise",
            OtelSdk::Ebpf => "ebpf",
            OtelSdk::Native => "native",
        }
    }
}

impl fmt::Display for OtelSdk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OtelSdk {
    type Err = ParseDistributionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "community" => Ok(OtelSdk::Community),
            "enterprise" => Ok(OtelSdk::Enterprise),
            "ebpf" => Ok(OtelSdk::Ebpf),
            "native" => Ok(OtelSdk::Native),
            other => Err(ParseDistributionError::UnknownSdk(other.to_string())),
        }
    }
}

/// A (language, sdk) pair. Selects the instrumentation factory for a process.
///
/// Rendered as `<language>-<sdk>`, e.g. `java-community` or `go-ebpf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OtelDistribution {
    pub language: ProgrammingLanguage,
    pub sdk: OtelSdk,
}

impl OtelDistribution {
    pub const fn new(language: ProgrammingLanguage, sdk: OtelSdk) -> Self {
        Self { language, sdk }
    }
}

impl fmt::Display for OtelDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.language, self.sdk)
    }
}

impl FromStr for OtelDistribution {
    type Err = ParseDistributionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (language, sdk) = trimmed
            .split_once('-')
            .ok_or_else(|| ParseDistributionError::Malformed(trimmed.to_string()))?;

        Ok(Self {
            language: language.parse()?,
            sdk: sdk.parse()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseDistributionError {
    #[error("distribution name {0:?} is not of the form <language>-<sdk>")]
    Malformed(String),
    #[error("unknown programming language {0:?}")]
    UnknownLanguage(String),
    #[error("unknown otel sdk {0:?}")]
    UnknownSdk(String),
}
