use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// An immutable, declarative description of one build step.
///
/// `inputs` holds the IDs of the derivations this one depends on. Referencing
/// dependencies by content-addressed ID (rather than by pointer) keeps the
/// graph acyclic and lets it be reconstructed on demand from storage.
///
/// A derivation's identity is a pure function of its fields, except that a
/// `fixed_output` hash, when present, replaces the content hash entirely.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derivation {
    name: String,
    platform: Platform,
    builder: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fixed_output: Option<String>,
}

impl Derivation {
    pub fn new(name: impl Into<String>, platform: Platform, builder: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platform,
            builder: builder.into(),
            args: Vec::new(),
            env: Vec::new(),
            inputs: Vec::new(),
            fixed_output: None,
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a `key=value` environment entry.
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{key}={value}"));
        self
    }

    pub fn with_input(mut self, id: impl Into<String>) -> Self {
        self.inputs.push(id.into());
        self
    }

    pub fn with_inputs<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Declare the output's hash up front, e.g. for a fetched archive whose
    /// checksum is already known.
    pub fn with_fixed_output(mut self, hash: impl Into<String>) -> Self {
        self.fixed_output = Some(hash.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn builder(&self) -> &str {
        &self.builder
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &[String] {
        &self.env
    }

    /// Look up an environment entry by key. Later entries win.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .filter_map(|entry| entry.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn fixed_output(&self) -> Option<&str> {
        self.fixed_output.as_deref()
    }
}

/// Advisory data a generator attaches to a package. Never part of the hash.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    #[serde(default)]
    pub version: String,
    /// IDs of packages that must stay available while this one is in use.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub cache_key: String,
}

impl PackageMetadata {
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }
}
