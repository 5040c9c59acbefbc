use stash_types::{Derivation, PackageMetadata};

use crate::context::BuildContext;
use crate::error::GenResult;
use crate::generator::{Dependency, Generated, Generator};

/// A declarative generator: fixed builder, arguments and environment, with
/// dependencies resolved against the context it runs in.
///
/// The derivation runs on the build platform and sees the full triple as
/// `buildPlatform`, `hostPlatform` and `targetPlatform` environment entries,
/// so each triple gets its own ID.
#[derive(Clone, Debug)]
pub struct TemplateGenerator {
    name: String,
    builder: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    dependencies: Vec<Dependency>,
    fixed_output: Option<String>,
    version: String,
}

impl TemplateGenerator {
    pub fn new(name: impl Into<String>, builder: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            builder: builder.into(),
            args: Vec::new(),
            env: Vec::new(),
            dependencies: Vec::new(),
            fixed_output: None,
            version: String::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn dependency(mut self, dep: Dependency) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn fixed_output(mut self, hash: impl Into<String>) -> Self {
        self.fixed_output = Some(hash.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

impl Generator for TemplateGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate(&self, ctx: &BuildContext) -> GenResult<Generated> {
        let resolved = ctx.resolve_all(&self.dependencies)?;
        let platforms = ctx.platforms();

        let mut derivation =
            Derivation::new(&self.name, platforms.build.clone(), &self.builder).with_args(&self.args);
        for (key, value) in &self.env {
            derivation = derivation.with_env(key, value);
        }
        derivation = derivation
            .with_env("buildPlatform", &platforms.build.to_string())
            .with_env("hostPlatform", &platforms.host.to_string())
            .with_env("targetPlatform", &platforms.target.to_string())
            .with_inputs(resolved.iter().map(|dep| dep.id.clone()));
        if let Some(fixed) = &self.fixed_output {
            derivation = derivation.with_fixed_output(fixed);
        }

        let metadata = PackageMetadata {
            version: self.version.clone(),
            dependencies: resolved
                .iter()
                .filter(|dep| dep.runtime)
                .map(|dep| dep.id.clone())
                .collect(),
            ..Default::default()
        };
        Ok(Generated {
            derivation,
            metadata,
        })
    }
}
