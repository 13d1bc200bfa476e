//! Extension contracts, the per-execution environment and the registry.
//!
//! An extension declares its capability through [`Extension::kind`]; the
//! execution runner switches on the returned [`ExtensionKind`] instead of
//! inspecting types.

use std::any::type_name;
use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::Result;
use chrono::{Local, NaiveDate, NaiveDateTime};
use minijinja::Environment;
use rand::SeedableRng;
use rand::rngs::StdRng;
use regex::Regex;
use serde::Serialize;

use crate::context::Context;
use crate::core::issues::DeferredIssues;
use crate::core::types::{FilePrefix, IntegrationTest};
use crate::error::{RunError, UsageError};

/// Seed used for random numbers in test mode.
pub const TEST_RNG_SEED: u64 = 0;

/// Clock reading in test mode, so rendered timestamps are reproducible.
pub fn test_mode_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2016, 12, 12)
        .and_then(|date| date.and_hms_opt(12, 43, 36))
        .unwrap_or_default()
}

/// Capability descriptor returned by [`Extension::kind`].
pub enum ExtensionKind<'a> {
    General(&'a mut dyn GeneralExtension),
    FileProducing(&'a mut dyn FileExtension),
    /// Anything else; the name is reported as not implemented.
    Unsupported(&'static str),
}

/// A user-authored script run by the harness.
pub trait Extension {
    fn kind(&mut self) -> ExtensionKind<'_>;

    /// Process instances this extension is tested against.
    fn integration_tests(&self) -> Vec<IntegrationTest> {
        Vec::new()
    }
}

/// Extension that does its own work against the context.
pub trait GeneralExtension {
    fn execute(&mut self, env: &mut ExtensionEnv<'_>) -> Result<()>;
}

/// Extension that renders one file and uploads it to a shared file.
pub trait FileExtension {
    /// Name of the shared file the content is uploaded to.
    fn shared_file(&self) -> String;
    fn filename(&self) -> String;
    fn content(&mut self, env: &mut ExtensionEnv<'_>) -> Result<Content>;

    fn newline(&self) -> &str {
        "\n"
    }

    fn file_prefix(&self) -> FilePrefix {
        FilePrefix::ProcessArtifact
    }
}

/// Rendered file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Lines(Vec<String>),
}

impl Content {
    /// Render a minijinja template with `ctx`.
    pub fn from_template<S: Serialize>(source: &str, ctx: S) -> Result<Content> {
        let mut env = Environment::new();
        env.add_template("content", source)?;
        let rendered = env.get_template("content")?.render(ctx)?;
        Ok(Content::Text(rendered))
    }

    pub fn render(self, newline: &str) -> String {
        match self {
            Content::Text(text) => text,
            Content::Lines(lines) => lines.join(newline),
        }
    }
}

/// What an extension sees while it runs: the context, its deferred issues
/// and reproducible sources of randomness and time.
pub struct ExtensionEnv<'a> {
    context: &'a mut dyn Context,
    issues: &'a mut DeferredIssues,
    rng: Option<StdRng>,
}

impl<'a> ExtensionEnv<'a> {
    pub fn new(context: &'a mut dyn Context, issues: &'a mut DeferredIssues) -> Self {
        Self {
            context,
            issues,
            rng: None,
        }
    }

    pub fn context(&mut self) -> &mut (dyn Context + 'a) {
        &mut *self.context
    }

    pub fn issues(&self) -> &DeferredIssues {
        &*self.issues
    }

    pub fn test_mode(&self) -> bool {
        self.context.test_mode()
    }

    pub fn pid(&self) -> &str {
        self.context.pid()
    }

    /// Record a warning under `category` and keep going.
    pub fn usage_warning(&mut self, category: &str, value: Option<&str>) {
        self.issues.defer_warning(category, value);
    }

    /// Record an error under `category` and keep going.
    pub fn usage_error_defer(&mut self, category: &str, value: Option<&str>) {
        self.issues.defer_error(category, value);
    }

    /// Record `category` as an error unless an error was already deferred.
    pub fn ensure_error(&mut self, category: &str) -> bool {
        self.issues.ensure_error(category)
    }

    /// A usage error to return immediately.
    pub fn usage_error(&self, message: impl Into<String>) -> anyhow::Error {
        UsageError::new(message).into()
    }

    /// Fail with a usage error if any error has been deferred so far.
    pub fn raise_deferred(&self) -> Result<()> {
        if self.issues.errors.is_empty() {
            return Ok(());
        }
        let categories: Vec<&str> = self.issues.errors.keys().map(String::as_str).collect();
        Err(UsageError::new(format!(
            "{} error(s) were reported: {}",
            categories.len(),
            categories.join(", ")
        ))
        .into())
    }

    /// Parse user input, turning failures into usage errors.
    pub fn parse<T: FromStr>(&self, raw: &str) -> Result<T> {
        raw.trim().parse().map_err(|_| {
            UsageError::new(format!(
                "Not able to parse '{raw}' to a {}",
                short_type_name::<T>()
            ))
            .into()
        })
    }

    /// Random number generator, seeded with [`TEST_RNG_SEED`] in test mode.
    pub fn rng(&mut self) -> &mut StdRng {
        let test_mode = self.context.test_mode();
        self.rng.get_or_insert_with(|| {
            if test_mode {
                StdRng::seed_from_u64(TEST_RNG_SEED)
            } else {
                StdRng::from_entropy()
            }
        })
    }

    /// Local time, or [`test_mode_now`] in test mode.
    pub fn now(&self) -> NaiveDateTime {
        if self.test_mode() {
            test_mode_now()
        } else {
            Local::now().naive_local()
        }
    }

    /// [`ExtensionEnv::now`] formatted with a `strftime` pattern.
    pub fn time(&self, format: &str) -> String {
        self.now().format(format).to_string()
    }
}

fn short_type_name<T>() -> &'static str {
    let name = type_name::<T>();
    name.rsplit("::").next().unwrap_or(name)
}

/// Constructor for a fresh extension instance.
pub type ExtensionFactory = Box<dyn Fn() -> Box<dyn Extension>>;

/// Extensions available to the harness, by dotted module name.
#[derive(Default)]
pub struct ExtensionRegistry {
    factories: BTreeMap<String, ExtensionFactory>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, module: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Extension> + 'static,
    {
        self.factories.insert(module.to_string(), Box::new(factory));
        self
    }

    pub fn contains(&self, module: &str) -> bool {
        self.factories.contains_key(module)
    }

    /// New instance of `module`.
    pub fn create(&self, module: &str) -> Result<Box<dyn Extension>> {
        let factory = self
            .factories
            .get(module)
            .ok_or_else(|| RunError::UnknownModule(module.to_string()))?;
        Ok(factory())
    }

    /// Registered module names, sorted.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Registered module names matching `pattern`.
    pub fn matching(&self, pattern: &Regex) -> Vec<&str> {
        self.modules().filter(|m| pattern.is_match(m)).collect()
    }
}
