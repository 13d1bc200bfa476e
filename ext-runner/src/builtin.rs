//! Demo extensions registered by the shipped binary.
//!
//! Real deployments register their own extensions through
//! [`crate::cli::main_with`]; these exist so the harness can be exercised
//! end to end without any.

use anyhow::Result;
use minijinja::context;
use rand::Rng;

use crate::core::types::IntegrationTest;
use crate::extension::{
    Content, Extension, ExtensionEnv, ExtensionKind, ExtensionRegistry, FileExtension,
    GeneralExtension,
};

const SAMPLE_LIST_TEMPLATE: &str = "\
# Sample list for {{ pid }} ({{ created }})
{% for sample in samples -%}
{{ sample.well }}\t{{ sample.name }}\t{{ sample.volume }}
{% endfor %}";

/// Registry with every demo extension.
pub fn registry() -> ExtensionRegistry {
    let mut registry = ExtensionRegistry::new();
    registry
        .register("builtin.greeting", || Box::new(Greeting))
        .register("builtin.strict", || Box::new(Strict))
        .register("builtin.sample_list", || Box::new(SampleList));
    registry
}

/// Logs a greeting and a warning; always succeeds.
struct Greeting;

impl Extension for Greeting {
    fn kind(&mut self) -> ExtensionKind<'_> {
        ExtensionKind::General(self)
    }

    fn integration_tests(&self) -> Vec<IntegrationTest> {
        vec![IntegrationTest::from("1001")]
    }
}

impl GeneralExtension for Greeting {
    fn execute(&mut self, env: &mut ExtensionEnv<'_>) -> Result<()> {
        let today = env.time("%Y-%m-%d");
        let pid = env.pid().to_string();
        env.context()
            .logger()
            .log(format!("Hello from process {pid} on {today}"));
        env.usage_warning("Greeting is a demo extension", None);
        Ok(())
    }
}

/// Rejects every run with a usage error.
struct Strict;

impl Extension for Strict {
    fn kind(&mut self) -> ExtensionKind<'_> {
        ExtensionKind::General(self)
    }

    fn integration_tests(&self) -> Vec<IntegrationTest> {
        vec![IntegrationTest::from("1001")]
    }
}

impl GeneralExtension for Strict {
    fn execute(&mut self, env: &mut ExtensionEnv<'_>) -> Result<()> {
        let volume: f64 = env.parse("12.5")?;
        if volume < 20.0 {
            env.usage_error_defer("Volume below minimum", Some("A1"));
        }
        env.raise_deferred()
    }
}

/// Renders a sample list from the step's "Sample sheet" shared file.
struct SampleList;

impl Extension for SampleList {
    fn kind(&mut self) -> ExtensionKind<'_> {
        ExtensionKind::FileProducing(self)
    }

    fn integration_tests(&self) -> Vec<IntegrationTest> {
        vec![IntegrationTest::from("1001")]
    }
}

#[derive(serde::Serialize)]
struct SampleRow {
    well: String,
    name: String,
    volume: u32,
}

impl FileExtension for SampleList {
    fn shared_file(&self) -> String {
        "Sample list".to_string()
    }

    fn filename(&self) -> String {
        "sample_list.tsv".to_string()
    }

    fn content(&mut self, env: &mut ExtensionEnv<'_>) -> Result<Content> {
        let sheet = env.context().local_shared_file("Sample sheet")?;
        let raw = std::fs::read_to_string(&sheet)?;
        let mut samples = Vec::new();
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            let Some((well, name)) = line.split_once(',') else {
                env.usage_error_defer("Malformed sample sheet line", Some(line));
                continue;
            };
            samples.push(SampleRow {
                well: well.trim().to_string(),
                name: name.trim().to_string(),
                volume: env.rng().gen_range(10..50),
            });
        }
        env.raise_deferred()?;
        Content::from_template(
            SAMPLE_LIST_TEMPLATE,
            context! {
                pid => env.pid(),
                created => env.time("%Y-%m-%d %H:%M:%S"),
                samples => samples,
            },
        )
    }
}
