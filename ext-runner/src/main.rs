//! Extension runner with the demo extensions registered.
//!
//! The shipped binary has no live connection to a lab system; network calls
//! are answered from recorded caches or fail.

use ext_runner::context::{ContextFactory, LocalContextFactory};
use ext_runner::io::config::HarnessConfig;
use ext_runner::io::network::{OfflineTransport, Transport};

fn contexts(config: &HarnessConfig) -> Box<dyn ContextFactory> {
    Box::new(LocalContextFactory::new(
        config.api_base_url.clone(),
        Box::new(|| -> Box<dyn Transport> { Box::new(OfflineTransport) }),
    ))
}

fn main() {
    std::process::exit(ext_runner::cli::main_with(
        ext_runner::builtin::registry(),
        contexts,
    ));
}
