//! Parsing of explicit `--args` run arguments.

use anyhow::{Result, anyhow, bail};

use crate::core::types::RunArguments;

/// Parse `"pid=1001 commit=true"` into one [`RunArguments`].
///
/// `commit` defaults to `default_commit` when absent.
pub fn parse_run_arguments(raw: &str, default_commit: bool) -> Result<RunArguments> {
    let mut pid = None;
    let mut commit = default_commit;
    for pair in raw.split_whitespace() {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("expected key=value, got '{pair}'"))?;
        match key {
            "pid" if !value.is_empty() => pid = Some(value.to_string()),
            "pid" => bail!("pid must not be empty"),
            "commit" => {
                commit = value
                    .parse()
                    .map_err(|_| anyhow!("commit must be true or false, got '{value}'"))?;
            }
            other => bail!("unknown run argument '{other}'"),
        }
    }
    let pid = pid.ok_or_else(|| anyhow!("run arguments must include pid=<id>"))?;
    Ok(RunArguments { pid, commit })
}
