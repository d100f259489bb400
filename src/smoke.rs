//! Post-install smoke tests: run the linked executable and require exit 0

use crate::error::{Result, TapError};
use crate::formula::Formula;
use crate::prefix::Prefix;
use anyhow::Context;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

const INVOCATION_TIMEOUT: Duration = Duration::from_secs(60);
const SPAWN_RETRIES: u32 = 10;
const ETXTBSY: i32 = 26;

fn describe(exe: &str, args: &[String]) -> String {
    std::iter::once(exe.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Spawn, retrying while the kernel reports the file as busy (ETXTBSY),
/// which happens when a freshly written executable is still open elsewhere
async fn spawn(exe: &Path, args: &[String]) -> std::io::Result<Child> {
    let mut attempt = 0;
    loop {
        let result = Command::new(exe)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match result {
            Err(e) if e.raw_os_error() == Some(ETXTBSY) && attempt < SPAWN_RETRIES => {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            other => return other,
        }
    }
}

/// Run every configured invocation of `<prefix>/bin/<link>`, returning the
/// ones that passed
pub async fn run_smoke_tests(formula: &Formula, prefix: &Prefix) -> Result<Vec<String>> {
    let exe = prefix.bin().join(&formula.install.link);
    let mut passed = Vec::new();

    for args in &formula.test.invocations {
        let invocation = describe(&formula.install.link, args);
        tracing::debug!("Running {}", invocation);

        let child = spawn(&exe, args)
            .await
            .with_context(|| format!("Failed to run {}", exe.display()))?;

        let status = match tokio::time::timeout(INVOCATION_TIMEOUT, child.wait_with_output()).await
        {
            Ok(output) => output?.status,
            Err(_) => {
                return Err(TapError::SmokeTestFailed {
                    name: formula.name.clone(),
                    invocation,
                    status: format!("timed out after {}s", INVOCATION_TIMEOUT.as_secs()),
                });
            }
        };

        if !status.success() {
            return Err(TapError::SmokeTestFailed {
                name: formula.name.clone(),
                invocation,
                status: match status.code() {
                    Some(code) => format!("exited with status {}", code),
                    None => "was terminated by a signal".to_string(),
                },
            });
        }

        passed.push(invocation);
    }

    Ok(passed)
}
