use crate::traits::CommandRunner;
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, trace};

/// Keys whose following argument is a credential.
const SECRET_KEYS: &[&str] = &["psk", "password", "wpa_passphrase", "sae_password"];

/// Runs one-shot commands on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>> {
        run_output(program, args).await
    }
}

/// Joins `args` for logs and error text, masking the value after a secret key.
fn redacted_args(args: &[String]) -> String {
    let mut shown = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            shown.push("<redacted>");
            mask_next = false;
        } else {
            shown.push(arg.as_str());
            mask_next = SECRET_KEYS.contains(&arg.as_str());
        }
    }
    shown.join(" ")
}

// Helper: run a command and return stdout; produce a unified Error on failure
pub(super) async fn run_output(program: &str, args: &[String]) -> Result<Vec<u8>> {
    let shown = redacted_args(args);
    let out = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| {
            error!(program = %program, error = %source, "failed to spawn command");
            Error::Spawn {
                program: program.to_string(),
                source,
            }
        })?;

    if !out.status.success() {
        let err = String::from_utf8_lossy(&out.stderr);
        error!(program = %program, args = %shown, stderr = %err.trim(), "command failed");
        return Err(Error::CommandFailed(format!(
            "{} {} failed: {}",
            program,
            shown,
            err.trim()
        )));
    }

    trace!(program = %program, args = %shown, stdout = %String::from_utf8_lossy(&out.stdout), "command ok");
    Ok(out.stdout)
}
