use super::{CapabilityContext, OperationSet};
use crate::error::Result;
use crate::process::{self, ProcessOutput, ProcessSpec};
use crate::registry::{BoundArgs, OperationDescriptor, ParamType, ParameterSpec};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemOp {
    RunShell,
    GetSystemInfo,
}

#[async_trait]
impl OperationSet for SystemOp {
    const ALL: &'static [Self] = &[SystemOp::RunShell, SystemOp::GetSystemInfo];

    fn describe(self) -> OperationDescriptor {
        match self {
            SystemOp::RunShell => OperationDescriptor::new(
                "run_shell",
                "Execute shell commands and return output",
                "system_operations",
            )
            .param(ParameterSpec::required("command", ParamType::Str))
            .param(ParameterSpec::optional("cwd", ParamType::Str))
            .examples(&[
                "run git commands",
                "system administration",
                "execute CLI tools",
                "file operations",
                "ls command",
            ])
            .keywords(&["shell", "command", "bash", "cli", "terminal", "git"]),
            SystemOp::GetSystemInfo => OperationDescriptor::new(
                "get_system_info",
                "Get detailed system and environment information",
                "system_operations",
            )
            .examples(&[
                "check system specs",
                "environment details",
                "platform info",
                "diagnostics",
            ])
            .keywords(&["system", "info", "platform", "environment", "specs"]),
        }
    }

    async fn run(self, ctx: &CapabilityContext, args: BoundArgs) -> Result<Value> {
        match self {
            SystemOp::RunShell => {
                let command = args.str("command")?;
                let cwd = ctx.working_dir(args.opt_str("cwd")?);
                let output = process::run(ProcessSpec::shell(command, ctx.shell_timeout()).cwd(cwd)).await?;
                Ok(process_report(&output))
            }
            SystemOp::GetSystemInfo => Ok(json!({
                "os": std::env::consts::OS,
                "family": std::env::consts::FAMILY,
                "architecture": std::env::consts::ARCH,
                "cpus": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
                "pid": std::process::id(),
                "workspace": ctx.config.workspace_dir.display().to_string(),
                "environment_variables": std::env::vars_os().count(),
                "version": env!("CARGO_PKG_VERSION"),
            })),
        }
    }
}

/// Exit code and captured output of a finished subprocess. A non-zero exit is
/// reported, not raised.
pub(crate) fn process_report(output: &ProcessOutput) -> Value {
    json!({
        "exit_code": output.exit_code,
        "stdout": output.stdout_text(),
        "stderr": output.stderr_text(),
        "elapsed_ms": output.elapsed_ms,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::capabilities::testing;
    use crate::config::Config;
    use crate::error::AppError;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_run_shell_reports_exit_and_output() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        let out = testing::run(
            SystemOp::RunShell,
            &ctx,
            json!({ "command": "echo out; echo err >&2; exit 3" }),
        )
        .await
        .unwrap();
        assert_eq!(out["exit_code"], 3);
        assert_eq!(out["stdout"], "out\n");
        assert_eq!(out["stderr"], "err\n");
    }

    #[tokio::test]
    async fn test_run_shell_uses_workspace_and_cwd() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/marker"), "").unwrap();
        let ctx = testing::context(dir.path());

        let out = testing::run(SystemOp::RunShell, &ctx, json!({ "command": "ls", "cwd": "sub" }))
            .await
            .unwrap();
        assert_eq!(out["stdout"], "marker\n");
    }

    #[tokio::test]
    async fn test_run_shell_times_out() {
        let dir = tempdir().unwrap();
        let mut config = Config::for_workspace(dir.path());
        config.shell_timeout_secs = 1;
        let ctx = testing::context_with(config);

        let err = testing::run(SystemOp::RunShell, &ctx, json!({ "command": "sleep 30" }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TimeoutError(_)));
    }

    #[tokio::test]
    async fn test_system_info_fields() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        let info = testing::run(SystemOp::GetSystemInfo, &ctx, json!({})).await.unwrap();
        assert_eq!(info["os"], std::env::consts::OS);
        assert!(info["cpus"].as_u64().unwrap() >= 1);
    }
}
