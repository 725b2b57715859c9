use super::system::process_report;
use super::{CapabilityContext, OperationSet};
use crate::error::{AppError, Result};
use crate::process::{self, ProcessSpec};
use crate::registry::{BoundArgs, OperationDescriptor, ParamType, ParameterSpec};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const PYTHON: &str = "python3";
const INSTALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PythonOp {
    RunPython,
    InstallPackage,
    ListPackages,
}

#[async_trait]
impl OperationSet for PythonOp {
    const ALL: &'static [Self] = &[PythonOp::RunPython, PythonOp::InstallPackage, PythonOp::ListPackages];

    fn describe(self) -> OperationDescriptor {
        match self {
            PythonOp::RunPython => OperationDescriptor::new(
                "run_python",
                "Execute Python code directly and return output",
                "python_execution",
            )
            .param(ParameterSpec::required("code", ParamType::Str))
            .param(ParameterSpec::optional("cwd", ParamType::Str))
            .examples(&[
                "run data analysis",
                "execute script",
                "test code snippet",
                "calculate results",
                "process data",
            ])
            .keywords(&["python", "execute", "run", "code", "script", "calculate"]),
            PythonOp::InstallPackage => OperationDescriptor::new(
                "install_package",
                "Install a Python package using pip",
                "python_execution",
            )
            .param(ParameterSpec::required("package", ParamType::Str))
            .examples(&[
                "install numpy",
                "add dependencies",
                "setup packages",
                "install flask",
                "add libraries",
            ])
            .keywords(&["install", "pip", "package", "dependency", "library"]),
            PythonOp::ListPackages => OperationDescriptor::new(
                "list_packages",
                "List all installed Python packages",
                "python_execution",
            )
            .examples(&[
                "check installed packages",
                "view dependencies",
                "audit environment",
                "package inventory",
            ])
            .keywords(&["packages", "dependencies", "pip list", "installed"]),
        }
    }

    async fn run(self, ctx: &CapabilityContext, args: BoundArgs) -> Result<Value> {
        match self {
            PythonOp::RunPython => {
                let spec = ProcessSpec::new(PYTHON, ctx.shell_timeout())
                    .arg("-c")
                    .arg(args.str("code")?)
                    .cwd(ctx.working_dir(args.opt_str("cwd")?));
                let output = process::run(spec).await?;
                Ok(process_report(&output))
            }
            PythonOp::InstallPackage => {
                let package = package_spec(args.str("package")?)?;
                let spec = ProcessSpec::new(PYTHON, INSTALL_TIMEOUT)
                    .arg("-m")
                    .arg("pip")
                    .arg("install")
                    .arg(package)
                    .cwd(ctx.working_dir(None));
                let output = process::run(spec).await?;
                if !output.success() {
                    return Err(AppError::capability(format!(
                        "Failed to install {}: {}",
                        package,
                        output.stderr_tail(20)
                    )));
                }
                tracing::info!(package, "Python package installed");
                Ok(json!({ "package": package, "output": output.stdout_text() }))
            }
            PythonOp::ListPackages => {
                let spec = ProcessSpec::new(PYTHON, ctx.shell_timeout())
                    .arg("-m")
                    .arg("pip")
                    .arg("list")
                    .arg("--format=json")
                    .cwd(ctx.working_dir(None));
                let output = process::run(spec).await?;
                if !output.success() {
                    return Err(AppError::capability(format!(
                        "pip list failed: {}",
                        output.stderr_tail(20)
                    )));
                }
                Ok(serde_json::from_slice(&output.stdout)
                    .unwrap_or_else(|_| Value::String(output.stdout_text())))
            }
        }
    }
}

/// A requirement specifier, never a pip option.
fn package_spec(package: &str) -> Result<&str> {
    let package = package.trim();
    if package.is_empty() || package.starts_with('-') || package.contains(char::is_whitespace) {
        return Err(AppError::InvalidArgument(format!(
            "'{}' is not a package specifier",
            package
        )));
    }
    Ok(package)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_spec_rejects_options() {
        assert_eq!(package_spec(" requests==2.31 ").unwrap(), "requests==2.31");
        assert!(package_spec("--index-url=http://evil").is_err());
        assert!(package_spec("numpy pandas").is_err());
        assert!(package_spec("").is_err());
    }
}
