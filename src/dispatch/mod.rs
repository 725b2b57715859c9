//! Invocation dispatcher.
//!
//! Resolves an operation by name, binds its arguments and runs it on its own
//! task. Whatever happens inside the capability (an error, a panic) comes back
//! as an [`Envelope`]; nothing escapes to the caller as a raw fault.

pub mod binding;
pub mod envelope;

pub use binding::bind;
pub use envelope::{Envelope, EnvelopeStatus, InvocationRequest};

use crate::error::{AppError, Result};
use crate::registry::CapabilityRegistry;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Invoke `name` with `args` and wrap the outcome in an envelope.
    pub async fn invoke(&self, name: &str, args: Map<String, Value>) -> Envelope {
        let start = Instant::now();
        let outcome = self.try_invoke(name, args).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let status = if outcome.is_ok() { "success" } else { "error" };
        metrics::counter!(
            "invocations_total",
            "operation" => name.to_string(),
            "status" => status
        )
        .increment(1);
        metrics::histogram!("invocation_latency_ms").record(elapsed_ms as f64);

        match outcome {
            Ok(value) => {
                tracing::info!(operation = %name, elapsed_ms, "Invocation succeeded");
                Envelope::success(value)
            }
            Err(err) => {
                tracing::warn!(
                    operation = %name,
                    elapsed_ms,
                    kind = ?err.kind(),
                    error = %err,
                    "Invocation failed"
                );
                Envelope::failure(&err)
            }
        }
    }

    pub async fn invoke_request(&self, request: InvocationRequest) -> Envelope {
        self.invoke(&request.operation, request.arguments).await
    }

    async fn try_invoke(&self, name: &str, args: Map<String, Value>) -> Result<Value> {
        let capability = self.registry.lookup(name)?;
        let bound = bind(capability.descriptor(), &args)?;

        let handle = tokio::spawn(async move { capability.invoke(bound).await });
        match handle.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                let payload = join_err.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "capability panicked".to_string());
                Err(AppError::CapabilityError(format!("panic: {}", message)))
            }
            Err(join_err) => Err(AppError::CapabilityError(format!(
                "task failed: {}",
                join_err
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::registry::{BoundArgs, Capability, OperationDescriptor, ParamType, ParameterSpec};
    use async_trait::async_trait;
    use serde_json::json;

    struct Hello(OperationDescriptor);

    #[async_trait]
    impl Capability for Hello {
        fn descriptor(&self) -> &OperationDescriptor {
            &self.0
        }

        async fn invoke(&self, args: BoundArgs) -> Result<Value> {
            Ok(json!(format!("Hello, {}!", args.str("name")?)))
        }
    }

    struct Exploding(OperationDescriptor);

    #[async_trait]
    impl Capability for Exploding {
        fn descriptor(&self) -> &OperationDescriptor {
            &self.0
        }

        async fn invoke(&self, _args: BoundArgs) -> Result<Value> {
            panic!("kaboom")
        }
    }

    struct Failing(OperationDescriptor);

    #[async_trait]
    impl Capability for Failing {
        fn descriptor(&self) -> &OperationDescriptor {
            &self.0
        }

        async fn invoke(&self, _args: BoundArgs) -> Result<Value> {
            Err(AppError::capability("No such file or directory (os error 2)"))
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(Hello(
            OperationDescriptor::new("hello", "say hello", "utility")
                .param(ParameterSpec::required("name", ParamType::Str)),
        )));
        registry.register(Arc::new(Exploding(OperationDescriptor::new(
            "explode", "always panics", "test",
        ))));
        registry.register(Arc::new(Failing(OperationDescriptor::new(
            "read_missing", "fails", "test",
        ))));
        Dispatcher::new(Arc::new(registry))
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_unknown_operation_envelope() {
        let env = dispatcher().invoke("nonexistent_op", Map::new()).await;
        assert_eq!(env.status, EnvelopeStatus::Error);
        assert_eq!(env.kind, Some(ErrorKind::UnknownOperation));
        assert!(env.result.is_none());
    }

    #[tokio::test]
    async fn test_extra_arguments_ignored() {
        let env = dispatcher()
            .invoke("hello", args(json!({ "name": "X", "extra": "ignored" })))
            .await;
        assert!(env.is_success());
        assert_eq!(env.result, Some(json!("Hello, X!")));
    }

    #[tokio::test]
    async fn test_missing_argument_envelope() {
        let env = dispatcher().invoke("hello", Map::new()).await;
        assert_eq!(env.kind, Some(ErrorKind::MissingArgument));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let d = dispatcher();
        let env = d.invoke("explode", Map::new()).await;
        assert_eq!(env.kind, Some(ErrorKind::CapabilityError));
        assert!(env.error.unwrap().contains("kaboom"));

        // The dispatcher keeps working after a capability panicked.
        let env = d.invoke("hello", args(json!({ "name": "again" }))).await;
        assert!(env.is_success());
    }

    #[tokio::test]
    async fn test_capability_error_message_captured() {
        let env = dispatcher().invoke("read_missing", Map::new()).await;
        assert_eq!(env.kind, Some(ErrorKind::CapabilityError));
        assert_eq!(env.error.as_deref(), Some("No such file or directory (os error 2)"));
    }
}
