use super::{CapabilityContext, OperationSet};
use crate::error::Result;
use crate::registry::{BoundArgs, OperationDescriptor, ParamType, ParameterSpec};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtilityOp {
    Hello,
}

#[async_trait]
impl OperationSet for UtilityOp {
    const ALL: &'static [Self] = &[UtilityOp::Hello];

    fn describe(self) -> OperationDescriptor {
        match self {
            UtilityOp::Hello => OperationDescriptor::new(
                "hello",
                "Basic connectivity test and greeting function",
                "utility",
            )
            .param(ParameterSpec::required("name", ParamType::Str))
            .examples(&["test connection", "health check", "basic greeting", "system test"])
            .keywords(&["hello", "test", "ping", "health", "connectivity"]),
        }
    }

    async fn run(self, _ctx: &CapabilityContext, args: BoundArgs) -> Result<Value> {
        match self {
            UtilityOp::Hello => Ok(json!(format!("Hello, {}!", args.str("name")?))),
        }
    }
}
