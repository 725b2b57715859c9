use super::{require_credential, response_json, CapabilityContext, OperationSet};
use crate::error::{AppError, Result};
use crate::registry::{BoundArgs, OperationDescriptor, ParamType, ParameterSpec};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommsOp {
    SendEmail,
}

#[async_trait]
impl OperationSet for CommsOp {
    const ALL: &'static [Self] = &[CommsOp::SendEmail];

    fn describe(self) -> OperationDescriptor {
        match self {
            CommsOp::SendEmail => OperationDescriptor::new(
                "send_email",
                "Send emails with HTML content via Resend API",
                "communication",
            )
            .param(ParameterSpec::required("to", ParamType::StrOrList))
            .param(ParameterSpec::required("subject", ParamType::Str))
            .param(ParameterSpec::required("html", ParamType::Str))
            .param(ParameterSpec::required("from_email", ParamType::Str))
            .examples(&[
                "send notification email",
                "email reports",
                "alert via email",
                "HTML newsletter",
            ])
            .keywords(&["email", "send", "notification", "communication", "mail"]),
        }
    }

    async fn run(self, ctx: &CapabilityContext, args: BoundArgs) -> Result<Value> {
        let api_key = require_credential(&ctx.config.resend_api_key, "RESEND_API_KEY")?;

        let recipients: Vec<String> = args
            .str_list("to")?
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if recipients.is_empty() {
            return Err(AppError::InvalidArgument("'to' has no valid recipients".to_string()));
        }
        for field in ["subject", "html", "from_email"] {
            if args.str(field)?.trim().is_empty() {
                return Err(AppError::InvalidArgument(format!("'{}' must not be empty", field)));
            }
        }

        let payload = json!({
            "from": args.str("from_email")?,
            "to": recipients,
            "subject": args.str("subject")?,
            "html": args.str("html")?,
        });
        let url = format!("{}/emails", ctx.config.resend_api_url.trim_end_matches('/'));
        let response = ctx.http.post(url).bearer_auth(api_key).json(&payload).send().await?;
        let (status, body) = response_json(response).await?;

        if status != 200 && status != 201 {
            let message = body["message"]
                .as_str()
                .or_else(|| body["error"].as_str())
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            tracing::warn!(status, "Email delivery rejected");
            return Err(AppError::capability(format!("Resend error {}: {}", status, message)));
        }

        let id = body["id"].as_str().or_else(|| body["data"]["id"].as_str());
        tracing::info!(recipients = recipients.len(), id, "Email sent");
        Ok(json!({ "sent": true, "to": recipients, "id": id }))
    }
}
