use super::fs::shown;
use super::{CapabilityContext, OperationSet};
use crate::error::{AppError, Result};
use crate::registry::{BoundArgs, OperationDescriptor, ParamType, ParameterSpec};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorOp {
    GenerateHtml,
}

#[async_trait]
impl OperationSet for GeneratorOp {
    const ALL: &'static [Self] = &[GeneratorOp::GenerateHtml];

    fn describe(self) -> OperationDescriptor {
        match self {
            GeneratorOp::GenerateHtml => OperationDescriptor::new(
                "generate_html",
                "Generate a complete HTML file with title and body content",
                "content_generation",
            )
            .param(ParameterSpec::required("title", ParamType::Str))
            .param(ParameterSpec::required("body", ParamType::Str))
            .param(ParameterSpec::required("name", ParamType::Str))
            .examples(&[
                "create webpage",
                "generate HTML document",
                "build simple site",
                "create landing page",
            ])
            .keywords(&["html", "webpage", "generate", "create", "web", "site"]),
        }
    }

    async fn run(self, ctx: &CapabilityContext, args: BoundArgs) -> Result<Value> {
        let name = args.str("name")?.trim();
        let name = name.strip_suffix(".html").unwrap_or(name);
        if name.is_empty() {
            return Err(AppError::InvalidArgument("name must not be empty".to_string()));
        }

        let path = ctx.path(&format!("{}.html", name));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, html_page(args.str("title")?, args.str("body")?)).await?;
        tracing::debug!(path = %path.display(), "HTML page generated");
        Ok(json!({ "path": shown(&path), "file": format!("{}.html", name) }))
    }
}

/// `body` is inserted as markup; `title` is escaped.
fn html_page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head>\n    \
         <meta charset=\"UTF-8\">\n    \
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n    \
         <title>{}</title>\n\
         </head>\n\
         <body>\n    \
         {}\n\
         </body>\n\
         </html>\n",
        escape_text(title),
        body
    )
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
