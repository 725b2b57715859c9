//! Canonical text representation of a descriptor for embedding.

use crate::registry::OperationDescriptor;

/// Maximum description length before truncation
const MAX_DESCRIPTION_LENGTH: usize = 500;

/// Build the text embedded for `descriptor`.
///
/// Format: "Tool: <name> | Category: <category> | Description: <desc> |
/// Parameters: <p1, p2> | Examples: <e1 | e2> | Keywords: <k1 k2>".
/// Parameter, example and keyword sections are omitted when empty.
pub fn canonical_text(descriptor: &OperationDescriptor) -> String {
    let mut parts = vec![
        format!("Tool: {}", descriptor.name),
        format!("Category: {}", descriptor.category),
        format!(
            "Description: {}",
            truncate_description(&descriptor.description)
        ),
    ];

    if !descriptor.parameters.is_empty() {
        parts.push(format!(
            "Parameters: {}",
            descriptor.parameter_names().join(", ")
        ));
    }

    if !descriptor.examples.is_empty() {
        parts.push(format!("Examples: {}", descriptor.examples.join(" | ")));
    }

    if !descriptor.keywords.is_empty() {
        parts.push(format!("Keywords: {}", descriptor.keywords.join(" ")));
    }

    parts.join(" | ")
}

/// Parameters rendered as "name: type" pairs for result payloads.
pub fn parameters_text(descriptor: &OperationDescriptor) -> String {
    descriptor
        .parameters
        .iter()
        .map(|p| {
            let marker = if p.required { "*" } else { "" };
            format!("{}{}: {}", p.name, marker, p.kind)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Truncate to MAX_DESCRIPTION_LENGTH with an ellipsis, preferring a word boundary.
fn truncate_description(desc: &str) -> String {
    if desc.len() <= MAX_DESCRIPTION_LENGTH {
        return desc.to_string();
    }

    let mut end = MAX_DESCRIPTION_LENGTH;
    while !desc.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = &desc[..end];

    match truncated.rfind(' ') {
        Some(pos) if pos > MAX_DESCRIPTION_LENGTH - 50 => format!("{}...", &truncated[..pos]),
        _ => format!("{}...", truncated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ParamType, ParameterSpec};

    #[test]
    fn test_full_canonical_text() {
        let desc = OperationDescriptor::new("create_file", "Create a new file", "file_system")
            .param(ParameterSpec::required("filepath", ParamType::Str))
            .param(ParameterSpec::required("content", ParamType::Str))
            .examples(&["save configuration file", "write documentation"])
            .keywords(&["create", "file"]);

        assert_eq!(
            canonical_text(&desc),
            "Tool: create_file | Category: file_system | Description: Create a new file | \
             Parameters: filepath, content | Examples: save configuration file | write documentation | \
             Keywords: create file"
        );
    }

    #[test]
    fn test_empty_sections_omitted() {
        let desc = OperationDescriptor::new("list_servers", "List servers", "cloud_infrastructure");
        assert_eq!(
            canonical_text(&desc),
            "Tool: list_servers | Category: cloud_infrastructure | Description: List servers"
        );
    }

    #[test]
    fn test_truncate_long_description() {
        let long_desc = "A".repeat(600);
        let truncated = truncate_description(&long_desc);

        assert!(truncated.len() <= MAX_DESCRIPTION_LENGTH + 3);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long_desc = "é".repeat(400);
        let truncated = truncate_description(&long_desc);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_parameters_text_marks_required() {
        let desc = OperationDescriptor::new("list", "List keys", "storage")
            .param(ParameterSpec::optional("prefix", ParamType::Str))
            .param(ParameterSpec::required("db_path", ParamType::Str));
        assert_eq!(parameters_text(&desc), "prefix: str, db_path*: str");
    }
}
