//! Mapping (method, first path segment) to a handler file.

use crate::error::{AppError, Result};
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};

/// Handler name used for `/` and the empty path.
pub const DEFAULT_ROUTE: &str = "index";

/// Suffixes reserved for method-specific handler files.
const METHOD_SUFFIXES: &[&str] = &[
    "get", "post", "put", "patch", "delete", "head", "options", "connect", "trace",
];

#[derive(Debug, Clone)]
pub struct RouteResolver {
    routes_dir: PathBuf,
    extension: String,
}

impl RouteResolver {
    pub fn new(routes_dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            routes_dir: routes_dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn routes_dir(&self) -> &Path {
        &self.routes_dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Handler file for `method` and request `path`.
    ///
    /// Probes `{name}.{method}.{ext}` then `{name}.{ext}`. Unsafe segments
    /// are rejected before anything on disk is looked at.
    pub async fn resolve(&self, method: &str, path: &str) -> Result<PathBuf> {
        let name = route_name(path)?;

        for candidate in [
            self.handler_path(&name, Some(method)),
            self.handler_path(&name, None),
        ] {
            if tokio::fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                return Ok(candidate);
            }
        }

        Err(AppError::RouteNotFound(path.to_string()))
    }

    /// Where the handler for `name` lives, method-specific when `method` is set.
    ///
    /// `name` must already be a validated segment.
    pub fn handler_path(&self, name: &str, method: Option<&str>) -> PathBuf {
        let file = match method {
            Some(method) => format!("{}.{}.{}", name, method.to_ascii_lowercase(), self.extension),
            None => format!("{}.{}", name, self.extension),
        };
        self.routes_dir.join(file)
    }
}

/// The handler name a request path routes to.
///
/// Only single-segment paths route; a trailing slash is tolerated.
pub fn route_name(path: &str) -> Result<String> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);

    if trimmed.is_empty() {
        return Ok(DEFAULT_ROUTE.to_string());
    }
    if trimmed.contains('/') {
        return Err(AppError::RouteNotFound(path.to_string()));
    }

    let decoded = percent_decode_str(trimmed)
        .decode_utf8()
        .map_err(|_| AppError::RouteNotFound(path.to_string()))?;

    validate_segment(&decoded).map_err(|_| AppError::RouteNotFound(path.to_string()))?;
    Ok(decoded.into_owned())
}

/// Reject anything that could name a file outside the routes directory, or
/// reach a method-specific handler file under another method.
pub fn validate_segment(segment: &str) -> Result<()> {
    let unsafe_segment = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains("..")
        || segment.starts_with('.')
        || segment.contains(['/', '\\', '\0'])
        || names_method_handler(segment);

    if unsafe_segment {
        return Err(AppError::InvalidArgument(format!(
            "'{}' is not a valid route name",
            segment
        )));
    }
    Ok(())
}

fn names_method_handler(segment: &str) -> bool {
    segment
        .rsplit_once('.')
        .map(|(_, suffix)| {
            METHOD_SUFFIXES
                .iter()
                .any(|method| suffix.eq_ignore_ascii_case(method))
        })
        .unwrap_or(false)
}
