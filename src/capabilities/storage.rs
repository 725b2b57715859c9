//! Keyed store capabilities. Every operation takes an optional `db_path`,
//! defaulting to `KV_DEFAULT_PATH` under the workspace.

use super::{CapabilityContext, OperationSet};
use crate::error::{AppError, Result};
use crate::registry::{BoundArgs, OperationDescriptor, ParamType, ParameterSpec};
use crate::store::KeyedStore;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Put,
    Get,
    Delete,
    List,
}

#[async_trait]
impl OperationSet for StorageOp {
    const ALL: &'static [Self] = &[StorageOp::Put, StorageOp::Get, StorageOp::Delete, StorageOp::List];

    fn describe(self) -> OperationDescriptor {
        let key = || ParameterSpec::required("key", ParamType::Str);
        let db_path = || ParameterSpec::optional("db_path", ParamType::Str);
        match self {
            StorageOp::Put => OperationDescriptor::new(
                "put",
                "Store a key-value pair in the persistent database",
                "storage",
            )
            .param(key())
            .param(ParameterSpec::required("value", ParamType::Str))
            .param(db_path())
            .examples(&[
                "save configuration",
                "store data",
                "cache results",
                "persist information",
                "save state",
            ])
            .keywords(&["store", "save", "cache", "persist", "database", "kv"]),
            StorageOp::Get => OperationDescriptor::new(
                "get",
                "Retrieve a value by key from the persistent database",
                "storage",
            )
            .param(key())
            .param(db_path())
            .examples(&[
                "load configuration",
                "retrieve data",
                "get cached results",
                "load state",
            ])
            .keywords(&["get", "retrieve", "load", "fetch", "database", "kv"]),
            StorageOp::Delete => OperationDescriptor::new(
                "delete",
                "Remove a key from the persistent database",
                "storage",
            )
            .param(key())
            .param(db_path())
            .examples(&["forget a cached value", "remove stored entry", "clear saved state"])
            .keywords(&["delete", "remove", "forget", "database", "kv"]),
            StorageOp::List => OperationDescriptor::new(
                "list",
                "List stored key-value pairs with pagination support",
                "storage",
            )
            .param(ParameterSpec::with_default("prefix", ParamType::Str, json!("")))
            .param(ParameterSpec::with_default("limit", ParamType::Int, json!(100)))
            .param(ParameterSpec::optional("start_after", ParamType::Str))
            .param(db_path())
            .examples(&[
                "browse stored data",
                "list all keys",
                "paginate through records",
                "search by prefix",
            ])
            .keywords(&["list", "browse", "search", "pagination", "keys"]),
        }
    }

    async fn run(self, ctx: &CapabilityContext, args: BoundArgs) -> Result<Value> {
        let store = open_store(ctx, &args)?;
        let key = match self {
            StorageOp::List => None,
            _ => Some(args.str("key")?.to_string()),
        };
        let value = match self {
            StorageOp::Put => Some(args.str("value")?.to_string()),
            _ => None,
        };
        let prefix = args.opt_str("prefix")?.unwrap_or_default().to_string();
        let start_after = args.opt_str("start_after")?.map(str::to_string);
        let limit = args.opt_int("limit")?.unwrap_or(100).max(0) as usize;

        // SQLite calls block; keep them off the async workers.
        tokio::task::spawn_blocking(move || -> Result<Value> {
            match (self, key) {
                (StorageOp::Put, Some(key)) => {
                    store.put(&key, value.as_deref().unwrap_or_default())?;
                    Ok(json!({ "key": key, "stored": true }))
                }
                (StorageOp::Get, Some(key)) => {
                    let value = store.get(&key)?;
                    Ok(json!({ "found": value.is_some(), "value": value }))
                }
                (StorageOp::Delete, Some(key)) => {
                    let deleted = store.delete(&key)?;
                    Ok(json!({ "key": key, "deleted": deleted }))
                }
                (StorageOp::List, _) => {
                    let page = store.list(&prefix, limit, start_after.as_deref())?;
                    Ok(serde_json::to_value(page)?)
                }
                (_, None) => Err(AppError::MissingArgument("key".to_string())),
            }
        })
        .await
        .map_err(|e| AppError::StorageError(format!("Store task failed: {}", e)))?
    }
}

fn open_store(ctx: &CapabilityContext, args: &BoundArgs) -> Result<Arc<KeyedStore>> {
    let path = match args.opt_str("db_path")? {
        Some(path) => ctx.path(path),
        None => ctx.config.resolve_path(&ctx.config.kv_default_path),
    };
    ctx.stores.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_get_delete_round_trip() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());

        testing::run(StorageOp::Put, &ctx, json!({ "key": "k", "value": "v" }))
            .await
            .unwrap();
        let got = testing::run(StorageOp::Get, &ctx, json!({ "key": "k" })).await.unwrap();
        assert_eq!(got, json!({ "found": true, "value": "v" }));

        let deleted = testing::run(StorageOp::Delete, &ctx, json!({ "key": "k" })).await.unwrap();
        assert_eq!(deleted["deleted"], true);
        let got = testing::run(StorageOp::Get, &ctx, json!({ "key": "k" })).await.unwrap();
        assert_eq!(got, json!({ "found": false, "value": null }));

        assert!(dir.path().join("kv.db").exists());
    }

    #[tokio::test]
    async fn test_stores_are_independent_per_path() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());

        testing::run(StorageOp::Put, &ctx, json!({ "key": "k", "value": "one", "db_path": "a.db" }))
            .await
            .unwrap();
        let other = testing::run(StorageOp::Get, &ctx, json!({ "key": "k", "db_path": "b.db" }))
            .await
            .unwrap();
        assert_eq!(other["found"], false);
    }

    #[tokio::test]
    async fn test_list_pages_through_keys() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        for i in 1..=25 {
            testing::run(
                StorageOp::Put,
                &ctx,
                json!({ "key": format!("a{:02}", i), "value": i.to_string() }),
            )
            .await
            .unwrap();
        }

        let page = testing::run(StorageOp::List, &ctx, json!({ "prefix": "a", "limit": 10 }))
            .await
            .unwrap();
        assert_eq!(page["items"].as_array().unwrap().len(), 10);
        assert_eq!(page["has_more"], true);
        assert_eq!(page["next_start_after"], "a10");

        let page = testing::run(
            StorageOp::List,
            &ctx,
            json!({ "prefix": "a", "limit": 10, "start_after": "a20" }),
        )
        .await
        .unwrap();
        assert_eq!(page["items"].as_array().unwrap().len(), 5);
        assert_eq!(page["has_more"], false);
        assert_eq!(page["next_start_after"], Value::Null);
    }
}
