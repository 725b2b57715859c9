//! Hetzner Cloud capabilities over the provider's REST API.

use super::{require_credential, response_json, CapabilityContext, OperationSet};
use crate::error::{AppError, Result};
use crate::registry::{BoundArgs, OperationDescriptor, ParamType, ParameterSpec};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};

/// Page size requested from list endpoints, and a bound on pages followed.
const PER_PAGE: u32 = 50;
const MAX_PAGES: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudOp {
    CreateServer,
    ListServers,
    DeleteServer,
    GetServerInfo,
    StartServer,
    StopServer,
    RebootServer,
    CreateSshKey,
    ListSshKeys,
    DeleteSshKey,
    CreateFirewall,
    ListFirewalls,
    DeleteFirewall,
    ListServerTypes,
    ListImages,
}

#[async_trait]
impl OperationSet for CloudOp {
    const ALL: &'static [Self] = &[
        CloudOp::CreateServer,
        CloudOp::ListServers,
        CloudOp::DeleteServer,
        CloudOp::GetServerInfo,
        CloudOp::StartServer,
        CloudOp::StopServer,
        CloudOp::RebootServer,
        CloudOp::CreateSshKey,
        CloudOp::ListSshKeys,
        CloudOp::DeleteSshKey,
        CloudOp::CreateFirewall,
        CloudOp::ListFirewalls,
        CloudOp::DeleteFirewall,
        CloudOp::ListServerTypes,
        CloudOp::ListImages,
    ];

    fn describe(self) -> OperationDescriptor {
        let cat = "cloud_infrastructure";
        let server_id = || ParameterSpec::required("server_id", ParamType::Int);
        match self {
            CloudOp::CreateServer => {
                OperationDescriptor::new("create_server", "Create a new Hetzner Cloud server instance", cat)
                    .param(ParameterSpec::required("name", ParamType::Str))
                    .param(ParameterSpec::with_default("server_type", ParamType::Str, json!("cx22")))
                    .param(ParameterSpec::with_default("image", ParamType::Str, json!("ubuntu-22.04")))
                    .param(ParameterSpec::optional("location", ParamType::Str))
                    .param(ParameterSpec::optional("ssh_keys", ParamType::List))
                    .param(ParameterSpec::optional("user_data", ParamType::Str))
                    .param(ParameterSpec::optional("labels", ParamType::Map))
                    .examples(&[
                        "deploy new server",
                        "create Ubuntu VM",
                        "launch cloud instance",
                        "setup infrastructure",
                        "provision server",
                    ])
                    .keywords(&["server", "cloud", "deploy", "vm", "instance", "hetzner"])
            }
            CloudOp::ListServers => {
                OperationDescriptor::new("list_servers", "List all Hetzner Cloud servers and their status", cat)
                    .examples(&[
                        "check my servers",
                        "view infrastructure",
                        "server inventory",
                        "cloud resources",
                    ])
                    .keywords(&["servers", "infrastructure", "cloud", "inventory", "status"])
            }
            CloudOp::DeleteServer => {
                OperationDescriptor::new("delete_server", "Delete a Hetzner Cloud server permanently", cat)
                    .param(server_id())
                    .examples(&["remove server", "cleanup infrastructure", "delete VM", "destroy instance"])
                    .keywords(&["delete", "remove", "destroy", "cleanup", "terminate"])
            }
            CloudOp::GetServerInfo => OperationDescriptor::new(
                "get_server_info",
                "Get detailed information about a specific server",
                cat,
            )
            .param(server_id())
            .examples(&[
                "check server details",
                "view server IP",
                "server specifications",
                "instance info",
            ])
            .keywords(&["info", "details", "specifications", "status", "metadata"]),
            CloudOp::StartServer => OperationDescriptor::new("start_server", "Power on a Hetzner Cloud server", cat)
                .param(server_id())
                .examples(&["boot server", "power on instance", "start VM", "bring server online"])
                .keywords(&["start", "boot", "power", "online", "activate"]),
            CloudOp::StopServer => OperationDescriptor::new("stop_server", "Power off a Hetzner Cloud server", cat)
                .param(server_id())
                .examples(&[
                    "shutdown server",
                    "power off instance",
                    "stop VM",
                    "take server offline",
                ])
                .keywords(&["stop", "shutdown", "power off", "offline", "halt"]),
            CloudOp::RebootServer => OperationDescriptor::new("reboot_server", "Restart a Hetzner Cloud server", cat)
                .param(server_id())
                .examples(&["restart server", "reboot instance", "reset VM", "refresh server"])
                .keywords(&["reboot", "restart", "reset", "refresh", "cycle"]),
            CloudOp::CreateSshKey => {
                OperationDescriptor::new("create_ssh_key", "Create a new SSH key for server access", cat)
                    .param(ParameterSpec::required("name", ParamType::Str))
                    .param(ParameterSpec::required("public_key", ParamType::Str))
                    .examples(&[
                        "add SSH key for access",
                        "setup server authentication",
                        "manage access keys",
                    ])
                    .keywords(&["ssh", "key", "authentication", "access", "security"])
            }
            CloudOp::ListSshKeys => OperationDescriptor::new("list_ssh_keys", "List all SSH keys in your account", cat)
                .examples(&["view SSH keys", "manage access keys", "check authentication keys"])
                .keywords(&["ssh", "keys", "authentication", "access", "list"]),
            CloudOp::DeleteSshKey => {
                OperationDescriptor::new("delete_ssh_key", "Delete an SSH key from your account", cat)
                    .param(ParameterSpec::required("key_id", ParamType::Int))
                    .examples(&["revoke SSH access", "remove old key", "rotate credentials"])
                    .keywords(&["ssh", "key", "delete", "revoke", "remove"])
            }
            CloudOp::CreateFirewall => OperationDescriptor::new(
                "create_firewall",
                "Create a Hetzner Cloud firewall with inbound and outbound rules",
                cat,
            )
            .param(ParameterSpec::required("name", ParamType::Str))
            .param(ParameterSpec::with_default("firewall_type", ParamType::Str, json!("ipv4")))
            .param(ParameterSpec::optional("rules", ParamType::List))
            .param(ParameterSpec::optional("labels", ParamType::Map))
            .examples(&["open port 443", "restrict SSH access", "secure servers with firewall rules"])
            .keywords(&["firewall", "security", "rules", "ports", "network"]),
            CloudOp::ListFirewalls => {
                OperationDescriptor::new("list_firewalls", "List all firewalls in your account", cat)
                    .examples(&["view firewall rules", "audit network security"])
                    .keywords(&["firewall", "list", "security", "rules"])
            }
            CloudOp::DeleteFirewall => OperationDescriptor::new("delete_firewall", "Delete a firewall", cat)
                .param(ParameterSpec::required("firewall_id", ParamType::Int))
                .examples(&["remove firewall", "drop security rules"])
                .keywords(&["firewall", "delete", "remove", "security"]),
            CloudOp::ListServerTypes => OperationDescriptor::new(
                "list_server_types",
                "List available server types with cores, memory, disk and price",
                cat,
            )
            .examples(&["compare server sizes", "check pricing", "choose instance type"])
            .keywords(&["server types", "pricing", "cores", "memory", "sizes"]),
            CloudOp::ListImages => {
                OperationDescriptor::new("list_images", "List available operating system images", cat)
                    .examples(&["which distributions are available", "choose OS image", "find snapshots"])
                    .keywords(&["images", "os", "distribution", "snapshot", "ubuntu"])
            }
        }
    }

    async fn run(self, ctx: &CapabilityContext, args: BoundArgs) -> Result<Value> {
        let api = Hetzner {
            http: &ctx.http,
            base: ctx.config.hcloud_api_url.trim_end_matches('/'),
            token: require_credential(&ctx.config.hcloud_token, "HCLOUD_TOKEN")?,
        };

        match self {
            CloudOp::CreateServer => {
                let mut body = Map::new();
                body.insert("name".into(), json!(args.str("name")?));
                body.insert("server_type".into(), json!(args.str("server_type")?));
                body.insert("image".into(), json!(args.str("image")?));
                for optional in ["location", "user_data", "labels"] {
                    if let Some(value) = args.value(optional) {
                        body.insert(optional.into(), value);
                    }
                }
                let ssh_keys = args.str_list("ssh_keys")?;
                if !ssh_keys.is_empty() {
                    body.insert("ssh_keys".into(), json!(ssh_keys));
                }

                let created = api.call(Method::POST, "/servers", Some(Value::Object(body))).await?;
                tracing::info!(name = %args.str("name")?, "Hetzner server created");
                Ok(json!({
                    "server": server_summary(&created["server"]),
                    "root_password": created["root_password"],
                }))
            }
            CloudOp::ListServers => {
                let servers = api.list("/servers", "servers").await?;
                Ok(Value::Array(servers.iter().map(server_summary).collect()))
            }
            CloudOp::DeleteServer => {
                let id = resource_id(&args, "server_id")?;
                let action = api.call(Method::DELETE, &format!("/servers/{}", id), None).await?;
                Ok(json!({ "server_id": id, "deleted": true, "action": action_summary(&action) }))
            }
            CloudOp::GetServerInfo => {
                let id = resource_id(&args, "server_id")?;
                let server = api.call(Method::GET, &format!("/servers/{}", id), None).await?;
                Ok(server_details(&server["server"]))
            }
            CloudOp::StartServer | CloudOp::StopServer | CloudOp::RebootServer => {
                let id = resource_id(&args, "server_id")?;
                let action = match self {
                    CloudOp::StartServer => "poweron",
                    CloudOp::StopServer => "poweroff",
                    _ => "reboot",
                };
                let result = api
                    .call(Method::POST, &format!("/servers/{}/actions/{}", id, action), None)
                    .await?;
                Ok(json!({ "server_id": id, "action": action_summary(&result) }))
            }
            CloudOp::CreateSshKey => {
                let body = json!({ "name": args.str("name")?, "public_key": args.str("public_key")? });
                let created = api.call(Method::POST, "/ssh_keys", Some(body)).await?;
                Ok(ssh_key_summary(&created["ssh_key"]))
            }
            CloudOp::ListSshKeys => {
                let keys = api.list("/ssh_keys", "ssh_keys").await?;
                Ok(Value::Array(keys.iter().map(ssh_key_summary).collect()))
            }
            CloudOp::DeleteSshKey => {
                let id = resource_id(&args, "key_id")?;
                api.call(Method::DELETE, &format!("/ssh_keys/{}", id), None).await?;
                Ok(json!({ "key_id": id, "deleted": true }))
            }
            CloudOp::CreateFirewall => {
                let firewall_type = args.str("firewall_type")?;
                let mut body = Map::new();
                body.insert("name".into(), json!(args.str("name")?));
                body.insert("rules".into(), Value::Array(firewall_rules(args.get("rules"))?));
                let mut labels = match args.value("labels") {
                    Some(Value::Object(labels)) => labels,
                    _ => Map::new(),
                };
                labels.entry("firewall_type").or_insert_with(|| json!(firewall_type));
                body.insert("labels".into(), Value::Object(labels));

                let created = api.call(Method::POST, "/firewalls", Some(Value::Object(body))).await?;
                Ok(firewall_summary(&created["firewall"]))
            }
            CloudOp::ListFirewalls => {
                let firewalls = api.list("/firewalls", "firewalls").await?;
                Ok(Value::Array(firewalls.iter().map(firewall_summary).collect()))
            }
            CloudOp::DeleteFirewall => {
                let id = resource_id(&args, "firewall_id")?;
                api.call(Method::DELETE, &format!("/firewalls/{}", id), None).await?;
                Ok(json!({ "firewall_id": id, "deleted": true }))
            }
            CloudOp::ListServerTypes => {
                let types = api.list("/server_types", "server_types").await?;
                Ok(Value::Array(types.iter().map(server_type_summary).collect()))
            }
            CloudOp::ListImages => {
                let images = api.list("/images", "images").await?;
                Ok(Value::Array(
                    images
                        .iter()
                        .map(|img| {
                            json!({
                                "id": img["id"],
                                "name": img["name"],
                                "type": img["type"],
                                "description": img["description"],
                                "os_flavor": img["os_flavor"],
                                "created": img["created"],
                            })
                        })
                        .collect(),
                ))
            }
        }
    }
}

struct Hetzner<'a> {
    http: &'a reqwest::Client,
    base: &'a str,
    token: &'a str,
}

impl Hetzner<'_> {
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let mut request = self
            .http
            .request(method.clone(), format!("{}{}", self.base, path))
            .bearer_auth(self.token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let (status, value) = response_json(request.send().await?).await?;
        if !(200..300).contains(&status) {
            let message = value["error"]["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            tracing::warn!(%method, path, status, "Hetzner API request failed");
            return Err(AppError::capability(format!(
                "Hetzner API error ({}): {}",
                status, message
            )));
        }
        Ok(value)
    }

    /// Every item under `key`, following `meta.pagination.next_page`.
    async fn list(&self, path: &str, key: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut page = 1;
        while page <= MAX_PAGES {
            let body = self
                .call(
                    Method::GET,
                    &format!("{}?page={}&per_page={}", path, page, PER_PAGE),
                    None,
                )
                .await?;
            if let Some(batch) = body[key].as_array() {
                items.extend(batch.iter().cloned());
            }
            match body["meta"]["pagination"]["next_page"].as_u64() {
                Some(next) if next as u32 > page => page = next as u32,
                _ => break,
            }
        }
        Ok(items)
    }
}

fn resource_id(args: &BoundArgs, name: &str) -> Result<i64> {
    let id = args.int(name)?;
    if id <= 0 {
        return Err(AppError::InvalidArgument(format!("{} must be positive", name)));
    }
    Ok(id)
}

fn firewall_rules(rules: Option<&Value>) -> Result<Vec<Value>> {
    let Some(rules) = rules else {
        return Ok(Vec::new());
    };
    let Some(rules) = rules.as_array() else {
        return Err(AppError::InvalidArgument("rules must be a list".to_string()));
    };
    rules
        .iter()
        .map(|rule| {
            if !rule.is_object() {
                return Err(AppError::InvalidArgument(
                    "each firewall rule must be an object".to_string(),
                ));
            }
            let mut out = json!({
                "direction": rule.get("direction").cloned().unwrap_or_else(|| json!("in")),
                "protocol": rule["protocol"],
                "source_ips": rule.get("source_ips").cloned().unwrap_or_else(|| json!([])),
                "destination_ips": rule.get("destination_ips").cloned().unwrap_or_else(|| json!([])),
                "description": rule.get("description").cloned().unwrap_or_else(|| json!("")),
            });
            if let Some(port) = rule.get("port").filter(|p| !p.is_null()) {
                out["port"] = match port {
                    Value::Number(n) => json!(n.to_string()),
                    other => other.clone(),
                };
            }
            Ok(out)
        })
        .collect()
}

fn server_summary(server: &Value) -> Value {
    json!({
        "id": server["id"],
        "name": server["name"],
        "status": server["status"],
        "ipv4": server["public_net"]["ipv4"]["ip"],
        "server_type": server["server_type"]["name"],
        "created": server["created"],
    })
}

fn server_details(server: &Value) -> Value {
    json!({
        "id": server["id"],
        "name": server["name"],
        "status": server["status"],
        "created": server["created"],
        "server_type": server["server_type"]["name"],
        "datacenter": server["datacenter"]["name"],
        "ipv4": server["public_net"]["ipv4"]["ip"],
        "ipv6": server["public_net"]["ipv6"]["ip"],
        "backup_window": server["backup_window"],
        "rescue_enabled": server["rescue_enabled"],
        "protection": server["protection"],
        "labels": server["labels"],
    })
}

fn action_summary(body: &Value) -> Value {
    let action = &body["action"];
    if action.is_null() {
        return Value::Null;
    }
    json!({ "id": action["id"], "command": action["command"], "status": action["status"] })
}

fn ssh_key_summary(key: &Value) -> Value {
    json!({
        "id": key["id"],
        "name": key["name"],
        "fingerprint": key["fingerprint"],
        "created": key["created"],
    })
}

fn firewall_summary(firewall: &Value) -> Value {
    json!({
        "id": firewall["id"],
        "name": firewall["name"],
        "rules": firewall["rules"],
        "labels": firewall["labels"],
        "created": firewall["created"],
    })
}

fn server_type_summary(server_type: &Value) -> Value {
    let price = &server_type["prices"][0]["price_monthly"];
    json!({
        "name": server_type["name"],
        "cores": server_type["cores"],
        "memory_gb": server_type["memory"],
        "disk_gb": server_type["disk"],
        "price_monthly": price["gross"],
        "currency": server_type["prices"][0]["currency"],
    })
}
