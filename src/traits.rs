//! Tool trait, registry and the built-in case-file tools.
//!
//! Tools are what the research agent can call and what `POST /tools/{name}`
//! exposes. Each one declares an OpenAI function-calling schema and is
//! dispatched through [`ToolRegistry::call`], which validates parameters
//! against that schema first.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 ToolRegistry                  │
//! │  search_process                               │
//! │  get_document_list_from_process               │
//! │  get_document_by_type                         │
//! └───────────────┬──────────────────┬────────────┘
//!                 ▼                  ▼
//!        pipeline worker      serve → HTTP API
//! ```
//!
//! Lookup failures are not errors at this level: they come back as
//! `{"error": {"kind": ..., "message": ...}}` values the agent can read.

use std::path::PathBuf;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::config::Config;
use crate::listing::{filter_by_type, list_documents, ListRequest, TypeFilterRequest};
use crate::llm::ToolSpec;
use crate::locator::{locate_case, LookupError};
use crate::status::StatusCell;

/// A tool that agents can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Function name, also the route path (`POST /tools/{name}`).
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema with `type: "object"`, `properties` and `required`.
    fn parameters_schema(&self) -> Value;

    /// Execute with parameters already checked by [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// What tools can see: the archive root and the download status.
#[derive(Debug, Clone)]
pub struct ToolContext {
    archive_root: PathBuf,
    status: StatusCell,
}

impl ToolContext {
    pub fn new(archive_root: impl Into<PathBuf>, status: StatusCell) -> Self {
        Self {
            archive_root: archive_root.into(),
            status,
        }
    }

    pub fn from_config(config: &Config, status: StatusCell) -> Self {
        Self::new(config.archive.root.clone(), status)
    }

    pub fn archive_root(&self) -> &std::path::Path {
        &self.archive_root
    }

    pub fn status(&self) -> &StatusCell {
        &self.status
    }

    /// In-band error object for `err`.
    ///
    /// A not-found while the download is running says so, because the
    /// case may simply not be on disk yet.
    pub fn error_value(&self, err: &LookupError) -> Value {
        let mut message = err.to_string();
        if matches!(err, LookupError::NotFound { .. }) && self.status.status().is_in_progress() {
            message.push_str(" (the archive download is still in progress)");
        }
        json!({ "error": { "kind": err.kind(), "message": message } })
    }
}

/// Why a registry call did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("{0}")]
    InvalidParams(anyhow::Error),
    #[error("{0}")]
    Failed(anyhow::Error),
}

fn parse_request<T: DeserializeOwned>(params: Value) -> Result<T, LookupError> {
    serde_json::from_value(params).map_err(|e| LookupError::InvalidInput(e.to_string()))
}

fn lookup_result<T: serde::Serialize>(
    outcome: Result<T, LookupError>,
    ctx: &ToolContext,
) -> Result<Value> {
    match outcome {
        Ok(value) => Ok(serde_json::to_value(value)?),
        Err(err) => {
            tracing::debug!(kind = err.kind(), error = %err, "lookup failed");
            Ok(ctx.error_value(&err))
        }
    }
}

/// Locates a case folder.
pub struct SearchProcessTool;

#[async_trait]
impl Tool for SearchProcessTool {
    fn name(&self) -> &str {
        "search_process"
    }

    fn description(&self) -> &str {
        "Procura a pasta de um processo SEI. Aceita o número nos formatos \
         XXX/YYYY e XXXYYYY e retorna o nome da pasta, ou um erro se o \
         processo não existir."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Número do processo, ex.: 123/2024 ou 1232024" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = params["id"].as_str().unwrap_or_default();
        lookup_result(locate_case(ctx.archive_root(), id), ctx)
    }
}

/// Lists one page of a case's documents.
pub struct DocumentListTool;

#[async_trait]
impl Tool for DocumentListTool {
    fn name(&self) -> &str {
        "get_document_list_from_process"
    }

    fn description(&self) -> &str {
        "Lista os documentos PDF de um processo SEI em ordem alfabética, com \
         paginação por limit e offset. Retorna os documentos da página e o \
         total de documentos do processo."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Número do processo" },
                "limit": { "type": "integer", "description": "Número máximo de documentos a retornar" },
                "offset": { "type": "integer", "description": "Número de documentos a pular", "default": 0 }
            },
            "required": ["id", "limit"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let outcome = parse_request::<ListRequest>(params)
            .and_then(|req| list_documents(ctx.archive_root(), &req));
        lookup_result(outcome, ctx)
    }
}

/// Filters a case's documents by a type token.
pub struct DocumentTypeTool;

#[async_trait]
impl Tool for DocumentTypeTool {
    fn name(&self) -> &str {
        "get_document_by_type"
    }

    fn description(&self) -> &str {
        "Obtém os documentos de um processo SEI cujo nome contém o tipo \
         informado (ex.: Despacho, Ofício), sem diferenciar maiúsculas de \
         minúsculas."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Número do processo" },
                "document_type": { "type": "string", "description": "Tipo de documento a procurar" }
            },
            "required": ["id", "document_type"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let outcome = parse_request::<TypeFilterRequest>(params)
            .and_then(|req| filter_by_type(ctx.archive_root(), &req));
        lookup_result(outcome, ctx)
    }
}

/// Registry of callable tools.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with the three case-file tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchProcessTool));
        registry.register(Box::new(DocumentListTool));
        registry.register(Box::new(DocumentTypeTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Function specs of every tool, in registration order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Validate `params` against the tool's schema and execute it.
    pub async fn call(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolCallError> {
        let tool = self
            .find(name)
            .ok_or_else(|| ToolCallError::UnknownTool(name.to_string()))?;
        let params = validate_params(&tool.parameters_schema(), &params)
            .map_err(ToolCallError::InvalidParams)?;
        tool.execute(params, ctx)
            .await
            .map_err(ToolCallError::Failed)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Check required fields and types against a JSON Schema and fill defaults.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("parameters must be an object, got {}", json_type_name(other)),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for field in &required {
        if !params_obj.contains_key(*field) {
            bail!("missing required parameter: {}", field);
        }
    }

    let mut result = params_obj.clone();
    for (prop_name, prop_schema) in &properties {
        match params_obj.get(prop_name) {
            Some(value) => {
                if let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) {
                    let type_ok = match expected {
                        "string" => value.is_string(),
                        "integer" => value.is_u64() || value.is_i64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !type_ok {
                        bail!(
                            "parameter '{}' must be of type '{}', got {}",
                            prop_name,
                            expected,
                            json_type_name(value)
                        );
                    }
                }
            }
            None => {
                if let Some(default) = prop_schema.get("default") {
                    result.insert(prop_name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn archive() -> (TempDir, ToolContext) {
        let tmp = TempDir::new().unwrap();
        let case = tmp.path().join("SEI_123_2024").join("vol1");
        fs::create_dir_all(&case).unwrap();
        for name in ["a.pdf", "b_Despacho.pdf", "c.pdf"] {
            fs::write(case.join(name), b"%PDF").unwrap();
        }
        let status = StatusCell::new();
        status.complete(None);
        let ctx = ToolContext::new(tmp.path(), status);
        (tmp, ctx)
    }

    #[test]
    fn registry_exposes_three_tools() {
        let registry = ToolRegistry::with_builtins();
        let names: Vec<String> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "search_process",
                "get_document_list_from_process",
                "get_document_by_type"
            ]
        );
        assert!(registry.find("search").is_none());
    }

    #[tokio::test]
    async fn search_process_returns_folder() {
        let (_tmp, ctx) = archive();
        let registry = ToolRegistry::with_builtins();
        let result = registry
            .call("search_process", json!({ "id": "1232024" }), &ctx)
            .await
            .unwrap();
        assert_eq!(result, json!({ "folder": "SEI_123_2024" }));
    }

    #[tokio::test]
    async fn list_tool_fills_default_offset() {
        let (_tmp, ctx) = archive();
        let registry = ToolRegistry::with_builtins();
        let result = registry
            .call(
                "get_document_list_from_process",
                json!({ "id": "123/2024", "limit": 2 }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result["documents"], json!(["a.pdf", "b_Despacho.pdf"]));
        assert_eq!(result["total_number_of_documents"], 3);
    }

    #[tokio::test]
    async fn lookup_errors_are_in_band() {
        let (_tmp, ctx) = archive();
        let registry = ToolRegistry::with_builtins();
        let result = registry
            .call("search_process", json!({ "id": "9/1999" }), &ctx)
            .await
            .unwrap();
        assert_eq!(result["error"]["kind"], "not_found");
        assert!(!result["error"]["message"]
            .as_str()
            .unwrap()
            .contains("in progress"));

        let result = registry
            .call(
                "get_document_by_type",
                json!({ "id": "12x/2024", "document_type": "despacho" }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result["error"]["kind"], "invalid_input");
    }

    #[tokio::test]
    async fn not_found_mentions_running_download() {
        let tmp = TempDir::new().unwrap();
        let status = StatusCell::new();
        status.try_begin();
        let ctx = ToolContext::new(tmp.path().join("processos"), status);
        let result = ToolRegistry::with_builtins()
            .call("search_process", json!({ "id": "123/2024" }), &ctx)
            .await
            .unwrap();
        assert!(result["error"]["message"]
            .as_str()
            .unwrap()
            .contains("download is still in progress"));
    }

    #[tokio::test]
    async fn not_found_without_running_download_is_plain() {
        let tmp = TempDir::new().unwrap();
        let failed = StatusCell::new();
        failed.try_begin();
        failed.fail("HTTP 404");
        for status in [failed, StatusCell::new()] {
            let ctx = ToolContext::new(tmp.path().join("processos"), status);
            let result = ToolRegistry::with_builtins()
                .call("search_process", json!({ "id": "123/2024" }), &ctx)
                .await
                .unwrap();
            assert_eq!(result["error"]["kind"], "not_found");
            assert!(!result["error"]["message"]
                .as_str()
                .unwrap()
                .contains("still in progress"));
        }
    }

    #[tokio::test]
    async fn registry_rejects_unknown_tools_and_bad_params() {
        let (_tmp, ctx) = archive();
        let registry = ToolRegistry::with_builtins();
        assert!(matches!(
            registry.call("nope", json!({}), &ctx).await,
            Err(ToolCallError::UnknownTool(_))
        ));
        assert!(matches!(
            registry
                .call("get_document_list_from_process", json!({ "id": "1/2020" }), &ctx)
                .await,
            Err(ToolCallError::InvalidParams(_))
        ));
        assert!(matches!(
            registry
                .call("search_process", json!({ "id": 1232024 }), &ctx)
                .await,
            Err(ToolCallError::InvalidParams(_))
        ));
    }

    #[test]
    fn validate_params_injects_defaults() {
        let schema = DocumentListTool.parameters_schema();
        let out = validate_params(&schema, &json!({ "id": "1/2020", "limit": 5 })).unwrap();
        assert_eq!(out["offset"], 0);
        assert!(validate_params(&schema, &json!("1/2020")).is_err());
    }
}
