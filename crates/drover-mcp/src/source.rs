// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rmcp::{
    model::CallToolRequestParams,
    service::{RoleClient, RunningService, ServerSink},
    ServiceExt,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use drover_tools::{ToolCall, ToolDefinition, ToolExecutor, ToolOutput};

use crate::bridge;

/// How to reach one MCP tool server.  The server runs as a child process
/// and speaks the protocol over stdio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Name used as the registry prefix for this server's tools.
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub envs: HashMap<String, String>,
}

/// A connected MCP tool server.
///
/// Owns the client service; [`McpToolSource::tools`] produces
/// [`ToolDefinition`]s whose executors forward calls to the server.
/// [`McpToolSource::close`] cancels the service and reaps the child —
/// it is idempotent, and every executor's `close()` delegates here so the
/// runtime's per-executor shutdown contract holds.
pub struct McpToolSource {
    name: String,
    peer: ServerSink,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl McpToolSource {
    /// Spawn the configured server process and complete the MCP handshake.
    pub async fn connect(config: &McpServerConfig) -> Result<Arc<Self>> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.envs)
            .stderr(Stdio::inherit())
            .stdout(Stdio::piped())
            .stdin(Stdio::piped());
        let transport = rmcp::transport::child_process::TokioChildProcess::new(cmd)
            .with_context(|| format!("spawning MCP server '{}'", config.name))?;
        let service = ()
            .serve(transport)
            .await
            .with_context(|| format!("MCP handshake with '{}'", config.name))?;
        debug!(server = %config.name, "connected to MCP server");

        let peer = service.peer().clone();
        Ok(Arc::new(Self {
            name: config.name.clone(),
            peer,
            service: Mutex::new(Some(service)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// List the server's tools as bound [`ToolDefinition`]s.
    pub async fn tools(self: &Arc<Self>) -> Result<Vec<ToolDefinition>> {
        let listed = self
            .peer
            .list_tools(Default::default())
            .await
            .with_context(|| format!("listing tools on MCP server '{}'", self.name))?;

        let mut defs = Vec::with_capacity(listed.tools.len());
        for tool in &listed.tools {
            defs.push(ToolDefinition {
                name: tool.name.to_string(),
                description: tool
                    .description
                    .as_deref()
                    .unwrap_or_default()
                    .to_string(),
                input_schema: bridge::tool_input_schema(tool),
                annotations: bridge::tool_annotations(tool),
                executor: Arc::new(McpRemoteExecutor {
                    source: Arc::clone(self),
                    tool_name: tool.name.to_string(),
                }),
            });
        }
        Ok(defs)
    }

    /// Shut down the client service.  Safe to call more than once.
    pub async fn close(&self) {
        let service = self.service.lock().await.take();
        if let Some(service) = service {
            if let Err(e) = service.cancel().await {
                warn!(server = %self.name, error = %e, "error closing MCP server");
            }
        }
    }
}

/// Executor forwarding one tool's calls to its MCP server.
struct McpRemoteExecutor {
    source: Arc<McpToolSource>,
    tool_name: String,
}

#[async_trait]
impl ToolExecutor for McpRemoteExecutor {
    async fn call(&self, call: &ToolCall) -> ToolOutput {
        let arguments = call.args.as_object().cloned();
        let result = self
            .source
            .peer
            .call_tool(CallToolRequestParams {
                meta: None,
                name: self.tool_name.clone().into(),
                arguments,
                task: None,
            })
            .await;
        match result {
            Ok(r) => bridge::call_result_to_output(&call.id, r),
            // Transport-level failure — catastrophic for this call, reported
            // as an error observation like any other tool failure.
            Err(e) => ToolOutput::err(
                &call.id,
                format!("MCP call to '{}' failed: {e}", self.tool_name),
            ),
        }
    }

    async fn close(&self) {
        self.source.close().await;
    }
}
