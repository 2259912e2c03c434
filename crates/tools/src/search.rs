//! Web search tool backed by the Tavily API.

use async_trait::async_trait;
use deskmate_core::error::ToolError;
use deskmate_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// Search the web via Tavily and return formatted results.
pub struct TavilySearchTool {
    api_key: String,
    client: reqwest::Client,
    max_results: usize,
}

impl TavilySearchTool {
    pub fn new(api_key: impl Into<String>, max_results: usize) -> Self {
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            max_results: max_results.clamp(1, 10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

fn format_results(query: &str, results: &[TavilyResult]) -> String {
    if results.is_empty() {
        return format!("No web search results found for '{query}'.");
    }
    let mut output = format!("Web search results for '{query}':\n\n");
    for (i, result) in results.iter().enumerate() {
        output.push_str(&format!(
            "{}. {}\n   {}\n   {}\n\n",
            i + 1,
            result.title,
            result.url,
            result.content
        ));
    }
    output.trim_end().to_string()
}

#[async_trait]
impl Tool for TavilySearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns a list of relevant results with titles, URLs, and content snippets."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": self.max_results,
        });

        let response = match self.client.post(TAVILY_API_URL).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                return Ok(ToolResult {
                    call_id: String::new(),
                    success: false,
                    output: format!("Web search failed: {e}"),
                    data: None,
                });
            }
        };
        if !response.status().is_success() {
            let status = response.status();
            return Ok(ToolResult {
                call_id: String::new(),
                success: false,
                output: format!("Web search failed: HTTP {status}"),
                data: None,
            });
        }

        let parsed: TavilyResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                return Ok(ToolResult {
                    call_id: String::new(),
                    success: false,
                    output: format!("Failed to parse search response: {e}"),
                    data: None,
                });
            }
        };

        tracing::debug!(query, results = parsed.results.len(), "Web search completed");
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: format_results(query, &parsed.results),
            data: serde_json::to_value(&parsed.results).ok(),
        })
    }
}
