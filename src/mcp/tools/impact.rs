//! Change-impact tool.

use rmcp::{model::*, ErrorData as McpError};

use crate::engine::ConstructorService;
use crate::mcp::types::AnalyzeImpactArgs;

use super::common::{json_result, require_non_empty};

pub fn analyze_impact(
    service: &ConstructorService,
    args: AnalyzeImpactArgs,
) -> Result<CallToolResult, McpError> {
    if let Err(e) = require_non_empty("file_path", &args.file_path) {
        return Ok(e);
    }
    let impact = service.analyze_impact(args.file_path.trim(), &args.change_description);
    Ok(json_result(&impact))
}
