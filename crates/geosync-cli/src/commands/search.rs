use super::{json_pretty, report_failure, EXIT_SUCCESS};
use geosync_core::{CopyEnv, CopyError, RequestScope, Side};
use geosync_remote::{AppConfig, LogCollector};
use serde_json::Value;
use std::sync::Arc;

pub fn run(config: AppConfig, src: &str, query: &str, json: bool) -> Result<u8, String> {
    let query: Value =
        serde_json::from_str(query).map_err(|e| format!("invalid search query: {e}"))?;
    let env = CopyEnv::from_config(Arc::new(config));
    let log = Arc::new(LogCollector::new());
    let mut scope = RequestScope::new(env.access, env.services, Arc::clone(&log));

    let result = scope
        .catalog(Side::Source, src)
        .and_then(|catalog| catalog.search(&query).map_err(CopyError::from));
    let hits = match result {
        Ok(hits) => hits,
        Err(err) => return Ok(report_failure(&err.with_operations(log.records()), json)),
    };

    if json {
        println!("{}", json_pretty(&hits)?);
        return Ok(EXIT_SUCCESS);
    }
    let empty = Vec::new();
    let entries = hits["hits"]["hits"].as_array().unwrap_or(&empty);
    println!("{} hit(s)", hits["hits"]["total"]["value"].as_u64().unwrap_or(entries.len() as u64));
    for hit in entries {
        let id = hit["_id"].as_str().unwrap_or_default();
        let title = hit["_source"]["resourceTitleObject"]["default"]
            .as_str()
            .unwrap_or_default();
        println!("{id}  {title}");
    }
    Ok(EXIT_SUCCESS)
}
