use super::{colorize_line, json_pretty, report_failure, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use geosync_core::{
    AuditRecord, AuditSink, CopyEnv, CopyManager, CopyOptions, CopyRequest, JsonlAuditSink,
};
use geosync_remote::{AppConfig, LogCollector};
use std::sync::Arc;

pub fn run(
    config: AppConfig,
    src: &str,
    dst: &str,
    uuid: &str,
    options: CopyOptions,
    json: bool,
) -> Result<u8, String> {
    let config = Arc::new(config);
    let env = Arc::new(CopyEnv::from_config(Arc::clone(&config)));
    let request = CopyRequest::new(src, dst, uuid);
    let log = Arc::new(LogCollector::new());
    let mut manager = CopyManager::new(env, request.clone(), Arc::clone(&log));

    let pb = spinner(&format!("copying {uuid} from {src} to {dst}…"));
    let outcome = manager.copy_dataset(options);
    let (code, status) = match &outcome {
        Ok(_) => {
            spin_ok(&pb, "copy complete");
            (EXIT_SUCCESS, 200)
        }
        Err(err) => {
            spin_fail(&pb, "copy failed");
            (report_failure(err, json), geosync_server::wire_status(err))
        }
    };

    if let Some(path) = &config.audit.path {
        let user = std::env::var("USER").unwrap_or_default();
        let record = AuditRecord::from_log(&log, &request, options, (user.as_str(), ""), status);
        if let Err(e) = JsonlAuditSink::new(path).record(&record) {
            tracing::warn!("cannot write audit record to {}: {e}", path.display());
        }
    }

    if let Ok(message) = outcome {
        if json {
            println!("{}", json_pretty(&log.records())?);
        } else {
            for line in log.formatted() {
                println!("{}", colorize_line(&line));
            }
            if !message.is_empty() {
                println!("{message}");
            }
        }
    }
    Ok(code)
}
