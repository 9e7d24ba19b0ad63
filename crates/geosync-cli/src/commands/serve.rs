use super::EXIT_SUCCESS;
use geosync_remote::AppConfig;
use geosync_server::AppState;
use std::sync::Arc;

pub fn run(config: AppConfig, bind: &str, port: u16) -> Result<u8, String> {
    let addr = format!("{bind}:{port}");
    eprintln!("geosync server listening on {addr}");
    let state = Arc::new(AppState::from_config(config));
    geosync_server::run_server(&state, &addr).map_err(|e| format!("cannot serve on {addr}: {e}"))?;
    Ok(EXIT_SUCCESS)
}
