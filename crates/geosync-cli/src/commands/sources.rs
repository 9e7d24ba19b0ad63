use super::{json_pretty, EXIT_SUCCESS};
use geosync_remote::AppConfig;

pub fn run(config: &AppConfig, json: bool) -> Result<u8, String> {
    let sources = config.source_catalogs();
    if json {
        println!("{}", json_pretty(&sources)?);
    } else if sources.is_empty() {
        println!("no source catalogs configured");
    } else {
        println!("{:<16} URL", "NAME");
        for source in &sources {
            println!("{:<16} {}", source.name, source.url);
        }
        let map_services = config.sources.geoserver_instances.len();
        if map_services > 0 {
            println!("({map_services} source map-service(s))");
        }
    }
    Ok(EXIT_SUCCESS)
}
