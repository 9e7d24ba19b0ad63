use super::{json_pretty, EXIT_SUCCESS};
use geosync_remote::AppConfig;

pub fn run(config: &AppConfig, json: bool) -> Result<u8, String> {
    let destinations = config.destination_entries();
    if json {
        println!("{}", json_pretty(&destinations)?);
    } else if destinations.is_empty() {
        println!("no destinations configured");
    } else {
        println!("{:<16} {:<48} GEOSERVER", "NAME", "GEONETWORK");
        for dst in &destinations {
            println!("{:<16} {:<48} {}", dst.name, dst.gn_url, dst.gs_url);
        }
    }
    Ok(EXIT_SUCCESS)
}
