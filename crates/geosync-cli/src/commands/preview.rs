use super::{json_pretty, report_failure, spinner, EXIT_SUCCESS};
use console::Style;
use geosync_core::{CopyEnv, CopyManager, CopyOptions, CopyPreview, CopyRequest};
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
    let env = Arc::new(CopyEnv::from_config(Arc::new(config)));
    let mut manager = CopyManager::new(
        env,
        CopyRequest::new(src, dst, uuid),
        Arc::new(LogCollector::new()),
    );

    let pb = spinner(&format!("inspecting {uuid} on {src}…"));
    let result = manager.copy_preview(options);
    pb.finish_and_clear();
    let preview = match result {
        Ok(preview) => preview,
        Err(err) => return Ok(report_failure(&err, json)),
    };

    if json {
        println!("{}", json_pretty(&preview)?);
    } else {
        print_preview(&preview);
    }
    Ok(EXIT_SUCCESS)
}

fn print_preview(preview: &CopyPreview) {
    let heading = Style::new().bold();
    let name = Style::new().cyan();
    if preview.geonetwork_resources.is_empty() && preview.geoserver_resources.is_empty() {
        println!("nothing to copy");
        return;
    }
    for catalog in &preview.geonetwork_resources {
        println!(
            "{} {} -> {}",
            heading.apply_to("catalog"),
            catalog.src,
            catalog.dst
        );
        for meta in &catalog.metadata {
            println!("  [{}] {}", meta.iso_standard, name.apply_to(&meta.title));
        }
    }
    for service in &preview.geoserver_resources {
        println!(
            "{} {} -> {}",
            heading.apply_to("map-service"),
            service.src,
            service.dst
        );
        if !service.layers.is_empty() {
            println!("  layers: {}", name.apply_to(service.layers.join(", ")));
        }
        if !service.styles.is_empty() {
            println!("  styles: {}", name.apply_to(service.styles.join(", ")));
        }
    }
}
