use super::{json_pretty, EXIT_SUCCESS};
use geosync_remote::AppConfig;

pub fn run(config: &AppConfig, json: bool) -> Result<u8, String> {
    let transforms = config.registered_transforms();
    if json {
        let payload = serde_json::json!({
            "transformations": transforms,
            "paths": config.transformation_paths,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }
    if transforms.is_empty() {
        println!("no transformations registered");
        return Ok(EXIT_SUCCESS);
    }
    for t in &transforms {
        println!("{:<20} {}", t.name, t.path.display());
        if !t.description.is_empty() {
            println!("{:<20} {}", "", console::style(&t.description).dim());
        }
    }
    for (src, dsts) in &config.transformation_paths {
        for (dst, names) in dsts {
            println!("{src} -> {dst}: {}", names.join(", "));
        }
    }
    Ok(EXIT_SUCCESS)
}
