use grievance_portal_lib::config::{PortalConfig, CONFIG_PATH_ENV};
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
        .map(PathBuf::from);

    let config = match PortalConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{}", error);
            std::process::exit(1);
        }
    };

    if let Err(error) = grievance_portal_lib::serve(config).await {
        eprintln!("{:#}", error);
        std::process::exit(1);
    }
}
