//! Probes the local network for the devices named in a config file and
//! prints what answers.

use std::env;
use std::fs;
use std::process;

use miio_local::{DeviceManager, ManagerConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let path = match env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: miio-discover <config.json>");
            process::exit(2);
        }
    };

    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("failed to read {}: {}", path, e);
            process::exit(1);
        }
    };
    let config: ManagerConfig = match serde_json::from_str(&raw) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid config: {}", e);
            process::exit(1);
        }
    };

    let (manager, mut devices) = match DeviceManager::new(config) {
        Ok(wired) => wired,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    let handle = manager.handle();
    tokio::spawn(manager.run());

    let printer = tokio::spawn(async move {
        while let Some(device) = devices.recv().await {
            let info = device.base_info();
            println!(
                "found {} (id {}) at {}: model {} firmware {}",
                device.name(),
                device.id(),
                info.addr,
                device.model(),
                device
                    .detail()
                    .map(|d| d.fw_ver)
                    .unwrap_or_else(|| "unknown".to_string()),
            );
        }
    });

    match handle.discover().await {
        Ok(()) => println!("all configured devices found"),
        Err(e) => eprintln!("{}", e),
    }
    printer.abort();
}
