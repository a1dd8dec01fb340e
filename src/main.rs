mod aggregator;
mod app;
mod capture;
mod config;
mod constants;
mod encoding;
mod engine;
mod error;
mod fade;
mod history;
mod logging;
mod mixer;
mod state;
mod ui;

use capture::Backend;
use clap::Parser;
use dialoguer::{Select, theme::ColorfulTheme};

fn list_devices(backend: Backend) -> Result<(), Box<dyn std::error::Error>> {
    let device_list = capture::list_devices(backend)?;

    if device_list.is_empty() {
        println!("No capture devices found.");
        return Ok(());
    }

    // Interactive selection
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a capture device")
        .items(&device_list)
        .default(0)
        .interact()?;

    println!("{}", device_list[selection]);

    Ok(())
}

fn load_settings(args: config::RunArgs) -> config::Settings {
    match config::Settings::resolve(args) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(app::ExitCode::Error as i32);
        }
    }
}

#[tokio::main]
async fn main() {
    use app::ExitCode;
    use config::{Args, Commands};

    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => {
            if let Err(e) = logging::init(logging::LogTarget::File) {
                eprintln!("Logging setup error: {}", e);
            }
            let settings_path = run_args.config.clone().or_else(config::Settings::default_path);
            let settings = load_settings(run_args);

            // Handle exit codes appropriately
            match app::App::new_with_settings(settings, settings_path) {
                Ok(app) => {
                    let run_result = app.run().await;
                    match run_result.result {
                        Ok(_) => {
                            std::process::exit(run_result.exit_code as i32);
                        }
                        Err(e) => {
                            eprintln!("Application error: {}", e);
                            std::process::exit(ExitCode::Error as i32);
                        }
                    }
                }
                Err(e) => {
                    eprintln!("Setup error: {}", e);
                    std::process::exit(ExitCode::Error as i32);
                }
            }
        }
        Commands::Headless(run_args) => {
            if let Err(e) = logging::init(logging::LogTarget::Stderr) {
                eprintln!("Logging setup error: {}", e);
            }
            let settings = load_settings(run_args);

            if let Err(e) = app::run_headless(settings).await {
                eprintln!("Error during monitoring: {}", e);
                std::process::exit(ExitCode::Error as i32);
            }
        }
        Commands::List(list_args) => {
            if let Err(e) = list_devices(list_args.backend) {
                eprintln!("Error listing devices: {}", e);
                std::process::exit(ExitCode::Error as i32);
            }
        }
    }
}
