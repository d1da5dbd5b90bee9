use anyhow::Result;
use lezgi_translator::config::Config;
use lezgi_translator::controller::{LoadStatus, WorkerController};
use lezgi_translator::pipeline::HubPipelineFactory;
use lezgi_translator::protocol::{WorkerEvent, WorkerRequest};
use lezgi_translator::telemetry::{self, Console};
use lezgi_translator::worker::{SignatureClassifier, WorkerSpawner};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    let stdio = std::env::args().skip(1).any(|arg| arg == "--stdio");

    let config = Config::load()?;
    let console = if stdio { Console::Stderr } else { Console::Stdout };
    telemetry::init(&config.telemetry, console)?;
    tracing::info!(model = %config.model.id, stdio, "lezgi-translator starting");

    let factory = HubPipelineFactory::new(config.hub_settings()?)?;
    let spawner = WorkerSpawner::new(
        Arc::new(factory),
        Arc::new(SignatureClassifier::default()),
        config.worker_settings(),
    );

    if stdio {
        serve_stdio(&spawner).await
    } else {
        run_interactive(spawner, &config).await
    }
}

/// Expose the raw worker protocol as JSON lines on stdin/stdout
async fn serve_stdio(spawner: &WorkerSpawner) -> Result<()> {
    let mut worker = spawner.spawn();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match WorkerRequest::from_json(&line) {
                    Ok(request) => {
                        if !worker.send(request) {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "rejected malformed request");
                        let event = WorkerEvent::Error { error: e.to_string() };
                        println!("{}", event.to_json()?);
                    }
                }
            }
            event = worker.recv() => {
                let Some(event) = event else { break };
                println!("{}", event.to_json()?);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    worker.terminate();
    Ok(())
}

/// Line-based front end over the controller
async fn run_interactive(spawner: WorkerSpawner, config: &Config) -> Result<()> {
    let mut controller =
        WorkerController::new(spawner, config.languages.source, config.languages.target);
    controller.initialize();

    println!("Lezgi translator ({})", config.model.id);
    println!("Commands: :load  :cancel  :swap  :status  :quit. Any other line is translated.");
    print_languages(&controller);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_command(&mut controller, line.trim()) {
                    break;
                }
            }
            Some(event) = controller.process_next() => {
                report_event(&controller, &event);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    println!("\nShutting down...");
    controller.shutdown();
    Ok(())
}

/// Returns false when the user asked to quit
fn handle_command(controller: &mut WorkerController, line: &str) -> bool {
    match line {
        "" => {}
        ":quit" | ":q" => return false,
        ":load" => match controller.request_load() {
            Ok(()) => println!("Downloading model..."),
            Err(e) => println!("✗ {e}"),
        },
        ":cancel" => {
            controller.cancel_load();
            println!("Load cancelled, worker restarted");
        }
        ":swap" => {
            controller.swap_languages();
            print_languages(controller);
        }
        ":status" => print_status(controller),
        text => {
            controller.set_source_text(text);
            if let Err(e) = controller.request_translation() {
                println!("✗ {e}");
            }
        }
    }
    true
}

fn report_event(controller: &WorkerController, event: &WorkerEvent) {
    match event {
        WorkerEvent::Progress { .. } => {
            println!("  downloading: {:.1}%", controller.overall_percent());
        }
        WorkerEvent::Ready => println!("✓ Model ready"),
        WorkerEvent::Complete { output } => println!("→ {output}"),
        WorkerEvent::Error { error } => println!("✗ {error}"),
    }
}

fn print_languages(controller: &WorkerController) {
    println!(
        "{} ({}) → {} ({})",
        controller.source_lang().display_name(),
        controller.source_lang(),
        controller.target_lang().display_name(),
        controller.target_lang()
    );
}

fn print_status(controller: &WorkerController) {
    let status = match controller.status() {
        LoadStatus::Idle => "idle",
        LoadStatus::Downloading => "downloading",
        LoadStatus::Ready => "ready",
    };
    println!(
        "model: {status}, translating: {}, overall: {:.1}%",
        controller.is_translating(),
        controller.overall_percent()
    );
    for (file, record) in controller.progress().records() {
        println!(
            "  {file}: {}/{} bytes ({:.1}%)",
            record.loaded, record.total, record.percent
        );
    }
    if let Some(error) = controller.last_error() {
        println!("last error: {error}");
    }
}
