//! Command implementations

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::app::{AppContainer, ClientEvent};
use crate::domain::model::VideoEntry;
use crate::utils::format_file_size;

/// Execute the serve command: prepare the catalog, start the server and run
/// the console until `exit` or Ctrl-C
pub async fn serve(container: AppContainer) -> Result<()> {
    let encoder = container.encoder();
    info!("Checking for {}", encoder.program());
    if !encoder.check_available().await {
        anyhow::bail!(
            "{} was not found. Install it and make sure that it is on the PATH",
            encoder.program()
        );
    }

    let catalog = container.catalog();
    catalog
        .ensure_directories()
        .context("Failed to create the video directories")?;

    let entries = catalog.scan();
    println!("Videos in {}:", catalog.source_dir().display());
    print_entries(&entries);

    let server = container.server(catalog.clone());
    let addr = server
        .start(container.config().server.port)
        .await
        .context("Failed to start the streaming server")?;
    println!("Server listening on {} (commands: list, refresh, exit)", addr);

    let mut input = stdin_lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            line = input.next_line() => match line {
                Ok(Some(line)) => match line.trim() {
                    "" => {}
                    "list" => print_entries(&catalog.scan()),
                    "refresh" => println!("{} videos available", catalog.scan().len()),
                    "exit" | "quit" => break,
                    other => println!("Unknown command '{}'. Commands: list, refresh, exit", other),
                },
                Ok(None) => {
                    // stdin closed; keep serving until interrupted
                    tokio::signal::ctrl_c()
                        .await
                        .context("Failed to wait for Ctrl-C")?;
                    break;
                }
                Err(e) => {
                    error!("Failed to read from stdin: {}", e);
                    break;
                }
            },
        }
    }

    server.stop().await;
    encoder.shutdown().await;
    println!("Server stopped");
    Ok(())
}

/// Execute the connect command: connect, then run the console until `exit`
pub async fn connect(container: AppContainer) -> Result<()> {
    let (client, events) = container
        .client()
        .context("Failed to set up the streaming client")?;
    let address = container.config().client.server_address.clone();
    let port = container.config().client.server_port;

    println!("Measuring the connection speed and connecting to {}:{}...", address, port);
    client
        .connect(&address, port)
        .await
        .with_context(|| format!("Failed to connect to {}:{}", address, port))?;
    println!(
        "Connected at {:.2} Mbps (commands: list, play <file>, stop, exit)",
        client.speed_mbps()
    );

    let printer = tokio::spawn(print_events(events));

    let mut input = stdin_lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = input.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read from stdin: {}", e);
                        break;
                    }
                };
                if !client.is_connected() {
                    println!("The server closed the connection");
                    break;
                }

                let (command, argument) = match line.trim().split_once(char::is_whitespace) {
                    Some((command, argument)) => (command, argument.trim()),
                    None => (line.trim(), ""),
                };
                let result = match command {
                    "" => Ok(()),
                    "list" => client.request_video_list().await,
                    "play" if argument.is_empty() => {
                        println!("Usage: play <file>");
                        Ok(())
                    }
                    "play" => client.request_stream(argument).await,
                    "stop" => client.stop_streaming().await,
                    "exit" | "quit" => break,
                    other => {
                        println!("Unknown command '{}'. Commands: list, play <file>, stop, exit", other);
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    warn!("Command failed: {}", e);
                }
            }
        }
    }

    client.disconnect().await;
    container.encoder().shutdown().await;
    drop(client);
    if printer.await.is_err() {
        warn!("Event printer ended abnormally");
    }
    Ok(())
}

fn stdin_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}

fn print_entries(entries: &[VideoEntry]) {
    if entries.is_empty() {
        println!("  (no videos)");
        return;
    }
    for entry in entries {
        println!("  {} ({})", entry.file_name, format_file_size(entry.file_size));
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<ClientEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::VideoList(entries) => {
                println!("Available videos:");
                print_entries(&entries);
            }
            ClientEvent::StreamReady(profile) => println!("Playing {}", profile),
            ClientEvent::StreamError(reason) => println!("Error: {}", reason),
            ClientEvent::ServerInfo(text) => println!("{}", text),
            // already logged by the supervisor
            ClientEvent::PlayerOutput(_) => {}
            ClientEvent::Disconnected => {
                println!("Disconnected");
                break;
            }
        }
    }
}
