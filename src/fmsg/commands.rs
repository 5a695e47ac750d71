// Command handlers for the message host CLI

use crate::fmsg::*;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Execute a message host command
pub async fn execute_command(cli: FmsgCli) -> Result<()> {
    let config = cli.host.to_config().context("Invalid host configuration")?;
    std::fs::create_dir_all(&config.data_dir).context("Failed to create data directory")?;

    let host = Arc::new(Host::new(config)?);

    match cli.command {
        FmsgCommand::Serve => handle_serve(host).await,
        FmsgCommand::Send {
            from,
            to,
            topic,
            mime_type,
            important,
            no_reply,
            no_challenge,
            to_port,
            body,
        } => {
            let mut message = build_message(&from, &to, topic, &mime_type, body)?;
            if important {
                message.set_important();
            }
            if no_reply {
                message.set_no_reply();
            }
            if no_challenge {
                message.set_no_challenge();
            }
            let port = to_port.unwrap_or(host.config().remote_port);
            handle_send(host, message, port).await
        }
    }
}

fn build_message(
    from: &str,
    to: &[String],
    topic: Option<String>,
    mime_type: &str,
    body: PathBuf,
) -> Result<Message> {
    let to: Vec<&str> = to.iter().map(String::as_str).collect();
    let mut message = Message::parse(from, &to)?;
    message.set_topic(topic);
    message
        .set_body(mime_type, &body)
        .with_context(|| format!("Failed to use body {}", body.display()))?;
    message.set_timestamp(chrono::Utc::now().timestamp());
    Ok(message)
}

async fn handle_serve(host: Arc<Host>) -> Result<()> {
    println!("Serving {} on port {}", host.config().domain, host.config().port);
    println!("  Data directory: {}", host.config().data_dir.display());

    let listener = host.bind().await.context("Failed to bind listener")?;
    let server = tokio::spawn(Arc::clone(&host).serve(listener));

    println!("\nPress Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    println!("\nStopping...");
    host.stop()?;
    server.await.context("Listener task failed")??;

    Ok(())
}

async fn handle_send(host: Arc<Host>, message: Message, port: u16) -> Result<()> {
    // Keep listening while sending so receivers can challenge us
    let listener = host.bind().await.context("Failed to bind listener")?;
    let server = tokio::spawn(Arc::clone(&host).serve(listener));

    let result = host.send(Arc::new(message), port).await;

    host.stop()?;
    server.await.context("Listener task failed")??;

    let reports = result.context("Failed to send message")?;
    for report in &reports {
        match &report.outcome {
            DeliveryOutcome::Delivered(codes) => {
                println!("✓ {}", report.domain);
                for (addr, code) in codes {
                    println!("    {}\t{}", addr, code);
                }
            }
            DeliveryOutcome::Rejected(code) => {
                println!("✗ {}: rejected ({})", report.domain, code);
            }
            DeliveryOutcome::Failed(reason) => {
                println!("✗ {}: {}", report.domain, reason);
            }
        }
    }

    Ok(())
}
