/**
 * CLUSTIL VIEWER - command line client of the fleet dashboard
 *
 * ROLE: mirrors the fleet from the kernel's event stream (or the legacy
 * status server) and edits device memos from stdin:
 *   list | edit <node>/<device> <text> | submit <node>/<device>
 *   cancel <node>/<device> | quit
 */

use anyhow::Context;
use clap::Parser;
use clustil_viewer::config::{Args, Mode};
use clustil_viewer::console::{parse_command, render, Command};
use clustil_viewer::legacy::{spawn_legacy_source, LegacyAdapter, LegacyAnnotationWriter};
use clustil_viewer::{
    spawn_stream, AnnotationWriter, EditController, HttpAnnotationWriter, StreamHandle, SubmitOutcome, Viewer,
    RECONNECT_DELAY,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn start(args: &Args, viewer: &clustil_viewer::SharedViewer) -> anyhow::Result<(StreamHandle, Arc<dyn AnnotationWriter>)> {
    match args.mode {
        Mode::Api => {
            let client = reqwest::Client::new();
            let handle = spawn_stream(client.clone(), args.stream_url(), viewer.clone(), RECONNECT_DELAY);
            let writer = HttpAnnotationWriter::new(client, &args.host);
            Ok((handle, Arc::new(writer)))
        }
        Mode::Legacy => {
            // the legacy form endpoint answers with a redirect that counts as success
            let client = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .context("failed to build HTTP client")?;
            let adapter = LegacyAdapter::new().context("failed to build legacy adapter")?.shared();
            let handle = spawn_legacy_source(
                client.clone(),
                &args.host,
                viewer.clone(),
                adapter.clone(),
                RECONNECT_DELAY,
            );
            let writer = LegacyAnnotationWriter::new(client, &args.host, adapter);
            Ok((handle, Arc::new(writer)))
        }
    }
}

async fn next_dump(dump: &mut Option<tokio::time::Interval>) {
    match dump {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clustil_viewer=info")),
        )
        .init();

    let args = Args::parse();
    let viewer = Viewer::new(args.editor_name()).shared();
    let (handle, writer) = start(&args, &viewer)?;
    let controller = EditController::new(viewer.clone(), writer);
    info!("viewer started: host={} mode={:?}", args.host, args.mode);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut dump = (args.print_secs > 0).then(|| tokio::time::interval(Duration::from_secs(args.print_secs)));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = next_dump(&mut dump) => {
                print!("{}", render(&viewer.lock()));
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else { break };
                let command = match parse_command(&line) {
                    None => continue,
                    Some(Ok(command)) => command,
                    Some(Err(e)) => {
                        warn!("{e}");
                        continue;
                    }
                };
                match command {
                    Command::List => print!("{}", render(&viewer.lock())),
                    Command::Edit(key, text) => {
                        let state = viewer.lock().input(&key, text);
                        println!("{key}: {state}");
                    }
                    Command::Submit(key) => {
                        let controller = controller.clone();
                        tokio::spawn(async move {
                            match controller.submit(&key).await {
                                SubmitOutcome::Ignored => println!("{key}: nothing to submit"),
                                SubmitOutcome::Saved(state) => println!("{key}: saved ({state})"),
                                SubmitOutcome::Failed(e) => println!("{key}: save failed: {e}"),
                            }
                        });
                    }
                    Command::Cancel(key) => {
                        if !viewer.lock().cancel(&key) {
                            println!("{key}: cannot cancel");
                        }
                    }
                    Command::Quit => break,
                }
            }
        }
    }

    handle.close();
    info!("viewer stopped");
    Ok(())
}
