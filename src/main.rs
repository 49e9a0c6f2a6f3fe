use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use treewatch::cli::Cli;
use treewatch::watcher::{Dispatcher, InotifySource, TreeWalker, WatchError, WatchTable};
use treewatch::{EventSink, Settings, WriterSink};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = Settings::load(cli.config.as_deref()).context("invalid configuration")?;
    cli.apply(&mut settings);

    if cli.print_config {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }

    treewatch::logging::init_with_config(&settings.logging);

    if !cli.extra.is_empty() {
        treewatch::warn_event!("cli", "ignoring extra arguments", "{}", cli.extra.join(" "));
    }
    if settings.root == Path::new("/") {
        treewatch::warn_event!("cli", "watching the whole filesystem; pass a ROOT to limit the watch set");
    }

    let root = std::fs::canonicalize(&settings.root).map_err(|e| WatchError::RootUnreadable {
        path: settings.root.clone(),
        reason: e.to_string(),
    })?;

    let source = InotifySource::init()?;
    let mut table = WatchTable::new(source);
    let walker = TreeWalker::new().with_exclude(&settings.watch.exclude);
    let stats = walker.populate(&root, &mut table)?;
    treewatch::log_event!(
        "treewatch",
        "watching",
        "{} ({} directories, {} skipped)",
        root.display(),
        stats.watched,
        stats.skipped
    );

    let format = settings.sink.format;
    let sink: Box<dyn EventSink> = match &settings.sink.output {
        Some(path) => Box::new(
            WriterSink::append_to(path, format)
                .with_context(|| format!("cannot open event log {}", path.display()))?,
        ),
        None => Box::new(WriterSink::stdout(format)),
    };

    let mut dispatcher =
        Dispatcher::new(table, walker, sink).with_buffer_size(settings.watch.buffer_size);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        treewatch::log_event!("treewatch", "shutting down");
        shutdown.cancel();
    });

    dispatcher.run(cancel).await?;
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            treewatch::warn_event!("treewatch", "cannot listen for ctrl+c", "{e}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                treewatch::warn_event!("treewatch", "cannot listen for SIGTERM", "{e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
