//! Mirror a glob into a directory and keep it in sync
//!
//! ```text
//! cargo run -p cpx-watcher --example mirror -- 'src/**/*.txt' out
//! cargo run -p cpx-watcher --example mirror -- --config mirror.toml
//! ```

use anyhow::{bail, Context, Result};
use cpx_core::MirrorConfig;
use cpx_watcher::{WatchEvent, WatchOptions, Watcher};
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;

fn parse_args() -> Result<MirrorConfig> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [flag, path] if flag == "--config" => {
            MirrorConfig::load(Path::new(path)).with_context(|| format!("loading {}", path))
        }
        [source, dest] => Ok(MirrorConfig::new(source.as_str(), dest.as_str())),
        _ => bail!("usage: mirror <glob> <dest> | mirror --config <file>"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = parse_args()?;
    let cwd = std::env::current_dir()?;
    let watcher = Watcher::new(WatchOptions::from_config(config, cwd)?)?;
    let mut events = watcher.subscribe();

    watcher.open().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(WatchEvent::Ready) => println!("Watching..."),
                Ok(WatchEvent::Copy { src, dst }) => {
                    println!("Copied: {} --> {}", src.display(), dst.display())
                }
                Ok(WatchEvent::Remove { path }) => println!("Removed: {}", path.display()),
                Ok(WatchEvent::Error { message, .. }) => eprintln!("error: {}", message),
                Err(RecvError::Lagged(n)) => eprintln!("dropped {} events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    watcher.close();
    Ok(())
}
