use crate::error::Error;
use crate::signals::{SignalEvent, wait_for_signal};
use config::Config;
use engine::{Engine, TracingSink, clock::SystemClock};
use humansize::{BINARY, format_size};
use itertools::Itertools;
use probe::{MetricReader, ProcessSample};
use std::{fmt::Write, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) async fn run(config: Config) -> Result<(), Error> {
    let reader = Arc::new(MetricReader::new(&config.engine)?);
    info!(source = %reader.source_name(), "process source selected");

    let sink = Arc::new(TracingSink);
    let engine = Engine::new(
        &config,
        reader,
        sink.clone(),
        sink,
        Arc::new(SystemClock),
    )?;
    if engine.processes().is_empty() {
        warn!("no processes configured");
    }

    let cancel = CancellationToken::new();
    let (events_tx, events_rx) = flume::bounded(8);
    let supervising = engine.run_until(cancel.clone());
    tokio::pin!(supervising);

    loop {
        tokio::select! {
            res = &mut supervising => return Ok(res?),
            res = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                res.map_err(Error::SignalHandler)?;
                info!("interrupted, shutting down");
                cancel.cancel();
            }
            err = wait_for_signal(&events_tx) => {
                error!(error = ?err, "Error while waiting for signal");
                err?;
            }
            res = events_rx.recv_async() => {
                if let Ok(event) = res {
                    debug!(?event, "Received signal event");
                    handle_signal(&engine, event);
                }
            }
        }
    }
}

fn handle_signal(engine: &Engine, event: SignalEvent) {
    match event {
        SignalEvent::DumpChildren => {
            for process in engine.snapshot() {
                info!(
                    process = %process.process,
                    pid = process.pid,
                    children = %process.children.iter().map(|child| child.pid).join(", "),
                    "children"
                );
                for child in &process.children {
                    info!(
                        parent = process.pid,
                        pid = child.pid,
                        watchers = ?child.watchers,
                        "child"
                    );
                }
            }
        }
        SignalEvent::Refresh => {
            info!("rescanning children");
            engine.force_refresh();
        }
    }
}

/// Print one sample. CPU usage is measured over `interval`.
#[allow(clippy::print_stdout)]
pub(crate) async fn probe(config: &Config, pid: u32, interval: Duration) -> Result<(), Error> {
    let reader = MetricReader::new(&config.engine)?;
    reader.cpu(pid)?;
    tokio::time::sleep(interval).await;
    let sample = reader.sample(pid)?;
    print!("{}", render_sample(&sample, &reader.source_name()));
    Ok(())
}

fn render_sample(sample: &ProcessSample, source: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "pid:      {}", sample.pid);
    let _ = writeln!(out, "source:   {source}");
    let _ = writeln!(out, "memory:   {}", format_size(sample.resident_bytes, BINARY));
    let _ = writeln!(out, "cpu:      {:.1}%", sample.cpu_percent * 100.0);
    let _ = writeln!(
        out,
        "cpu time: {} ms (user {} ms, system {} ms)",
        sample.cpu_total_ms, sample.cpu_user_ms, sample.cpu_sys_ms
    );
    let _ = writeln!(out, "started:  {} ms since epoch", sample.cpu_start_time_ms);
    let _ = writeln!(out, "args:     {}", sample.args.join(" "));
    out
}

#[allow(clippy::print_stdout)]
pub(crate) fn children(config: &Config, pid: u32) -> Result<(), Error> {
    let reader = MetricReader::new(&config.engine)?;
    for child in reader.children(pid) {
        println!("{child}");
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
pub(crate) fn show_config(config: &Config) -> Result<(), Error> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_a_sample() {
        let sample = ProcessSample {
            pid: 42,
            resident_bytes: 55 * 1024 * 1024,
            cpu_total_ms: 7000,
            cpu_user_ms: 5000,
            cpu_sys_ms: 2000,
            cpu_start_time_ms: 1_700_001_000_000,
            cpu_percent: 0.25,
            args: vec!["ruby".into(), "script.rb".into()],
        };
        assert_eq!(
            render_sample(&sample, "procfs"),
            "pid:      42\n\
             source:   procfs\n\
             memory:   55 MiB\n\
             cpu:      25.0%\n\
             cpu time: 7000 ms (user 5000 ms, system 2000 ms)\n\
             started:  1700001000000 ms since epoch\n\
             args:     ruby script.rb\n"
        );
    }
}
