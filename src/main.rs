//! The llamascan binary: wires masscan discovery into the bounded
//! investigation engine and streams confirmed instances to the terminal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use log::{debug, warn};

use llamascan::engine::InvestigationEngine;
use llamascan::input::{Config, Opts};
use llamascan::probe::{ProbeClient, ServiceInstance};
use llamascan::scan::{OnLimit, ScanConfig, ScanError, ScanStream};
use llamascan::{detail, output, warning};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone());
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    let Some(range) = opts.range.clone() else {
        bail!("no target range specified; pass --range or set one in ~/.llamascan.toml");
    };

    let scan_config = ScanConfig {
        range,
        port: opts.port,
        max_rate: opts.max_rate,
        exclude_file: opts.exclude_file.clone(),
        limit: opts.limit,
        on_limit: if opts.keep_scanner {
            OnLimit::Detach
        } else {
            OnLimit::Kill
        },
    };

    let prober = Arc::new(ProbeClient::new(Duration::from_millis(u64::from(
        opts.timeout,
    )))?);
    let mut engine = InvestigationEngine::new(prober, opts.concurrency);
    engine.start()?;

    let mut stream = match ScanStream::spawn(&scan_config) {
        Ok(stream) => stream,
        Err(ScanError::BinaryNotFound) => {
            bail!("masscan was not found on PATH; install it (e.g. apt install masscan) and retry")
        }
        Err(e) => bail!(e),
    };

    output!(
        format!(
            "Sweeping {} for port {} (max rate {} pps)",
            scan_config.range, scan_config.port, scan_config.max_rate
        ),
        opts.greppable,
        opts.accessible
    );

    let mut discovered = 0usize;
    let mut matched = 0usize;
    let mut scan_failure: Option<ScanError> = None;

    // Discovery and investigation overlap here: every host is handed to the
    // engine the moment it is parsed, and whatever results are ready get
    // reported on the way through.
    loop {
        match stream.next_host().await {
            Ok(Some(host)) => {
                discovered += 1;
                detail!(
                    format!("Discovered {}:{}", host.address, host.port),
                    opts.greppable,
                    opts.accessible
                );
                engine.add_host(host)?;
                matched += report(engine.drain(), &opts);
            }
            Ok(None) => break,
            Err(e) => {
                scan_failure = Some(e);
                break;
            }
        }
    }

    // Terminal scan errors still let in-flight probes finish; partial
    // results are worth reporting either way.
    engine.stop().await;
    matched += report(engine.drain(), &opts);

    output!(
        format!("{discovered} hosts discovered, {matched} confirmed Ollama instances"),
        opts.greppable,
        opts.accessible
    );

    match scan_failure {
        None => Ok(()),
        Some(ScanError::PermissionDenied) => {
            warning!(
                "masscan needs raw-socket privileges; rerun as root or grant CAP_NET_RAW",
                opts.greppable,
                opts.accessible
            );
            Err(ScanError::PermissionDenied.into())
        }
        Some(e) => {
            warning!(format!("scan aborted: {e}"), opts.greppable, opts.accessible);
            Err(e.into())
        }
    }
}

/// Prints a batch of confirmed instances and returns how many there were.
fn report(instances: Vec<ServiceInstance>, opts: &Opts) -> usize {
    let count = instances.len();
    for instance in instances {
        if opts.greppable {
            match serde_json::to_string(&instance) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("could not serialize result: {e}"),
            }
        } else {
            output!(
                format!(
                    "{}:{} runs Ollama {} with {} models",
                    instance.address,
                    instance.port,
                    instance.version,
                    instance.models.len()
                ),
                opts.greppable,
                opts.accessible
            );
        }
    }
    count
}
