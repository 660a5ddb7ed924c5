// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use texflight::texflight_config;
use texflight::texflight_logging::{self, error, info};
use texflight::{FlightServerOptions, ServiceError, TextRelevancyClassifier, start_flight_server};

const USAGE: &str = "Usage: texflight [--config <path>] [--host <host>] [--port <port>] \
[<vectorizer_path> <classifier_path>]";

#[derive(Debug, Default, PartialEq, Eq)]
struct CliArgs {
    config_path: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    vectorizer_path: Option<PathBuf>,
    classifier_path: Option<PathBuf>,
    help: bool,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut out = CliArgs::default();
    let mut positional = Vec::new();
    let mut idx = 1usize;
    while let Some(arg) = args.get(idx) {
        let mut value = |name: &str| -> Result<String, String> {
            idx += 1;
            args.get(idx)
                .cloned()
                .ok_or_else(|| format!("missing value for {name}"))
        };
        match arg.as_str() {
            "--config" | "-c" => out.config_path = Some(value("--config/-c")?),
            "--host" => out.host = Some(value("--host")?),
            "--port" | "-p" => {
                let raw = value("--port/-p")?;
                let port = raw
                    .parse::<u16>()
                    .map_err(|e| format!("invalid port '{raw}': {e}"))?;
                out.port = Some(port);
            }
            "--vectorizer" => out.vectorizer_path = Some(PathBuf::from(value("--vectorizer")?)),
            "--classifier" => out.classifier_path = Some(PathBuf::from(value("--classifier")?)),
            "--help" | "-h" => out.help = true,
            other if other.starts_with('-') => {
                return Err(format!("unknown arg: {other} (try --help)"));
            }
            other => positional.push(PathBuf::from(other)),
        }
        idx += 1;
    }
    match positional.len() {
        0 => {}
        2 => {
            let mut it = positional.into_iter();
            out.vectorizer_path = it.next();
            out.classifier_path = it.next();
        }
        n => {
            return Err(format!(
                "expected vectorizer and classifier paths, got {n} positional args"
            ));
        }
    }
    Ok(out)
}

fn exit_with(message: &str) -> ! {
    eprintln!("{message}");
    process::exit(1);
}

async fn serve(
    options: FlightServerOptions,
    classifier: Arc<TextRelevancyClassifier>,
) -> Result<(), ServiceError> {
    let handle = start_flight_server(options, classifier).await?;
    let controller = handle.shutdown_controller().clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\nReceived interrupt signal, shutting down...");
        controller.trigger();
    }) {
        error!(error = %e, "failed to install Ctrl-C handler");
    }
    println!("Flight Server:\tServing on {}", handle.location());
    handle.wait().await
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let cli = parse_args(&args).unwrap_or_else(|e| exit_with(&e));
    if cli.help {
        eprintln!("{USAGE}");
        eprintln!("  Model paths may also be set under [model] in texflight.toml.");
        return;
    }

    let cfg = match cli.config_path.as_deref() {
        Some(p) => texflight_config::init_from_path(p),
        None => texflight_config::init_from_env_or_default(),
    }
    .unwrap_or_else(|e| exit_with(&format!("load texflight config: {e:#}")));

    let filter = texflight_logging::filter_from_config(&cfg.log_level, cfg.log_filter.as_deref());
    texflight_logging::init_with_level(&filter);

    let mut options = cfg.flight_server_options();
    if let Some(host) = cli.host {
        options.host = host;
    }
    if let Some(port) = cli.port {
        options.port = port;
    }

    let (Some(vectorizer_path), Some(classifier_path)) = (
        cli.vectorizer_path.or_else(|| cfg.model.vectorizer_path.clone()),
        cli.classifier_path.or_else(|| cfg.model.classifier_path.clone()),
    ) else {
        exit_with(&format!("missing model artifact paths\n{USAGE}"));
    };

    let classifier = match TextRelevancyClassifier::load(&vectorizer_path, &classifier_path) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            error!(error = %e, "failed to load classification artifacts");
            exit_with(&format!("texflight failed to start: {e}"));
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(cfg.server.worker_threads.max(1))
        .thread_name("texflight-flight")
        .build()
        .unwrap_or_else(|e| exit_with(&format!("build flight runtime: {e}")));

    let result = runtime.block_on(serve(options, classifier));

    match result {
        Ok(()) => {
            info!("texflight stopped");
            println!("Flight Server:\tstopped");
        }
        Err(e) => {
            error!(error = %e, "texflight exited with error");
            exit_with(&format!("texflight failed: {e}"));
        }
    }
}
