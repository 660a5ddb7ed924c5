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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{ArrayRef, AsArray, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::{FlightClient, FlightDescriptor};
use futures::{TryStreamExt, stream};
use tempfile::TempDir;
use tonic::transport::Channel;

use texflight::service::action::ComputeSlots;
use texflight::texflight_config;
use texflight::texflight_logging;
use texflight::{
    Classifier, Dataset, FlightServerHandle, FlightServerOptions, ServiceError,
    start_flight_server,
};

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a config file pointing at model artifacts inside the temp dir.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_texflight.toml");
        let vectorizer_path = temp_dir.path().join("vectorizer.json");
        let classifier_path = temp_dir.path().join("classifier.json");

        std::fs::write(
            &vectorizer_path,
            r#"{"vocabulary": {"great": 0, "bad": 1, "product": 2}}"#,
        )?;
        std::fs::write(
            &classifier_path,
            r#"{"classes": ["irrelevant", "relevant"], "coef": [[1.5, -2.0, 0.1]], "intercept": [-0.5]}"#,
        )?;

        let config_content = format!(
            r#"
log_level = "debug"

[server]
host = "127.0.0.1"
port = 0
shutdown_grace_ms = 200

[model]
vectorizer_path = "{}"
classifier_path = "{}"
"#,
            vectorizer_path.display(),
            classifier_path.display()
        );
        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        texflight_logging::init_with_level("info,texflight=debug");
    }

    /// Load the test configuration.
    pub fn load_config(&self) -> anyhow::Result<&'static texflight_config::TexFlightConfig> {
        texflight_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Predicts "1" for rows mentioning "great", "0" otherwise, after an
/// optional delay.
pub struct KeywordClassifier {
    pub delay: Duration,
}

impl Classifier for KeywordClassifier {
    fn classify(&self, dataset: &Dataset) -> Result<ArrayRef, ServiceError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let mut out = Vec::with_capacity(dataset.num_rows());
        for batch in dataset.batches() {
            let texts = batch
                .column_by_name("text")
                .ok_or_else(|| ServiceError::pipeline("no text column"))?
                .as_string::<i32>();
            for text in texts.iter() {
                let hit = text.is_some_and(|t| t.contains("great"));
                out.push(if hit { "1" } else { "0" });
            }
        }
        Ok(Arc::new(StringArray::from(out)))
    }
}

pub struct FailingClassifier;

impl Classifier for FailingClassifier {
    fn classify(&self, _dataset: &Dataset) -> Result<ArrayRef, ServiceError> {
        Err(ServiceError::pipeline("model artifact is corrupt"))
    }
}

pub fn test_options(shutdown_grace: Duration) -> FlightServerOptions {
    FlightServerOptions {
        host: "127.0.0.1".to_string(),
        port: 0,
        advertise_host: None,
        shutdown_grace,
        slots: ComputeSlots::default(),
        ..FlightServerOptions::default()
    }
}

pub async fn start_server(classifier: Arc<dyn Classifier>) -> FlightServerHandle {
    start_flight_server(test_options(Duration::from_millis(300)), classifier)
        .await
        .expect("start flight server")
}

pub async fn connect(addr: SocketAddr) -> FlightClient {
    let channel = Channel::from_shared(format!("http://{addr}"))
        .expect("valid endpoint")
        .connect()
        .await
        .expect("connect to flight server");
    FlightClient::new(channel)
}

pub fn input_descriptor() -> FlightDescriptor {
    FlightDescriptor::new_path(vec!["ToPython".to_string()])
}

pub fn output_descriptor() -> FlightDescriptor {
    FlightDescriptor::new_path(vec!["FromPython".to_string()])
}

/// The three-row review dataset used across scenarios.
pub fn review_batch() -> RecordBatch {
    RecordBatch::try_from_iter(vec![
        (
            "text",
            Arc::new(StringArray::from(vec!["great product", "bad product", "ok"])) as ArrayRef,
        ),
        ("label", Arc::new(Int64Array::from(vec![1, 0, 1])) as ArrayRef),
    ])
    .expect("build review batch")
}

pub async fn upload(
    client: &mut FlightClient,
    descriptor: FlightDescriptor,
    batches: Vec<RecordBatch>,
) -> Result<(), FlightError> {
    let data = FlightDataEncoderBuilder::new()
        .with_flight_descriptor(Some(descriptor))
        .build(stream::iter(batches.into_iter().map(Ok)));
    client.do_put(data).await?.try_collect::<Vec<_>>().await?;
    Ok(())
}

/// gRPC status code carried by a client-side flight error.
pub fn status_code(err: &FlightError) -> Option<tonic::Code> {
    match err {
        FlightError::Tonic(status) => Some(status.code()),
        _ => None,
    }
}

pub fn status_message(err: &FlightError) -> String {
    match err {
        FlightError::Tonic(status) => status.message().to_string(),
        other => other.to_string(),
    }
}

/// Wait for a condition to become true, with timeout.
pub async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
