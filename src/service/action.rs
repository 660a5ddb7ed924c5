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
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use arrow_flight::ActionType;
use bytes::Bytes;

use crate::classify::{Classifier, predictions_to_dataset};
use crate::common::status::ServiceError;
use crate::common::types::RegistryKey;
use crate::runtime::dataset_registry::DatasetRegistry;
use crate::texflight_logging::{info, warn};

pub const COMPUTE_ACK: &[u8] = b"Success!";
pub const HEALTHCHECK_ACK: &[u8] = b"Flight Server is up and running!";
pub const SHUTDOWN_ACK: &[u8] = b"Flight Server is shut down!";

/// Named remote actions. Anything else is kept verbatim as `Unknown`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Compute,
    Healthcheck,
    Shutdown,
    Unknown(String),
}

impl Action {
    pub const KNOWN: [Action; 3] = [Action::Compute, Action::Healthcheck, Action::Shutdown];

    pub fn parse(name: &str) -> Self {
        match name {
            "compute" => Action::Compute,
            "healthcheck" => Action::Healthcheck,
            "shutdown" => Action::Shutdown,
            other => Action::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Action::Compute => "compute",
            Action::Healthcheck => "healthcheck",
            Action::Shutdown => "shutdown",
            Action::Unknown(name) => name,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Action::Compute => {
                "Classify the dataset in the input slot and store predictions in the output slot"
            }
            Action::Healthcheck => "Report that the server is up",
            Action::Shutdown => "Acknowledge, then stop accepting connections",
            Action::Unknown(_) => "",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Work the caller must run after the response has been handed back.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PostAction {
    None,
    Terminate,
}

#[derive(Clone, Debug)]
pub struct ActionOutcome {
    pub body: Bytes,
    pub post: PostAction,
}

impl ActionOutcome {
    fn reply(body: &'static [u8]) -> Self {
        Self {
            body: Bytes::from_static(body),
            post: PostAction::None,
        }
    }
}

/// Fixed registry keys `compute` reads from and writes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputeSlots {
    pub input: RegistryKey,
    pub output: RegistryKey,
}

impl ComputeSlots {
    pub fn new(input: &str, output: &str) -> Self {
        Self {
            input: RegistryKey::for_path([input]),
            output: RegistryKey::for_path([output]),
        }
    }
}

impl Default for ComputeSlots {
    fn default() -> Self {
        Self::new("ToPython", "FromPython")
    }
}

pub struct ActionDispatcher {
    registry: Arc<DatasetRegistry>,
    classifier: Arc<dyn Classifier>,
    slots: ComputeSlots,
}

impl ActionDispatcher {
    pub fn new(
        registry: Arc<DatasetRegistry>,
        classifier: Arc<dyn Classifier>,
        slots: ComputeSlots,
    ) -> Self {
        Self {
            registry,
            classifier,
            slots,
        }
    }

    pub fn slots(&self) -> &ComputeSlots {
        &self.slots
    }

    pub fn action_types() -> Vec<ActionType> {
        Action::KNOWN
            .iter()
            .map(|action| ActionType {
                r#type: action.name().to_string(),
                description: action.description().to_string(),
            })
            .collect()
    }

    /// Runs one action. The action body is accepted and ignored.
    pub async fn dispatch(&self, action: &Action) -> Result<ActionOutcome, ServiceError> {
        match action {
            Action::Compute => self.compute().await,
            Action::Healthcheck => Ok(ActionOutcome::reply(HEALTHCHECK_ACK)),
            Action::Shutdown => Ok(ActionOutcome {
                body: Bytes::from_static(SHUTDOWN_ACK),
                post: PostAction::Terminate,
            }),
            Action::Unknown(name) => Err(ServiceError::unknown_action(name)),
        }
    }

    /// Consumes the input slot, classifies it and stores the predictions.
    ///
    /// The input is claimed atomically so concurrent calls race for it; the
    /// loser sees `NotFound`. On pipeline failure the input goes back into its
    /// slot unless a newer upload already took that place.
    async fn compute(&self) -> Result<ActionOutcome, ServiceError> {
        let input = self.registry.take(&self.slots.input)?;
        let started = Instant::now();
        let rows = input.num_rows();

        let classifier = Arc::clone(&self.classifier);
        let dataset = Arc::clone(&input);
        let result = tokio::task::spawn_blocking(move || {
            let predictions = classifier.classify(&dataset)?;
            predictions_to_dataset(dataset.num_rows(), predictions)
        })
        .await
        .map_err(|e| ServiceError::pipeline(format!("classification task failed: {e}")))
        .and_then(|r| r);

        match result {
            Ok(output) => {
                self.registry
                    .put(self.slots.output.clone(), Arc::new(output));
                info!(
                    target: "texflight::flight",
                    input = %self.slots.input,
                    output = %self.slots.output,
                    rows,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "compute finished"
                );
                Ok(ActionOutcome::reply(COMPUTE_ACK))
            }
            Err(err) => {
                let restored = self.registry.restore(self.slots.input.clone(), input);
                warn!(
                    target: "texflight::flight",
                    input = %self.slots.input,
                    rows,
                    restored,
                    error = %err,
                    "compute failed"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use arrow::array::{Array, ArrayRef, AsArray, Int32Array, StringArray};
    use arrow::record_batch::RecordBatch;

    use super::{
        Action, ActionDispatcher, COMPUTE_ACK, ComputeSlots, HEALTHCHECK_ACK, PostAction,
        SHUTDOWN_ACK,
    };
    use crate::classify::{Classifier, PREDICTION_COLUMN};
    use crate::common::status::{ServiceError, ServiceErrorKind};
    use crate::common::types::Dataset;
    use crate::runtime::dataset_registry::DatasetRegistry;

    struct LengthClassifier;

    impl Classifier for LengthClassifier {
        fn classify(&self, dataset: &Dataset) -> Result<ArrayRef, ServiceError> {
            let mut out = Vec::new();
            for batch in dataset.batches() {
                let texts = batch.column(0).as_string::<i32>();
                for row in 0..texts.len() {
                    out.push(texts.value(row).len() as i32);
                }
            }
            Ok(Arc::new(Int32Array::from(out)))
        }
    }

    struct FailingClassifier(AtomicUsize);

    impl Classifier for FailingClassifier {
        fn classify(&self, _dataset: &Dataset) -> Result<ArrayRef, ServiceError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::pipeline("model exploded"))
        }
    }

    fn text_dataset(texts: Vec<&str>) -> Arc<Dataset> {
        let batch =
            RecordBatch::try_from_iter(vec![("text", Arc::new(StringArray::from(texts)) as _)])
                .unwrap();
        Arc::new(Dataset::from_batch(batch))
    }

    fn dispatcher(classifier: Arc<dyn Classifier>) -> (Arc<DatasetRegistry>, ActionDispatcher) {
        let registry = Arc::new(DatasetRegistry::new());
        let dispatcher =
            ActionDispatcher::new(Arc::clone(&registry), classifier, ComputeSlots::default());
        (registry, dispatcher)
    }

    #[test]
    fn parse_is_closed_over_known_names() {
        assert_eq!(Action::parse("compute"), Action::Compute);
        assert_eq!(Action::parse("healthcheck"), Action::Healthcheck);
        assert_eq!(Action::parse("shutdown"), Action::Shutdown);
        assert_eq!(Action::parse("Compute"), Action::Unknown("Compute".to_string()));
    }

    #[test]
    fn action_types_list_the_known_actions() {
        let names: Vec<_> = ActionDispatcher::action_types()
            .into_iter()
            .map(|a| a.r#type)
            .collect();
        assert_eq!(names, vec!["compute", "healthcheck", "shutdown"]);
    }

    #[tokio::test]
    async fn compute_consumes_input_and_writes_output() {
        let (registry, dispatcher) = dispatcher(Arc::new(LengthClassifier));
        let slots = dispatcher.slots().clone();
        registry.put(slots.input.clone(), text_dataset(vec!["great product", "bad", "ok"]));

        let outcome = dispatcher.dispatch(&Action::Compute).await.unwrap();
        assert_eq!(outcome.body.as_ref(), COMPUTE_ACK);
        assert_eq!(outcome.post, PostAction::None);

        let err = registry.get(&slots.input).expect_err("input consumed");
        assert_eq!(err.kind, ServiceErrorKind::NotFound);
        let output = registry.get(&slots.output).unwrap();
        assert_eq!(output.num_rows(), 3);
        assert_eq!(output.schema().field(0).name(), PREDICTION_COLUMN);

        let err = dispatcher
            .dispatch(&Action::Compute)
            .await
            .expect_err("second compute without upload");
        assert_eq!(err.kind, ServiceErrorKind::NotFound);
    }

    #[tokio::test]
    async fn compute_without_upload_is_not_found() {
        let (_registry, dispatcher) = dispatcher(Arc::new(LengthClassifier));
        let err = dispatcher
            .dispatch(&Action::Compute)
            .await
            .expect_err("no input");
        assert_eq!(err.kind, ServiceErrorKind::NotFound);
    }

    #[tokio::test]
    async fn pipeline_failure_keeps_the_input() {
        let classifier = Arc::new(FailingClassifier(AtomicUsize::new(0)));
        let (registry, dispatcher) = dispatcher(classifier.clone());
        let slots = dispatcher.slots().clone();
        registry.put(slots.input.clone(), text_dataset(vec!["a", "b"]));

        let err = dispatcher
            .dispatch(&Action::Compute)
            .await
            .expect_err("pipeline failure");
        assert_eq!(err.kind, ServiceErrorKind::PipelineFailure);
        assert_eq!(classifier.0.load(Ordering::SeqCst), 1);
        assert_eq!(registry.get(&slots.input).unwrap().num_rows(), 2);
        assert!(registry.get(&slots.output).is_err());
    }

    #[tokio::test]
    async fn healthcheck_and_shutdown_replies() {
        let (registry, dispatcher) = dispatcher(Arc::new(LengthClassifier));
        let health = dispatcher.dispatch(&Action::Healthcheck).await.unwrap();
        assert_eq!(health.body.as_ref(), HEALTHCHECK_ACK);
        assert_eq!(health.post, PostAction::None);

        let shutdown = dispatcher.dispatch(&Action::Shutdown).await.unwrap();
        assert_eq!(shutdown.body.as_ref(), SHUTDOWN_ACK);
        assert_eq!(shutdown.post, PostAction::Terminate);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unknown_action_carries_its_name() {
        let (_registry, dispatcher) = dispatcher(Arc::new(LengthClassifier));
        let err = dispatcher
            .dispatch(&Action::parse("bogus"))
            .await
            .expect_err("unknown action");
        assert_eq!(err.kind, ServiceErrorKind::UnknownAction);
        assert!(err.message.contains("bogus"));
    }
}
