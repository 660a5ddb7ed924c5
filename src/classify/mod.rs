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
//! Classification pipeline invoked by the `compute` action.
//!
//! The service only depends on the [`Classifier`] trait; the concrete
//! text relevancy model is loaded from disk once at startup.

pub mod model;
pub mod preprocess;

use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::common::status::ServiceError;
use crate::common::types::Dataset;

pub use model::{CountVectorizer, LinearClassifier, TextRelevancyClassifier};

pub const PREDICTION_COLUMN: &str = "pred";

pub trait Classifier: Send + Sync {
    /// Returns one prediction per input row, in row order.
    fn classify(&self, dataset: &Dataset) -> Result<ArrayRef, ServiceError>;
}

/// Wraps classifier output as the single-column result dataset.
pub fn predictions_to_dataset(
    input_rows: usize,
    predictions: ArrayRef,
) -> Result<Dataset, ServiceError> {
    if predictions.len() != input_rows {
        return Err(ServiceError::pipeline(format!(
            "classifier returned {} predictions for {input_rows} rows",
            predictions.len()
        )));
    }
    let schema = Arc::new(Schema::new(vec![Field::new(
        PREDICTION_COLUMN,
        predictions.data_type().clone(),
        predictions.null_count() > 0,
    )]));
    let batch = RecordBatch::try_new(schema, vec![predictions])?;
    Ok(Dataset::from_batch(batch))
}
