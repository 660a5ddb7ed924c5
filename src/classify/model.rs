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
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use arrow::array::{Array, ArrayRef, AsArray, StringBuilder};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use regex::Regex;
use serde::Deserialize;

use crate::classify::Classifier;
use crate::classify::preprocess::preprocess;
use crate::common::status::ServiceError;
use crate::common::types::Dataset;
use crate::texflight_logging::info;

pub const TEXT_COLUMN: &str = "text";

fn default_true() -> bool {
    true
}

fn analyzer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("static token pattern"))
}

/// Bag-of-words vectorizer artifact: a token -> feature index vocabulary.
#[derive(Clone, Debug, Deserialize)]
pub struct CountVectorizer {
    vocabulary: HashMap<String, usize>,
    #[serde(default = "default_true")]
    lowercase: bool,
    #[serde(default)]
    binary: bool,
}

impl CountVectorizer {
    pub fn new(vocabulary: HashMap<String, usize>) -> Self {
        Self {
            vocabulary,
            lowercase: true,
            binary: false,
        }
    }

    pub fn num_features(&self) -> usize {
        self.vocabulary.values().max().map_or(0, |max| max + 1)
    }

    /// Sparse term counts of `doc`, as (feature index, count) pairs.
    pub fn transform(&self, doc: &str) -> Vec<(usize, f64)> {
        let doc = if self.lowercase {
            doc.to_lowercase()
        } else {
            doc.to_string()
        };
        let mut counts: HashMap<usize, f64> = HashMap::new();
        for token in analyzer_pattern().find_iter(&doc) {
            if let Some(&idx) = self.vocabulary.get(token.as_str()) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }
        let mut features: Vec<(usize, f64)> = counts
            .into_iter()
            .map(|(idx, n)| (idx, if self.binary { 1.0 } else { n }))
            .collect();
        features.sort_unstable_by_key(|(idx, _)| *idx);
        features
    }
}

#[derive(Clone, Debug, Deserialize)]
struct LinearModelArtifact {
    classes: Vec<serde_json::Value>,
    coef: Vec<Vec<f64>>,
    intercept: Vec<f64>,
}

/// Linear decision function over vectorized text.
///
/// Two classes use a single coefficient row: a positive score selects
/// `classes[1]`. More classes use one row per class and take the argmax.
#[derive(Clone, Debug)]
pub struct LinearClassifier {
    classes: Vec<String>,
    coef: Vec<Vec<f64>>,
    intercept: Vec<f64>,
}

fn label_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl LinearClassifier {
    pub fn try_new(
        classes: Vec<String>,
        coef: Vec<Vec<f64>>,
        intercept: Vec<f64>,
    ) -> Result<Self, ServiceError> {
        if classes.len() < 2 {
            return Err(ServiceError::startup(format!(
                "classifier needs at least two classes, got {}",
                classes.len()
            )));
        }
        let rows = if classes.len() == 2 { 1 } else { classes.len() };
        if coef.len() != rows || intercept.len() != rows {
            return Err(ServiceError::startup(format!(
                "classifier with {} classes expects {rows} coefficient rows and intercepts, got {} and {}",
                classes.len(),
                coef.len(),
                intercept.len()
            )));
        }
        if let Some(first) = coef.first()
            && coef.iter().any(|row| row.len() != first.len())
        {
            return Err(ServiceError::startup(
                "classifier coefficient rows differ in length",
            ));
        }
        Ok(Self {
            classes,
            coef,
            intercept,
        })
    }

    pub fn num_features(&self) -> usize {
        self.coef.first().map_or(0, Vec::len)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    fn score(&self, row: usize, features: &[(usize, f64)]) -> f64 {
        let weights = &self.coef[row];
        features
            .iter()
            .filter_map(|(idx, v)| weights.get(*idx).map(|w| w * v))
            .sum::<f64>()
            + self.intercept[row]
    }

    pub fn predict(&self, features: &[(usize, f64)]) -> &str {
        if self.classes.len() == 2 {
            let idx = usize::from(self.score(0, features) > 0.0);
            return &self.classes[idx];
        }
        let mut best = 0usize;
        let mut best_score = f64::NEG_INFINITY;
        for row in 0..self.coef.len() {
            let score = self.score(row, features);
            if score > best_score {
                best = row;
                best_score = score;
            }
        }
        &self.classes[best]
    }
}

fn read_artifact<T: for<'de> Deserialize<'de>>(path: &Path, role: &str) -> Result<T, ServiceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ServiceError::startup(format!("read {role} artifact {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        ServiceError::startup(format!("parse {role} artifact {}: {e}", path.display()))
    })
}

/// Relevancy classifier over the `text` column of a dataset.
#[derive(Clone, Debug)]
pub struct TextRelevancyClassifier {
    vectorizer: CountVectorizer,
    model: LinearClassifier,
}

impl TextRelevancyClassifier {
    pub fn try_new(
        vectorizer: CountVectorizer,
        model: LinearClassifier,
    ) -> Result<Self, ServiceError> {
        if vectorizer.num_features() > model.num_features() {
            return Err(ServiceError::startup(format!(
                "vectorizer produces {} features but classifier accepts {}",
                vectorizer.num_features(),
                model.num_features()
            )));
        }
        Ok(Self { vectorizer, model })
    }

    /// Loads both artifacts. Any failure here is fatal to startup.
    pub fn load(
        vectorizer_path: impl AsRef<Path>,
        classifier_path: impl AsRef<Path>,
    ) -> Result<Self, ServiceError> {
        let vectorizer_path = vectorizer_path.as_ref();
        let classifier_path = classifier_path.as_ref();
        let vectorizer: CountVectorizer = read_artifact(vectorizer_path, "vectorizer")?;
        let artifact: LinearModelArtifact = read_artifact(classifier_path, "classifier")?;
        let model = LinearClassifier::try_new(
            artifact.classes.iter().map(label_text).collect(),
            artifact.coef,
            artifact.intercept,
        )?;
        let classifier = Self::try_new(vectorizer, model)?;
        info!(
            vectorizer = %vectorizer_path.display(),
            classifier = %classifier_path.display(),
            vocabulary = classifier.vectorizer.vocabulary.len(),
            classes = ?classifier.model.classes(),
            "classification artifacts loaded"
        );
        Ok(classifier)
    }

    pub fn predict_text(&self, text: &str) -> &str {
        let features = self.vectorizer.transform(&preprocess(text));
        self.model.predict(&features)
    }
}

impl Classifier for TextRelevancyClassifier {
    fn classify(&self, dataset: &Dataset) -> Result<ArrayRef, ServiceError> {
        let mut out = StringBuilder::with_capacity(dataset.num_rows(), dataset.num_rows() * 4);
        for batch in dataset.batches() {
            let column = batch.column_by_name(TEXT_COLUMN).ok_or_else(|| {
                ServiceError::pipeline(format!("input dataset has no '{TEXT_COLUMN}' column"))
            })?;
            let column = cast(column.as_ref(), &DataType::Utf8).map_err(|e| {
                ServiceError::pipeline(format!("'{TEXT_COLUMN}' column is not text: {e}"))
            })?;
            let texts = column.as_string::<i32>();
            for row in 0..texts.len() {
                let text = if texts.is_null(row) {
                    ""
                } else {
                    texts.value(row)
                };
                out.append_value(self.predict_text(text));
            }
        }
        Ok(Arc::new(out.finish()))
    }
}
