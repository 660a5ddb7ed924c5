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
pub mod classify;
pub mod common;
pub mod runtime;
pub mod service;

pub use common::app_config as texflight_config;
pub use common::logging as texflight_logging;

pub use classify::{Classifier, TextRelevancyClassifier};
pub use common::status::{ServiceError, ServiceErrorKind};
pub use common::types::{Dataset, DescriptorKind, RegistryKey};
pub use runtime::dataset_registry::DatasetRegistry;
pub use service::flight_server::{FlightServerHandle, FlightServerOptions, start_flight_server};
