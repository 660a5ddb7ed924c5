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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    NotFound,
    UnknownAction,
    PipelineFailure,
    InvalidArgument,
    Internal,
    StartupFailure,
}

impl ServiceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceErrorKind::NotFound => "NotFound",
            ServiceErrorKind::UnknownAction => "UnknownAction",
            ServiceErrorKind::PipelineFailure => "PipelineFailure",
            ServiceErrorKind::InvalidArgument => "InvalidArgument",
            ServiceErrorKind::Internal => "Internal",
            ServiceErrorKind::StartupFailure => "StartupFailure",
        }
    }
}

/// Error surfaced by registry, transfer and action handlers.
///
/// Every variant reaches the calling connection as a `tonic::Status`; nothing
/// is swallowed inside the service.
#[derive(Debug, Clone)]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::NotFound, message)
    }

    pub fn unknown_action(name: &str) -> Self {
        Self::new(
            ServiceErrorKind::UnknownAction,
            format!("Unknown action {name:?}"),
        )
    }

    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::PipelineFailure, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Internal, message)
    }

    pub fn startup(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::StartupFailure, message)
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ServiceError {}

impl From<ServiceError> for tonic::Status {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err.kind {
            ServiceErrorKind::NotFound => tonic::Status::not_found(message),
            ServiceErrorKind::UnknownAction | ServiceErrorKind::InvalidArgument => {
                tonic::Status::invalid_argument(message)
            }
            ServiceErrorKind::PipelineFailure | ServiceErrorKind::Internal => {
                tonic::Status::internal(message)
            }
            ServiceErrorKind::StartupFailure => tonic::Status::unavailable(message),
        }
    }
}

impl From<arrow::error::ArrowError> for ServiceError {
    fn from(err: arrow::error::ArrowError) -> Self {
        ServiceError::internal(format!("arrow error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::{ServiceError, ServiceErrorKind};

    #[test]
    fn unknown_action_status_carries_the_name() {
        let status: tonic::Status = ServiceError::unknown_action("bogus").into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("UnknownAction"));
        assert!(status.message().contains("bogus"));
    }

    #[test]
    fn not_found_maps_to_not_found_code() {
        let status: tonic::Status = ServiceError::not_found("no flight").into();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[test]
    fn pipeline_failure_is_internal() {
        let err = ServiceError::pipeline("missing text column");
        assert_eq!(err.kind, ServiceErrorKind::PipelineFailure);
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::Internal);
    }
}
