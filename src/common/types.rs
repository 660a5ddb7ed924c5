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

use arrow::datatypes::SchemaRef;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use arrow_flight::FlightDescriptor;
use arrow_flight::flight_descriptor::DescriptorType;
use bytes::Bytes;

use crate::common::status::ServiceError;

/// Addressing mode of a Flight descriptor. Discriminants follow the Flight
/// protocol's `DescriptorType` so they can appear verbatim in tickets.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DescriptorKind {
    Path,
    Cmd,
}

impl DescriptorKind {
    pub const fn as_i32(self) -> i32 {
        match self {
            DescriptorKind::Path => DescriptorType::Path as i32,
            DescriptorKind::Cmd => DescriptorType::Cmd as i32,
        }
    }
}

impl TryFrom<i32> for DescriptorKind {
    type Error = ServiceError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        if value == DescriptorType::Path as i32 {
            Ok(DescriptorKind::Path)
        } else if value == DescriptorType::Cmd as i32 {
            Ok(DescriptorKind::Cmd)
        } else {
            Err(ServiceError::invalid_argument(format!(
                "unsupported flight descriptor type: {value}"
            )))
        }
    }
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Canonical registry key derived from a descriptor.
///
/// Two descriptors address the same dataset iff their keys compare equal.
/// `command` is `None` for path descriptors; `path` is empty for command
/// descriptors.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RegistryKey {
    kind: DescriptorKind,
    command: Option<Bytes>,
    path: Vec<String>,
}

impl RegistryKey {
    pub fn for_path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: DescriptorKind::Path,
            command: None,
            path: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn for_command(command: impl Into<Bytes>) -> Self {
        Self {
            kind: DescriptorKind::Cmd,
            command: Some(command.into()),
            path: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        kind: DescriptorKind,
        command: Option<Bytes>,
        path: Vec<String>,
    ) -> Result<Self, ServiceError> {
        match kind {
            DescriptorKind::Path if command.is_some() => Err(ServiceError::invalid_argument(
                "path-addressed key must not carry a command",
            )),
            DescriptorKind::Cmd if command.is_none() => Err(ServiceError::invalid_argument(
                "command-addressed key must carry a command",
            )),
            DescriptorKind::Cmd if !path.is_empty() => Err(ServiceError::invalid_argument(
                "command-addressed key must not carry a path",
            )),
            _ => Ok(Self {
                kind,
                command,
                path,
            }),
        }
    }

    pub fn from_descriptor(descriptor: &FlightDescriptor) -> Result<Self, ServiceError> {
        match DescriptorKind::try_from(descriptor.r#type)? {
            DescriptorKind::Path => Ok(Self::for_path(descriptor.path.iter().cloned())),
            DescriptorKind::Cmd => Ok(Self::for_command(descriptor.cmd.clone())),
        }
    }

    pub fn to_descriptor(&self) -> FlightDescriptor {
        match (&self.kind, &self.command) {
            (DescriptorKind::Cmd, Some(cmd)) => FlightDescriptor::new_cmd(cmd.clone()),
            _ => FlightDescriptor::new_path(self.path.clone()),
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn command(&self) -> Option<&Bytes> {
        self.command.as_ref()
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::common::ticket::encode_key(self))
    }
}

/// Immutable, fully materialized table held by the registry.
#[derive(Clone, Debug)]
pub struct Dataset {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Dataset {
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self, ServiceError> {
        for (idx, batch) in batches.iter().enumerate() {
            if batch.schema().fields() != schema.fields() {
                return Err(ServiceError::invalid_argument(format!(
                    "record batch {idx} does not match dataset schema"
                )));
            }
        }
        Ok(Self { schema, batches })
    }

    pub fn from_batch(batch: RecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            batches: vec![batch],
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Size in bytes of this dataset serialized as an Arrow IPC stream.
    pub fn ipc_stream_size(&self) -> Result<usize, ServiceError> {
        let mut buf = Vec::new();
        {
            let mut writer = StreamWriter::try_new(&mut buf, &self.schema)?;
            for batch in &self.batches {
                writer.write(batch)?;
            }
            writer.finish()?;
        }
        Ok(buf.len())
    }
}

/// Registry entries are shared read-only between handlers.
pub type DatasetRef = Arc<Dataset>;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use arrow_flight::FlightDescriptor;

    use super::{Dataset, DescriptorKind, RegistryKey};

    #[test]
    fn identical_descriptors_derive_equal_keys() {
        let a = FlightDescriptor::new_path(vec!["ToPython".to_string()]);
        let b = FlightDescriptor::new_path(vec!["ToPython".to_string()]);
        assert_eq!(
            RegistryKey::from_descriptor(&a).unwrap(),
            RegistryKey::from_descriptor(&b).unwrap()
        );

        let c = FlightDescriptor::new_cmd(b"result-7".to_vec());
        let d = FlightDescriptor::new_cmd(b"result-7".to_vec());
        assert_eq!(
            RegistryKey::from_descriptor(&c).unwrap(),
            RegistryKey::from_descriptor(&d).unwrap()
        );
    }

    #[test]
    fn path_and_command_keys_never_collide() {
        let path = RegistryKey::for_path(["abc"]);
        let cmd = RegistryKey::for_command(&b"abc"[..]);
        assert_ne!(path, cmd);
        assert_eq!(path.kind(), DescriptorKind::Path);
        assert!(path.command().is_none());
        assert!(cmd.path().is_empty());
    }

    #[test]
    fn path_segment_order_is_significant() {
        assert_ne!(
            RegistryKey::for_path(["a", "b"]),
            RegistryKey::for_path(["b", "a"])
        );
    }

    #[test]
    fn descriptor_reconstruction_round_trips() {
        let key = RegistryKey::for_path(["FromPython"]);
        let rebuilt = RegistryKey::from_descriptor(&key.to_descriptor()).unwrap();
        assert_eq!(rebuilt, key);

        let key = RegistryKey::for_command(&b"cmd"[..]);
        let rebuilt = RegistryKey::from_descriptor(&key.to_descriptor()).unwrap();
        assert_eq!(rebuilt, key);
    }

    #[test]
    fn unknown_descriptor_type_is_rejected() {
        let descriptor = FlightDescriptor {
            r#type: 0,
            cmd: Default::default(),
            path: vec![],
        };
        assert!(RegistryKey::from_descriptor(&descriptor).is_err());
    }

    #[test]
    fn dataset_counts_rows_across_batches() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let b1 = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![Arc::new(Int64Array::from(vec![1, 2]))],
        )
        .unwrap();
        let b2 = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![Arc::new(Int64Array::from(vec![3]))],
        )
        .unwrap();
        let dataset = Dataset::try_new(schema, vec![b1, b2]).unwrap();
        assert_eq!(dataset.num_rows(), 3);
        assert!(dataset.ipc_stream_size().unwrap() > 0);
    }

    #[test]
    fn dataset_rejects_mismatched_batches() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let other = RecordBatch::try_from_iter(vec![(
            "s",
            Arc::new(StringArray::from(vec!["x"])) as _,
        )])
        .unwrap();
        assert!(Dataset::try_new(schema, vec![other]).is_err());
    }
}
