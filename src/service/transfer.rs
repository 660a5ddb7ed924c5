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
//! ListFlights / GetFlightInfo / GetSchema / DoPut / DoGet on top of the
//! dataset registry. Arrow decoding and encoding stays outside the registry
//! lock; only the final put/get touches it.

use std::sync::Arc;

use arrow::datatypes::Schema;
use arrow::ipc::writer::IpcWriteOptions;
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::{
    FlightData, FlightDescriptor, FlightEndpoint, FlightInfo, SchemaAsIpc, SchemaResult, Ticket,
};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};

use crate::common::status::ServiceError;
use crate::common::ticket::{decode_ticket, encode_ticket};
use crate::common::types::{Dataset, DatasetRef, RegistryKey};
use crate::runtime::dataset_registry::DatasetRegistry;
use crate::texflight_logging::{debug, info};

pub struct TransferHandlers {
    registry: Arc<DatasetRegistry>,
    location: String,
}

impl TransferHandlers {
    /// `location` is the URI advertised in every endpoint, e.g.
    /// `grpc+tcp://localhost:5005`.
    pub fn new(registry: Arc<DatasetRegistry>, location: impl Into<String>) -> Self {
        Self {
            registry,
            location: location.into(),
        }
    }

    fn flight_info(
        &self,
        key: &RegistryKey,
        descriptor: FlightDescriptor,
        dataset: &Dataset,
    ) -> Result<FlightInfo, ServiceError> {
        let endpoint = FlightEndpoint::new()
            .with_ticket(encode_ticket(key))
            .with_location(self.location.clone());
        let info = FlightInfo::new()
            .try_with_schema(dataset.schema().as_ref())?
            .with_endpoint(endpoint)
            .with_descriptor(descriptor)
            .with_total_records(dataset.num_rows() as i64)
            .with_total_bytes(dataset.ipc_stream_size()? as i64);
        Ok(info)
    }

    /// One FlightInfo per registry entry, built lazily from the entries
    /// present when the call was made.
    pub fn list_flights(
        self: &Arc<Self>,
    ) -> impl Iterator<Item = Result<FlightInfo, ServiceError>> + Send + 'static {
        let handlers = Arc::clone(self);
        self.registry
            .list()
            .into_iter()
            .map(move |(key, dataset)| handlers.flight_info(&key, key.to_descriptor(), &dataset))
    }

    pub fn get_flight_info(
        &self,
        descriptor: &FlightDescriptor,
    ) -> Result<FlightInfo, ServiceError> {
        let key = RegistryKey::from_descriptor(descriptor)?;
        let dataset = self.registry.get(&key)?;
        self.flight_info(&key, descriptor.clone(), &dataset)
    }

    pub fn get_schema(&self, descriptor: &FlightDescriptor) -> Result<SchemaResult, ServiceError> {
        let key = RegistryKey::from_descriptor(descriptor)?;
        let dataset = self.registry.get(&key)?;
        let options = IpcWriteOptions::default();
        let result = SchemaResult::try_from(SchemaAsIpc::new(dataset.schema(), &options))?;
        Ok(result)
    }

    /// Decodes a whole DoPut stream, then stores it under the key derived
    /// from the descriptor carried by the first message.
    pub async fn upload<S>(&self, stream: S) -> Result<(RegistryKey, usize), ServiceError>
    where
        S: Stream<Item = Result<FlightData, tonic::Status>> + Send + 'static,
    {
        let mut stream = Box::pin(stream);
        let first = stream
            .next()
            .await
            .ok_or_else(|| ServiceError::invalid_argument("empty DoPut stream"))?
            .map_err(|e| ServiceError::invalid_argument(format!("DoPut receive failed: {e}")))?;
        let descriptor = first.flight_descriptor.clone().ok_or_else(|| {
            ServiceError::invalid_argument("first DoPut message must carry a flight descriptor")
        })?;
        let key = RegistryKey::from_descriptor(&descriptor)?;

        // A descriptor-only message carries no IPC payload for the decoder.
        let head = if first.data_header.is_empty() {
            None
        } else {
            Some(Ok(first))
        };
        let data = stream::iter(head)
            .chain(stream)
            .map_err(FlightError::from);
        let mut decoder = FlightRecordBatchStream::new_from_flight_data(data);
        let mut batches = Vec::new();
        while let Some(batch) = decoder
            .try_next()
            .await
            .map_err(|e| ServiceError::invalid_argument(format!("decode DoPut stream: {e}")))?
        {
            batches.push(batch);
        }
        let schema = match decoder.schema() {
            Some(schema) => Arc::clone(schema),
            None => batches
                .first()
                .map(|b| b.schema())
                .unwrap_or_else(|| Arc::new(Schema::empty())),
        };
        let dataset = Dataset::try_new(schema, batches)?;
        let rows = dataset.num_rows();
        self.registry.put(key.clone(), Arc::new(dataset));
        info!(target: "texflight::flight", key = %key, rows, "dataset uploaded");
        Ok((key, rows))
    }

    /// Resolves a ticket to its dataset. The entry is left untouched.
    pub fn download(&self, ticket: &Ticket) -> Result<DatasetRef, ServiceError> {
        let key = decode_ticket(&ticket.ticket)?;
        let dataset = self.registry.get(&key)?;
        debug!(target: "texflight::flight", key = %key, rows = dataset.num_rows(), "dataset download");
        Ok(dataset)
    }
}

/// Streams a dataset as FlightData, schema first even when it has no rows.
pub fn encode_dataset(dataset: DatasetRef) -> BoxStream<'static, Result<FlightData, tonic::Status>> {
    let batches = dataset.batches().to_vec();
    FlightDataEncoderBuilder::new()
        .with_schema(Arc::clone(dataset.schema()))
        .build(stream::iter(batches.into_iter().map(Ok)))
        .map_err(tonic::Status::from)
        .boxed()
}
