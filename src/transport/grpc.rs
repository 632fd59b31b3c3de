//! gRPC service over a shared [`Simulator`].
//!
//! Simulator commands block on the scheduling thread, so every RPC runs them
//! on tokio's blocking pool. Snapshots and read chunks are returned as JSON.

use std::sync::Arc;

use serde::Serialize;
use tonic::{Request, Response, Status};

use crate::error::{OperationError, SimError};
use crate::simulator::Simulator;

pub mod proto {
    #![allow(missing_docs, clippy::pedantic)]
    tonic::include_proto!("readsim");
}

use proto::read_sim_server::{ReadSim, ReadSimServer};

/// Largest JSON payload a response may carry.
const MAX_RESPONSE_JSON_BYTES: usize = 16 * 1024 * 1024;

/// gRPC service implementation.
pub struct ReadSimServiceImpl {
    simulator: Arc<Simulator>,
    /// Used when a start request leaves a field at 0.
    default_acceleration: f64,
    default_log_interval: f64,
}

impl ReadSimServiceImpl {
    /// Service over `simulator`; the defaults apply when a start request leaves them unset.
    #[must_use]
    pub fn new(simulator: Arc<Simulator>, default_acceleration: f64, default_log_interval: f64) -> Self {
        Self {
            simulator,
            default_acceleration,
            default_log_interval,
        }
    }

    /// Wraps the service for `tonic`'s router.
    #[must_use]
    pub fn into_server(self) -> ReadSimServer<Self> {
        ReadSimServer::new(self)
    }

    /// Runs a blocking simulator call off the async runtime.
    async fn call<T, F>(&self, f: F) -> Result<T, Status>
    where
        T: Send + 'static,
        F: FnOnce(&Simulator) -> Result<T, SimError> + Send + 'static,
    {
        let simulator = Arc::clone(&self.simulator);
        tokio::task::spawn_blocking(move || f(&simulator))
            .await
            .map_err(|e| Status::internal(format!("simulator task failed: {e}")))?
            .map_err(status_from_sim_error)
    }
}

fn status_from_sim_error(err: SimError) -> Status {
    match err {
        SimError::Config(e) => Status::invalid_argument(e.to_string()),
        SimError::Operation(e) => match e {
            OperationError::UnknownChannel { .. } => Status::not_found(e.to_string()),
            OperationError::InvalidOperation { .. }
            | OperationError::AlreadyRunning
            | OperationError::NotRunning
            | OperationError::RunFinished
            | OperationError::PoolClosed => Status::failed_precondition(e.to_string()),
            OperationError::Disconnected { .. } => Status::unavailable(e.to_string()),
        },
        SimError::Writer(e) => Status::internal(e.to_string()),
        SimError::Transport(e) => Status::unavailable(e.to_string()),
        SimError::Io(e) => Status::internal(e.to_string()),
        SimError::Internal { message } => Status::internal(message),
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<proto::JsonResponse, Status> {
    let json =
        serde_json::to_vec(value).map_err(|e| Status::internal(format!("failed to serialize response JSON: {e}")))?;
    if json.len() > MAX_RESPONSE_JSON_BYTES {
        return Err(Status::resource_exhausted("serialized JSON exceeds size limit"));
    }
    Ok(proto::JsonResponse { json })
}

fn action(succeeded: bool) -> Response<proto::ActionResponse> {
    Response::new(proto::ActionResponse { succeeded })
}

fn or_default(value: f64, default: f64) -> f64 {
    if value == 0.0 {
        default
    } else {
        value
    }
}

#[tonic::async_trait]
impl ReadSim for ReadSimServiceImpl {
    async fn start(&self, request: Request<proto::StartRequest>) -> Result<Response<proto::ActionResponse>, Status> {
        let req = request.into_inner();
        let acceleration = or_default(req.acceleration_factor, self.default_acceleration);
        let log_interval = or_default(req.log_interval, self.default_log_interval);
        self.call(move |sim| sim.start(acceleration, log_interval)).await?;
        Ok(action(true))
    }

    async fn stop(&self, _request: Request<proto::Empty>) -> Result<Response<proto::ActionResponse>, Status> {
        let stopped = self.call(|sim| Ok(sim.stop())).await?;
        Ok(action(stopped))
    }

    async fn is_running(&self, _request: Request<proto::Empty>) -> Result<Response<proto::ActionResponse>, Status> {
        Ok(action(self.simulator.is_running()))
    }

    async fn unblock(&self, request: Request<proto::UnblockRequest>) -> Result<Response<proto::ActionResponse>, Status> {
        let req = request.into_inner();
        let applied = self
            .call(move |sim| match req.read_id.as_deref() {
                Some(read_id) => sim.unblock_read(req.channel, read_id, req.unblock_duration),
                None => sim.unblock(req.channel, req.unblock_duration),
            })
            .await?;
        Ok(action(applied))
    }

    async fn stop_receiving(
        &self,
        request: Request<proto::ChannelRequest>,
    ) -> Result<Response<proto::ActionResponse>, Status> {
        let channel = request.into_inner().channel;
        let applied = self.call(move |sim| sim.stop_receiving(channel)).await?;
        Ok(action(applied))
    }

    async fn get_channel_states(&self, _request: Request<proto::Empty>) -> Result<Response<proto::JsonResponse>, Status> {
        let snapshot = self.call(Simulator::get_channel_states).await?;
        Ok(Response::new(encode_json(&snapshot)?))
    }

    async fn get_read_chunks(
        &self,
        request: Request<proto::ReadChunksRequest>,
    ) -> Result<Response<proto::JsonResponse>, Status> {
        let req = request.into_inner();
        let chunks = self
            .call(move |sim| {
                let channels = (!req.channels.is_empty()).then_some(req.channels.as_slice());
                sim.get_read_chunks(channels, req.batch_size as usize)
            })
            .await?;
        Ok(Response::new(encode_json(&chunks)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap_sampling::{ConstantGapsUntilBlocked, GapSampler};
    use crate::read_pool::InMemoryReadPool;
    use crate::record::SourceRead;
    use crate::simulator::{FlowCell, FlowCellSnapshot, SimParams};
    use crate::writer::ArrayReadsWriter;

    fn service() -> ReadSimServiceImpl {
        let params = SimParams {
            n_channels: 2,
            seed: Some(3),
            ..SimParams::default()
        };
        let samplers = (0..2)
            .map(|_| Box::new(ConstantGapsUntilBlocked::default()) as Box<dyn GapSampler>)
            .collect();
        let reads = (0..10).map(|i| SourceRead::new(format!("r{i}"), "ACGT".repeat(1000)));
        let cell = FlowCell::new(
            params,
            samplers,
            Arc::new(InMemoryReadPool::new(reads)),
            Box::new(ArrayReadsWriter::new()),
        )
        .unwrap();
        ReadSimServiceImpl::new(Arc::new(Simulator::new(cell)), 10.0, 100.0)
    }

    #[tokio::test]
    async fn test_start_stop_roundtrip() {
        let svc = service();
        let running = svc.is_running(Request::new(proto::Empty {})).await.unwrap();
        assert!(!running.into_inner().succeeded);

        svc.start(Request::new(proto::StartRequest::default())).await.unwrap();
        assert!(svc.simulator.is_running());

        let err = svc
            .stop_receiving(Request::new(proto::ChannelRequest { channel: 9 }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);

        let states = svc.get_channel_states(Request::new(proto::Empty {})).await.unwrap();
        let snapshot: FlowCellSnapshot = serde_json::from_slice(&states.into_inner().json).unwrap();
        assert_eq!(snapshot.channels.len(), 2);

        let stopped = svc.stop(Request::new(proto::Empty {})).await.unwrap();
        assert!(stopped.into_inner().succeeded);
        let again = svc.stop(Request::new(proto::Empty {})).await.unwrap();
        assert!(!again.into_inner().succeeded);
    }

    #[tokio::test]
    async fn test_commands_before_start_fail_precondition() {
        let svc = service();
        let err = svc
            .unblock(Request::new(proto::UnblockRequest {
                channel: 1,
                read_id: None,
                unblock_duration: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
    }
}
