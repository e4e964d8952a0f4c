//! gRPC ingest surface: `TraceService/Export` via tonic.

use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::{
    TraceService, TraceServiceServer,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use tonic::{Request, Response, Status};

use super::handlers::run_pipeline_detached;
use crate::api::AppState;
use crate::auth::authenticate_header;
use crate::otlp::convert_proto_request;

/// tonic implementation of the OTLP trace collector service.
pub struct TraceGrpcService {
    state: AppState,
}

impl TraceGrpcService {
    #[must_use]
    pub const fn new(state: AppState) -> Self {
        Self { state }
    }
}

/// Build the tonic service for `main` to mount.
pub fn service(state: AppState) -> TraceServiceServer<TraceGrpcService> {
    TraceServiceServer::new(TraceGrpcService::new(state))
}

#[tonic::async_trait]
impl TraceService for TraceGrpcService {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let header = request
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let auth = authenticate_header(
            self.state.meta.as_ref(),
            &self.state.config.jwt_secret,
            header.as_deref(),
        )
        .await
        .map_err(|e| e.grpc_status())?;
        if !auth.can_ingest() {
            return Err(Status::permission_denied("role lacks ingest permission"));
        }

        let spans = convert_proto_request(request.into_inner());
        run_pipeline_detached(self.state.clone(), auth.tenant, spans)
            .await
            .map_err(|e| e.grpc_status())?;

        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}
