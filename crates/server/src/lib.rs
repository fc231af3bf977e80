mod convert;
pub mod grpc;
pub mod http;
pub mod management;

/// Generated management API types (`mocksmith.api.v1alpha1`).
pub mod pb {
    tonic::include_proto!("mocksmith.api.v1alpha1");
}
