//! Error types for the mesh crate

#[derive(thiserror::Error, Debug)]
pub enum MeshError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("grpc transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("bridge '{0}' already started")]
    AlreadyStarted(String),
}
