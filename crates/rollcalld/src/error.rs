use crate::export::ExportError;
use rollcall_hw::CameraError;
use rollcall_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("identity registry unavailable: {0}")]
    RegistryUnavailable(StoreError),
    #[error("capture device unavailable: {0}")]
    CaptureUnavailable(#[from] CameraError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("failed to persist attendance: {0}")]
    PersistenceFailure(StoreError),
    #[error("no active attendance session")]
    NoActiveSession,
    #[error("failed to write attendance export: {0}")]
    Export(#[from] ExportError),
    #[error("face analysis failed: {0}")]
    Analysis(#[from] crate::pipeline::AnalysisError),
    #[error("invalid registration: {0}")]
    InvalidRegistration(String),
    #[error("worker failed: {0}")]
    Worker(String),
}
