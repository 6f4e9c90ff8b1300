use std::path::PathBuf;

use thiserror::Error;

/// Failures of the sandbox machinery itself.
///
/// A command that exits non-zero is not one of these; see
/// [`crate::SandboxOutcome::exit_code`].
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Container daemon unreachable: {0}")]
    DaemonUnreachable(String),

    #[error("No recipe for image '{image}' at {path}")]
    RecipeMissing { image: String, path: PathBuf },

    #[error("Failed to build image '{image}': {message}")]
    ImageBuild { image: String, message: String },

    #[error("Mount source {0} does not exist")]
    MountMissing(PathBuf),

    #[error("Failed to write sandbox log at {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Container runtime error: {0}")]
    Runtime(String),
}

impl From<bollard::errors::Error> for SandboxError {
    fn from(err: bollard::errors::Error) -> Self {
        SandboxError::Runtime(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_missing_carries_path() {
        let err = SandboxError::MountMissing(PathBuf::from("/nope"));
        assert!(err.to_string().contains("/nope"));
    }

    #[test]
    fn test_image_build_message_names_image() {
        let err = SandboxError::ImageBuild {
            image: "liftoff".into(),
            message: "exit 1".into(),
        };
        assert_eq!(err.to_string(), "Failed to build image 'liftoff': exit 1");
    }
}
