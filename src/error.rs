use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaxcountError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Camera {camera_id}: {message}")]
    Camera { camera_id: String, message: String },

    #[error("Detection failed on camera {camera_id}: {message}")]
    Detection { camera_id: String, message: String },

    #[error("Invalid ROI: {message}")]
    Roi { message: String },

    #[error("System error: {message}")]
    System { message: String },
}

impl PaxcountError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn camera<I: ToString, S: Into<String>>(camera_id: I, message: S) -> Self {
        Self::Camera {
            camera_id: camera_id.to_string(),
            message: message.into(),
        }
    }

    pub fn detection<I: ToString, S: Into<String>>(camera_id: I, message: S) -> Self {
        Self::Detection {
            camera_id: camera_id.to_string(),
            message: message.into(),
        }
    }

    pub fn roi<S: Into<String>>(message: S) -> Self {
        Self::Roi {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PaxcountError>;
