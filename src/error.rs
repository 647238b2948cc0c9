use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("MIDI error: {0}")]
    Midi(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Bulb {addr}: {reason}")]
    Bulb { addr: String, reason: String },

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<midir::InitError> for Error {
    fn from(e: midir::InitError) -> Self {
        Error::Midi(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiInput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        Error::Midi(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
