use std::fmt;
use std::net::SocketAddr;
use crate::registry::RegistryError;
use crate::settings::SettingsError;

#[derive(Debug)]
pub enum Error {
    Settings(SettingsError),
    Registry(RegistryError),
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    IoError(std::io::Error),
    ListenerStopped(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<SettingsError> for Error {
    fn from(err: SettingsError) -> Self {
        Error::Settings(err)
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Error::Registry(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Settings(e) => write!(f, "Config Error: {}", e),
            Error::Registry(e) => write!(f, "Backend Registry Error: {}", e),
            Error::Bind { addr, source } => write!(f, "Bind Error {}: {}", addr, source),
            Error::IoError(e) => write!(f, "IO Error: {}", e),
            Error::ListenerStopped(name) => write!(f, "Listener stopped: {}", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Settings(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::Bind { source, .. } => Some(source),
            Error::IoError(e) => Some(e),
            Error::ListenerStopped(_) => None,
        }
    }
}
