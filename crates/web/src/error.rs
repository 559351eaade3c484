use thiserror::Error;

/// Framework-level errors.
///
/// Route-definition problems carry the offending source label and line so a
/// broken table is reported once, at load time, with enough context to fix
/// it. Binding problems never surface here: the binder degrades to zero
/// values and warns instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("route error at {path}:{line}: {reason}")]
    Route { reason: String, path: String, line: usize },

    #[error("failed to load routes file {path}: {source}")]
    RoutesIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn route(reason: impl Into<String>, path: impl Into<String>, line: usize) -> Self {
        Self::Route { reason: reason.into(), path: path.into(), line }
    }
}
