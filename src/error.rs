//! Errors of the `reprise` front end.

use std::io;
use std::path::PathBuf;

use derive_more::{Display, Error, From};
use reprise_passes::AnalysisError;

#[derive(Debug, Display, Error, From)]
pub enum Error {
    #[display("{}: {source}", path.display())]
    #[from(skip)]
    File { path: PathBuf, source: io::Error },
    #[display("{_0}")]
    Io(io::Error),
    #[display("invalid configuration: {_0}")]
    Config(toml::de::Error),
    #[display("{_0}")]
    Analysis(AnalysisError),
}

impl Error {
    pub(crate) fn file(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Error::File { path, source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
