use std::{error::Error, fmt, io, path::PathBuf};

use machine_learning::MlErr;

/// The few-shot module's result type.
pub type Result<T> = std::result::Result<T, FewShotErr>;

/// Few-shot training failures.
#[derive(Debug)]
pub enum FewShotErr {
    Io {
        path: PathBuf,
        source: io::Error,
    },
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    Shape {
        path: PathBuf,
        expected: (u32, u32),
        got: (u32, u32),
    },
    Serialization(String),
    NotEnoughClasses {
        usable: usize,
        required: usize,
    },
    Ml(MlErr),
    Context {
        op: &'static str,
        source: Box<FewShotErr>,
    },
}

impl FewShotErr {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the innermost error, skipping every `Context` layer.
    pub fn root(&self) -> &FewShotErr {
        match self {
            FewShotErr::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

impl fmt::Display for FewShotErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FewShotErr::Io { path, source } => {
                write!(f, "io error at {}: {source}", path.display())
            }
            FewShotErr::Decode { path, source } => {
                write!(f, "couldn't decode {}: {source}", path.display())
            }
            FewShotErr::Shape {
                path,
                expected,
                got,
            } => write!(
                f,
                "{} is {}x{}, expected {}x{}",
                path.display(),
                got.0,
                got.1,
                expected.0,
                expected.1
            ),
            FewShotErr::Serialization(msg) => write!(f, "serialization error: {msg}"),
            FewShotErr::NotEnoughClasses { usable, required } => write!(
                f,
                "not enough usable classes: got {usable}, need at least {required}"
            ),
            FewShotErr::Ml(e) => write!(f, "{e}"),
            FewShotErr::Context { op, source } => write!(f, "{op}: {source}"),
        }
    }
}

impl Error for FewShotErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FewShotErr::Io { source, .. } => Some(source),
            FewShotErr::Decode { source, .. } => Some(source),
            FewShotErr::Ml(e) => Some(e),
            FewShotErr::Context { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<MlErr> for FewShotErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<serde_json::Error> for FewShotErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<FewShotErr> for io::Error {
    fn from(value: FewShotErr) -> Self {
        match value {
            FewShotErr::Io { source, .. } => source,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Adds the name of the failing operation to an error.
pub trait Context<T> {
    fn context(self, op: &'static str) -> Result<T>;
}

impl<T, E: Into<FewShotErr>> Context<T> for std::result::Result<T, E> {
    fn context(self, op: &'static str) -> Result<T> {
        self.map_err(|e| FewShotErr::Context {
            op,
            source: Box::new(e.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_the_root() {
        let res: Result<()> = Err(FewShotErr::NotEnoughClasses {
            usable: 1,
            required: 2,
        });
        let err = res.context("fetch samples").unwrap_err();

        assert_eq!(
            err.to_string(),
            "fetch samples: not enough usable classes: got 1, need at least 2"
        );
        assert!(matches!(err.root(), FewShotErr::NotEnoughClasses { .. }));
    }

    #[test]
    fn io_errors_survive_the_boundary() {
        let err = FewShotErr::io("x", io::Error::new(io::ErrorKind::NotFound, "gone"));
        let err = io::Error::from(err);
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
