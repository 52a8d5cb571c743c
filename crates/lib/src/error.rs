//! User-facing error classes.
//!
//! Every library error maps to one [`ErrorClass`], which decides the process
//! exit code and the `error[<Class>]` tag the CLI prints.

use std::error::Error;

use crate::compose::ComposeError;
use crate::execute::ExecuteError;
use crate::gc::GcError;
use crate::inputs::fetch::FetchError;
use crate::inputs::graph::GraphError;
use crate::inputs::lock::LockError;
use crate::inputs::resolve::ResolveError;
use crate::inputs::store::StoreError;
use crate::manifest::DeclError;
use crate::outputs::LookupError;
use crate::platform::ParsePlatformError;
use crate::project::ProjectError;
use crate::store_lock::StoreLockError;
use crate::update::UpdateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  /// Invalid declarations, lock file or arguments. Reported before any fetch.
  Configuration,
  CyclicDependency,
  /// Transient failure reaching a source. Retried before it surfaces.
  Fetch,
  /// Content does not match its lock entry. Never retried.
  Integrity,
  Compile,
  CheckFailure,
  Composition,
  Other,
}

impl ErrorClass {
  pub fn name(self) -> &'static str {
    match self {
      ErrorClass::Configuration => "ConfigurationError",
      ErrorClass::CyclicDependency => "CyclicDependencyError",
      ErrorClass::Fetch => "FetchError",
      ErrorClass::Integrity => "IntegrityError",
      ErrorClass::Compile => "CompileError",
      ErrorClass::CheckFailure => "CheckFailure",
      ErrorClass::Composition => "CompositionError",
      ErrorClass::Other => "Error",
    }
  }

  pub fn exit_code(self) -> i32 {
    match self {
      ErrorClass::Configuration => 2,
      ErrorClass::CyclicDependency => 3,
      ErrorClass::Fetch => 4,
      ErrorClass::Integrity => 5,
      ErrorClass::Compile | ErrorClass::CheckFailure => 6,
      ErrorClass::Composition => 7,
      ErrorClass::Other => 1,
    }
  }
}

/// Errors that know their class.
pub trait Classify {
  fn class(&self) -> ErrorClass;
}

impl Classify for DeclError {
  fn class(&self) -> ErrorClass {
    ErrorClass::Configuration
  }
}

impl Classify for GraphError {
  fn class(&self) -> ErrorClass {
    match self {
      GraphError::CircularFollows { .. } => ErrorClass::CyclicDependency,
      _ => ErrorClass::Configuration,
    }
  }
}

impl Classify for FetchError {
  fn class(&self) -> ErrorClass {
    ErrorClass::Fetch
  }
}

impl Classify for LockError {
  fn class(&self) -> ErrorClass {
    match self {
      LockError::Read { .. } | LockError::Write { .. } | LockError::Serialize(_) => ErrorClass::Other,
      _ => ErrorClass::Configuration,
    }
  }
}

impl Classify for StoreError {
  fn class(&self) -> ErrorClass {
    ErrorClass::Other
  }
}

impl Classify for StoreLockError {
  fn class(&self) -> ErrorClass {
    ErrorClass::Other
  }
}

impl Classify for ResolveError {
  fn class(&self) -> ErrorClass {
    match self {
      ResolveError::Graph(e) => e.class(),
      ResolveError::SubManifest { .. } | ResolveError::LockMismatch { .. } | ResolveError::InvalidLockHash { .. } => {
        ErrorClass::Configuration
      }
      ResolveError::Fetch { .. } => ErrorClass::Fetch,
      ResolveError::Integrity { .. } => ErrorClass::Integrity,
      ResolveError::Store(_) | ResolveError::ThreadPool(_) => ErrorClass::Other,
    }
  }
}

impl Classify for ComposeError {
  fn class(&self) -> ErrorClass {
    match self {
      ComposeError::Cycle { .. } => ErrorClass::CyclicDependency,
      _ => ErrorClass::Composition,
    }
  }
}

impl Classify for LookupError {
  fn class(&self) -> ErrorClass {
    ErrorClass::Configuration
  }
}

impl Classify for ParsePlatformError {
  fn class(&self) -> ErrorClass {
    ErrorClass::Configuration
  }
}

impl Classify for ExecuteError {
  fn class(&self) -> ErrorClass {
    match self {
      ExecuteError::MissingTool { .. } | ExecuteError::MissingSource { .. } | ExecuteError::ForeignSystem { .. } => {
        ErrorClass::Configuration
      }
      ExecuteError::Compile { .. } => ErrorClass::Compile,
      ExecuteError::ChecksFailed { .. } => ErrorClass::CheckFailure,
      ExecuteError::Store(e) => e.class(),
      ExecuteError::StoreLock(e) => e.class(),
      ExecuteError::Io(_) => ErrorClass::Other,
    }
  }
}

impl Classify for GcError {
  fn class(&self) -> ErrorClass {
    match self {
      GcError::ParseRoots { .. } | GcError::InvalidRoot(_) => ErrorClass::Configuration,
      _ => ErrorClass::Other,
    }
  }
}

impl Classify for ProjectError {
  fn class(&self) -> ErrorClass {
    match self {
      ProjectError::Decl(e) => e.class(),
      ProjectError::Lock(e) => e.class(),
      ProjectError::Resolve(e) => e.class(),
      ProjectError::StoreLock(e) => e.class(),
      ProjectError::Compose(e) => e.class(),
    }
  }
}

impl Classify for UpdateError {
  fn class(&self) -> ErrorClass {
    match self {
      UpdateError::InputNotFound { .. } => ErrorClass::Configuration,
      UpdateError::Project(e) => e.class(),
    }
  }
}

/// Class of `err` if it is one of the library's error types.
///
/// Only `err` itself is inspected; callers walk the source chain, since
/// transparent wrappers hide the error they wrap from `source()`.
pub fn class_of(err: &(dyn Error + 'static)) -> Option<ErrorClass> {
  macro_rules! classify {
    ($($ty:ty),* $(,)?) => {
      $(
        if let Some(e) = err.downcast_ref::<$ty>() {
          return Some(e.class());
        }
      )*
    };
  }

  classify!(
    UpdateError,
    ProjectError,
    ResolveError,
    ComposeError,
    ExecuteError,
    LookupError,
    ParsePlatformError,
    GcError,
    DeclError,
    GraphError,
    FetchError,
    LockError,
    StoreError,
    StoreLockError,
  );
  None
}
