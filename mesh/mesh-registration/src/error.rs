//! Error types for thin-shell registration.

use std::fmt;

use thiserror::Error;

/// Which of the two registration inputs an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MeshRole {
    /// The target surface (carries the spatial index).
    Fixed,
    /// The elastic shell being deformed by the transform.
    Moving,
}

impl fmt::Display for MeshRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => f.write_str("fixed"),
            Self::Moving => f.write_str("moving"),
        }
    }
}

/// Kind of mesh element an energy term is evaluated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ElementKind {
    /// A unique undirected edge (stretch term).
    Edge,
    /// An interior edge with both wings (bend term).
    Hinge,
    /// A single vertex (feature term).
    Vertex,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Edge => f.write_str("edge"),
            Self::Hinge => f.write_str("hinge"),
            Self::Vertex => f.write_str("vertex"),
        }
    }
}

/// Coarse classification of a [`RegistrationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid inputs, detected before any evaluation.
    Configuration,
    /// A single energy element could not be evaluated.
    NumericDegeneracy,
    /// A shell vertex had no usable match on the target.
    CorrespondenceFailure,
    /// The optimizer could not produce a valid result.
    Registration,
}

/// Errors that can occur during thin-shell registration.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Mesh has no vertices.
    #[error("{role} mesh has no vertices")]
    EmptyMesh {
        /// Which mesh.
        role: MeshRole,
    },

    /// Mesh has vertices but no cells.
    #[error("{role} mesh has no cells")]
    NoCells {
        /// Which mesh.
        role: MeshRole,
    },

    /// Mesh faces reference vertices that do not exist.
    #[error("{role} mesh face {face} references a missing vertex")]
    InvalidFace {
        /// Which mesh.
        role: MeshRole,
        /// Offending face index.
        face: usize,
    },

    /// Cell links were never built, or the mesh changed since.
    #[error("{role} mesh cell links are missing or stale; call build_cell_links()")]
    CellLinksMissing {
        /// Which mesh.
        role: MeshRole,
    },

    /// A mesh vertex position is NaN or infinite.
    #[error("{role} mesh vertex {vertex} has a non-finite position")]
    NonFiniteVertex {
        /// Which mesh.
        role: MeshRole,
        /// Offending vertex index.
        vertex: usize,
    },

    /// No virtual domain was supplied before initialization.
    #[error("virtual domain not set")]
    MissingVirtualDomain,

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Parameter vector length does not match the transform.
    #[error("transform expects {expected} parameters, got {got}")]
    ParameterCountMismatch {
        /// Parameters the transform has.
        expected: usize,
        /// Parameters supplied.
        got: usize,
    },

    /// A parameter value is NaN or infinite.
    #[error("parameter {index} is not finite")]
    NonFiniteParameter {
        /// Offending parameter index.
        index: usize,
    },

    /// An evaluation was requested before `initialize()` succeeded.
    #[error("metric used before initialize()")]
    NotInitialized,

    /// An energy element produced a non-finite value or gradient.
    #[error("{element} {index} produced a non-finite energy")]
    NumericDegeneracy {
        /// Element kind.
        element: ElementKind,
        /// Element index within its kind.
        index: usize,
    },

    /// A shell vertex could not be matched against the target surface.
    #[error("no correspondence for moving vertex {vertex}")]
    CorrespondenceFailure {
        /// Shell vertex index.
        vertex: usize,
    },

    /// The optimizer never reached a finite parameter vector.
    #[error("registration produced no valid parameters: {0}")]
    NoValidParameters(String),
}

impl RegistrationError {
    /// Create an invalid parameter error.
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Classify this error.
    ///
    /// ```
    /// use mesh_registration::{ErrorKind, MeshRole, RegistrationError};
    ///
    /// let err = RegistrationError::NoCells { role: MeshRole::Moving };
    /// assert_eq!(err.kind(), ErrorKind::Configuration);
    /// ```
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyMesh { .. }
            | Self::NoCells { .. }
            | Self::InvalidFace { .. }
            | Self::CellLinksMissing { .. }
            | Self::NonFiniteVertex { .. }
            | Self::MissingVirtualDomain
            | Self::InvalidParameter(_)
            | Self::ParameterCountMismatch { .. }
            | Self::NonFiniteParameter { .. }
            | Self::NotInitialized => ErrorKind::Configuration,
            Self::NumericDegeneracy { .. } => ErrorKind::NumericDegeneracy,
            Self::CorrespondenceFailure { .. } => ErrorKind::CorrespondenceFailure,
            Self::NoValidParameters(_) => ErrorKind::Registration,
        }
    }
}

/// Result type for registration operations.
pub type RegistrationResult<T> = Result<T, RegistrationError>;
