//! Scalar data types, operation kinds and the crate error type.

use thiserror::Error;

/// Element data type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Unsigned 8-bit integer (activations).
    U8,
    /// Signed 8-bit integer (weights).
    S8,
    /// Signed 32-bit integer (accumulation).
    S32,
    /// IEEE-754 single precision.
    F32,
    /// IEEE-754 half precision. Never accepted by the int8 primitive.
    F16,
    /// bfloat16. Never accepted by the int8 primitive.
    Bf16,
}

impl DataType {
    /// Size of one element in bytes.
    #[inline]
    pub fn size_of(self) -> usize {
        match self {
            DataType::U8 | DataType::S8 => 1,
            DataType::F16 | DataType::Bf16 => 2,
            DataType::S32 | DataType::F32 => 4,
        }
    }

    #[inline]
    pub fn is_integral(self) -> bool {
        matches!(self, DataType::U8 | DataType::S8 | DataType::S32)
    }
}

/// Propagation kind of the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropKind {
    ForwardTraining,
    ForwardInference,
    BackwardData,
    BackwardWeights,
}

impl PropKind {
    #[inline]
    pub fn is_forward(self) -> bool {
        matches!(self, PropKind::ForwardTraining | PropKind::ForwardInference)
    }
}

/// Convolution algorithm requested by the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgKind {
    ConvolutionDirect,
    ConvolutionWinograd,
}

#[derive(Debug, Error)]
pub enum ConvError {
    /// The descriptor/attribute combination is not supported by this
    /// primitive. Callers are expected to fall back to another implementation.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("out of memory: failed to allocate {bytes} bytes for {what}")]
    OutOfMemory { what: &'static str, bytes: usize },
    #[error("thread pool construction failed: {0}")]
    ThreadPool(String),
}

pub type ConvResult<T> = Result<T, ConvError>;

impl ConvError {
    /// Fatal errors are resource failures, not properties of the descriptor.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConvError::OutOfMemory { .. } | ConvError::ThreadPool(_))
    }

    pub fn is_unimplemented(&self) -> bool {
        matches!(self, ConvError::Unimplemented(_))
    }
}

impl From<rayon::ThreadPoolBuildError> for ConvError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        ConvError::ThreadPool(err.to_string())
    }
}
