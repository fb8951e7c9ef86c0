// Thin QR, stochastic SVD and stochastic PCA over row-partitioned matrices

#![doc = include_str!("../README.md")]

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod linalg_backends;
pub mod partitioned;
pub mod projection;
pub mod spca;
pub mod ssvd;
pub mod thin_qr;

#[cfg(test)]
mod partitioned_tests;

pub use config::DecompositionConfig;
pub use context::ExecutionContext;
pub use error::{DecompositionError, DecompositionWarning, Result, ThreadSafeStdError};
pub use linalg_backends::{LocalLinAlg, NdarrayLinAlgBackend};
pub use partitioned::{PartitionedMatrix, PartitioningTag, PersistLevel, ZippedPartitions};
pub use projection::{GaussianProjection, RandomProjection};
pub use spca::{stochastic_pca, PcaOutput, StochasticPca};
pub use ssvd::{stochastic_svd, SsvdOutput, StochasticSvd};
pub use thin_qr::{thin_qr, ThinQr, ThinQrOutput};
