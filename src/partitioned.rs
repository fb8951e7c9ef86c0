// src/partitioned.rs

use crate::context::ExecutionContext;
use crate::error::{DecompositionError, Result, ThreadSafeStdError};
use log::{debug, trace};
use ndarray::{s, Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Identifies the exact row-block split scheme of a `PartitionedMatrix`:
/// the number of partitions and the ordered global row indices of each one.
///
/// Two tags are equal when they describe the same scheme, regardless of which
/// matrix they were taken from. Equal tags mean the two matrices can be zipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitioningTag {
    row_indices: Arc<[Arc<[usize]>]>,
}

impl PartitioningTag {
    pub fn num_partitions(&self) -> usize {
        self.row_indices.len()
    }

    /// Global row indices of partition `partition`, in block order.
    pub fn partition_rows(&self, partition: usize) -> Option<&[usize]> {
        self.row_indices.get(partition).map(|rows| &rows[..])
    }

    pub fn num_rows(&self) -> usize {
        self.row_indices.iter().map(|rows| rows.len()).sum()
    }

    fn describe_mismatch(&self, other: &PartitioningTag) -> String {
        if self.num_partitions() != other.num_partitions() {
            return format!(
                "left matrix has {} partitions, right matrix has {}",
                self.num_partitions(),
                other.num_partitions()
            );
        }
        let first_diff = self
            .row_indices
            .iter()
            .zip(other.row_indices.iter())
            .position(|(left, right)| left != right)
            .unwrap_or(0);
        format!(
            "row-index sequences differ in partition {} (left has {} rows, right has {})",
            first_diff,
            self.row_indices[first_diff].len(),
            other.row_indices[first_diff].len()
        )
    }
}

/// One row block: global row indices and the dense rows in that order.
#[derive(Debug, Clone)]
pub struct Partition {
    row_indices: Arc<[usize]>,
    block: Arc<Array2<f64>>,
}

impl Partition {
    pub fn row_indices(&self) -> &[usize] {
        &self.row_indices
    }

    pub fn block(&self) -> ArrayView2<'_, f64> {
        self.block.view()
    }

    pub fn nrows(&self) -> usize {
        self.row_indices.len()
    }
}

/// Caching request recorded by `PartitionedMatrix::persist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistLevel {
    MemoryOnly,
    MemoryAndDisk,
    DiskOnly,
}

impl PersistLevel {
    fn code(self) -> u8 {
        match self {
            PersistLevel::MemoryOnly => 1,
            PersistLevel::MemoryAndDisk => 2,
            PersistLevel::DiskOnly => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PersistLevel::MemoryOnly),
            2 => Some(PersistLevel::MemoryAndDisk),
            3 => Some(PersistLevel::DiskOnly),
            _ => None,
        }
    }
}

/// A logical m x n matrix split into row blocks.
///
/// Blocks are immutable and shared; every transform produces a new matrix. Row-preserving
/// transforms (`map_block`, zipped `map_block`) keep the partitioning tag, so their output
/// can be zipped with the input without moving rows.
#[derive(Debug, Clone)]
pub struct PartitionedMatrix {
    nrows: usize,
    ncols: usize,
    partitions: Arc<[Partition]>,
    tag: PartitioningTag,
    context: ExecutionContext,
    persist_level: Arc<AtomicU8>,
}

fn aggregation_error(partition: usize, source: ThreadSafeStdError) -> DecompositionError {
    DecompositionError::AggregationFailure {
        stage: format!("partition {}", partition),
        source,
    }
}

fn empty_reduction_error() -> DecompositionError {
    DecompositionError::AggregationFailure {
        stage: "all_reduce_small".to_string(),
        source: "matrix has no partitions to reduce".into(),
    }
}

impl PartitionedMatrix {
    /// Splits a dense matrix into `num_partitions` contiguous row ranges of near-equal size.
    /// The partition count is clamped to the number of rows.
    pub fn from_dense(matrix: ArrayView2<'_, f64>, num_partitions: usize, context: ExecutionContext) -> Result<Self> {
        if num_partitions == 0 {
            return Err(DecompositionError::Configuration(
                "number of partitions must be greater than 0".to_string(),
            ));
        }
        let nrows = matrix.nrows();
        let effective_partitions = if nrows == 0 { 1 } else { num_partitions.min(nrows) };
        let base_rows = nrows / effective_partitions;
        let remainder_rows = nrows % effective_partitions;

        let mut blocks = Vec::with_capacity(effective_partitions);
        let mut start = 0;
        for idx in 0..effective_partitions {
            let len = base_rows + usize::from(idx < remainder_rows);
            let rows: Vec<usize> = (start..start + len).collect();
            blocks.push((rows, matrix.slice(s![start..start + len, ..]).to_owned()));
            start += len;
        }
        debug!(
            "Split dense {}x{} matrix into {} partitions.",
            nrows,
            matrix.ncols(),
            effective_partitions
        );
        Self::from_row_blocks(blocks, matrix.ncols(), context)
    }

    /// Builds a matrix from explicit `(global row indices, block)` pairs.
    ///
    /// The row indices of all blocks together must be a permutation of `0..m`, and each
    /// block must have one row per index and `ncols` columns.
    pub fn from_row_blocks(
        blocks: Vec<(Vec<usize>, Array2<f64>)>,
        ncols: usize,
        context: ExecutionContext,
    ) -> Result<Self> {
        let nrows: usize = blocks.iter().map(|(rows, _)| rows.len()).sum();
        let mut seen = vec![false; nrows];
        for (idx, (rows, block)) in blocks.iter().enumerate() {
            if block.nrows() != rows.len() {
                return Err(DecompositionError::Configuration(format!(
                    "partition {} has {} row indices but {} rows",
                    idx,
                    rows.len(),
                    block.nrows()
                )));
            }
            if block.ncols() != ncols {
                return Err(DecompositionError::Configuration(format!(
                    "partition {} has {} columns, expected {}",
                    idx,
                    block.ncols(),
                    ncols
                )));
            }
            for &row in rows {
                if row >= nrows || seen[row] {
                    return Err(DecompositionError::Configuration(format!(
                        "row index {} in partition {} is out of range or duplicated (matrix has {} rows)",
                        row, idx, nrows
                    )));
                }
                seen[row] = true;
            }
        }

        let partitions: Vec<Partition> = blocks
            .into_iter()
            .map(|(rows, block)| Partition {
                row_indices: Arc::from(rows),
                block: Arc::new(block),
            })
            .collect();
        Ok(Self::assemble(nrows, ncols, partitions, context))
    }

    fn assemble(nrows: usize, ncols: usize, partitions: Vec<Partition>, context: ExecutionContext) -> Self {
        let tag = PartitioningTag {
            row_indices: partitions.iter().map(|p| Arc::clone(&p.row_indices)).collect(),
        };
        Self {
            nrows,
            ncols,
            partitions: partitions.into(),
            tag,
            context,
            persist_level: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partitioning_tag(&self) -> &PartitioningTag {
        &self.tag
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn is_zip_compatible(&self, other: &PartitionedMatrix) -> bool {
        self.tag == other.tag
    }

    /// Applies `f` to every block in parallel. `f` must return one row per input row;
    /// it may change the column count. The result keeps this matrix's partitioning tag.
    pub fn map_block<F>(&self, f: F) -> Result<PartitionedMatrix>
    where
        F: Fn(ArrayView2<'_, f64>) -> std::result::Result<Array2<f64>, ThreadSafeStdError> + Send + Sync,
    {
        let blocks = self.context.install(|| {
            self.partitions
                .par_iter()
                .enumerate()
                .map(|(idx, part)| f(part.block.view()).map_err(|source| aggregation_error(idx, source)))
                .collect::<Result<Vec<Array2<f64>>>>()
        })?;
        self.with_mapped_blocks(blocks)
    }

    /// Computes a small value per block and folds them with `combine` into one result.
    ///
    /// `combine` must be associative and commutative: blocks are reduced as a parallel tree
    /// in no particular order. This is the only synchronization point between partitions.
    pub fn all_reduce_small<T, L, C>(&self, f_local: L, combine: C) -> Result<T>
    where
        T: Send,
        L: Fn(ArrayView2<'_, f64>) -> std::result::Result<T, ThreadSafeStdError> + Send + Sync,
        C: Fn(T, T) -> T + Send + Sync,
    {
        if self.partitions.is_empty() {
            return Err(empty_reduction_error());
        }
        let reduced = self.context.install(|| {
            self.partitions
                .par_iter()
                .enumerate()
                .map(|(idx, part)| f_local(part.block.view()).map_err(|source| aggregation_error(idx, source)))
                .try_reduce_with(|left, right| Ok(combine(left, right)))
        });
        reduced.unwrap_or_else(|| Err(empty_reduction_error()))
    }

    /// Pairs this matrix's blocks with `other`'s blocks. Fails unless both matrices have
    /// structurally equal partitioning tags.
    pub fn zip<'a>(&'a self, other: &'a PartitionedMatrix) -> Result<ZippedPartitions<'a>> {
        if self.tag != other.tag {
            return Err(DecompositionError::PartitionMismatch(self.tag.describe_mismatch(&other.tag)));
        }
        Ok(ZippedPartitions { left: self, right: other })
    }

    /// Materializes the full matrix with every row at its global index.
    pub fn collect(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.nrows, self.ncols));
        for part in self.partitions.iter() {
            for (local_row, &global_row) in part.row_indices.iter().enumerate() {
                dense.row_mut(global_row).assign(&part.block.row(local_row));
            }
        }
        dense
    }

    /// Records a caching request for this matrix and its clones. Results never depend on it.
    pub fn persist(&self, level: PersistLevel) -> &Self {
        let previous = self.persist_level.swap(level.code(), Ordering::Relaxed);
        if previous != level.code() {
            debug!(
                "Persist requested for {}x{} matrix ({} partitions) at {:?}.",
                self.nrows,
                self.ncols,
                self.partitions.len(),
                level
            );
        }
        self
    }

    pub fn unpersist(&self) {
        self.persist_level.store(0, Ordering::Relaxed);
    }

    pub fn persist_level(&self) -> Option<PersistLevel> {
        PersistLevel::from_code(self.persist_level.load(Ordering::Relaxed))
    }

    fn with_mapped_blocks(&self, blocks: Vec<Array2<f64>>) -> Result<PartitionedMatrix> {
        let ncols = blocks.first().map_or(self.ncols, |block| block.ncols());
        for (idx, (part, block)) in self.partitions.iter().zip(blocks.iter()).enumerate() {
            if block.nrows() != part.nrows() {
                return Err(aggregation_error(
                    idx,
                    format!(
                        "block-local map changed the row count from {} to {}",
                        part.nrows(),
                        block.nrows()
                    )
                    .into(),
                ));
            }
            if block.ncols() != ncols {
                return Err(aggregation_error(
                    idx,
                    format!(
                        "block-local map produced {} columns, other partitions produced {}",
                        block.ncols(),
                        ncols
                    )
                    .into(),
                ));
            }
        }
        trace!(
            "map_block: {}x{} -> {}x{} over {} partitions",
            self.nrows,
            self.ncols,
            self.nrows,
            ncols,
            self.partitions.len()
        );

        let partitions: Vec<Partition> = self
            .partitions
            .iter()
            .zip(blocks)
            .map(|(part, block)| Partition {
                row_indices: Arc::clone(&part.row_indices),
                block: Arc::new(block),
            })
            .collect();
        Ok(PartitionedMatrix {
            nrows: self.nrows,
            ncols,
            partitions: partitions.into(),
            tag: self.tag.clone(),
            context: self.context.clone(),
            persist_level: Arc::new(AtomicU8::new(0)),
        })
    }

    /// Writes the matrix, including its partition layout, with bincode.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let stored = StoredPartitionedMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            partitions: self
                .partitions
                .iter()
                .map(|part| StoredPartition {
                    row_indices: part.row_indices.to_vec(),
                    block: part.block.as_ref().clone(),
                })
                .collect(),
        };
        let file = File::create(path.as_ref()).map_err(|e| {
            DecompositionError::Persistence(format!("Failed to create file at {:?}: {}", path.as_ref(), e))
        })?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(&stored, &mut writer, bincode::config::standard())
            .map_err(|e| DecompositionError::Persistence(format!("Failed to serialize partitioned matrix: {}", e)))?;
        writer
            .flush()
            .map_err(|e| DecompositionError::Persistence(format!("Failed to flush {:?}: {}", path.as_ref(), e)))?;
        Ok(())
    }

    /// Reads a matrix written by `save`. The loaded matrix has the same partitioning tag.
    pub fn load<P: AsRef<Path>>(path: P, context: ExecutionContext) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            DecompositionError::Persistence(format!("Failed to open file at {:?}: {}", path.as_ref(), e))
        })?;
        let mut reader = BufReader::new(file);
        let stored: StoredPartitionedMatrix =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard()).map_err(|e| {
                DecompositionError::Persistence(format!("Failed to deserialize partitioned matrix: {}", e))
            })?;

        let expected_rows = stored.nrows;
        let blocks = stored
            .partitions
            .into_iter()
            .map(|part| (part.row_indices, part.block))
            .collect();
        let matrix = Self::from_row_blocks(blocks, stored.ncols, context)?;
        if matrix.nrows != expected_rows {
            return Err(DecompositionError::Persistence(format!(
                "Loaded matrix has {} rows but header declares {}",
                matrix.nrows, expected_rows
            )));
        }
        Ok(matrix)
    }
}

#[derive(Serialize, Deserialize)]
struct StoredPartition {
    row_indices: Vec<usize>,
    block: Array2<f64>,
}

#[derive(Serialize, Deserialize)]
struct StoredPartitionedMatrix {
    nrows: usize,
    ncols: usize,
    partitions: Vec<StoredPartition>,
}

/// Two zip-compatible matrices viewed block by block.
#[derive(Debug, Clone, Copy)]
pub struct ZippedPartitions<'a> {
    left: &'a PartitionedMatrix,
    right: &'a PartitionedMatrix,
}

impl<'a> ZippedPartitions<'a> {
    /// Like `PartitionedMatrix::map_block`, over aligned block pairs. The result carries the shared tag.
    pub fn map_block<F>(&self, f: F) -> Result<PartitionedMatrix>
    where
        F: Fn(ArrayView2<'_, f64>, ArrayView2<'_, f64>) -> std::result::Result<Array2<f64>, ThreadSafeStdError>
            + Send
            + Sync,
    {
        let (left, right) = (self.left, self.right);
        let blocks = left.context.install(|| {
            left.partitions
                .par_iter()
                .zip(right.partitions.par_iter())
                .enumerate()
                .map(|(idx, (lp, rp))| {
                    f(lp.block.view(), rp.block.view()).map_err(|source| aggregation_error(idx, source))
                })
                .collect::<Result<Vec<Array2<f64>>>>()
        })?;
        left.with_mapped_blocks(blocks)
    }

    /// Like `PartitionedMatrix::all_reduce_small`, over aligned block pairs.
    pub fn all_reduce_small<T, L, C>(&self, f_local: L, combine: C) -> Result<T>
    where
        T: Send,
        L: Fn(ArrayView2<'_, f64>, ArrayView2<'_, f64>) -> std::result::Result<T, ThreadSafeStdError> + Send + Sync,
        C: Fn(T, T) -> T + Send + Sync,
    {
        let (left, right) = (self.left, self.right);
        if left.partitions.is_empty() {
            return Err(empty_reduction_error());
        }
        let reduced = left.context.install(|| {
            left.partitions
                .par_iter()
                .zip(right.partitions.par_iter())
                .enumerate()
                .map(|(idx, (lp, rp))| {
                    f_local(lp.block.view(), rp.block.view()).map_err(|source| aggregation_error(idx, source))
                })
                .try_reduce_with(|a, b| Ok(combine(a, b)))
        });
        reduced.unwrap_or_else(|| Err(empty_reduction_error()))
    }

    pub fn left(&self) -> &'a PartitionedMatrix {
        self.left
    }

    pub fn right(&self) -> &'a PartitionedMatrix {
        self.right
    }
}
