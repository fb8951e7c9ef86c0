// src/partitioned_tests.rs
#![cfg(test)]
use crate::context::ExecutionContext;
use crate::error::DecompositionError;
use crate::partitioned::{PartitionedMatrix, PersistLevel};
use ndarray::{array, Array2};

fn sample_matrix() -> Array2<f64> {
    array![
        [1.0, 2.0, 3.0, 4.0],
        [2.0, 3.0, 4.0, 5.0],
        [3.0, -4.0, 5.0, 6.0],
        [4.0, 5.0, 6.0, 7.0],
        [8.0, 6.0, 7.0, 8.0],
    ]
}

fn split(matrix: &Array2<f64>, parts: usize) -> PartitionedMatrix {
    PartitionedMatrix::from_dense(matrix.view(), parts, ExecutionContext::global()).unwrap()
}

#[cfg(test)]
mod test_construction {
    use super::*;

    #[test]
    fn from_dense_splits_rows_contiguously() {
        let a = split(&sample_matrix(), 2);
        assert_eq!(a.dim(), (5, 4));
        assert_eq!(a.num_partitions(), 2);
        let tag = a.partitioning_tag();
        assert_eq!(tag.partition_rows(0).unwrap(), &[0, 1, 2]);
        assert_eq!(tag.partition_rows(1).unwrap(), &[3, 4]);
        assert_eq!(tag.num_rows(), 5);
        assert_eq!(a.collect(), sample_matrix());
    }

    #[test]
    fn partition_count_is_clamped_to_rows() {
        let a = split(&sample_matrix(), 12);
        assert_eq!(a.num_partitions(), 5);
        assert!(a.partitions().iter().all(|p| p.nrows() == 1));
    }

    #[test]
    fn zero_partitions_is_a_configuration_error() {
        let m = sample_matrix();
        let result = PartitionedMatrix::from_dense(m.view(), 0, ExecutionContext::global());
        assert!(matches!(result, Err(DecompositionError::Configuration(_))));
    }

    #[test]
    fn row_blocks_may_interleave_rows() {
        let m = sample_matrix();
        let blocks = vec![
            (vec![4, 0], array![[8.0, 6.0, 7.0, 8.0], [1.0, 2.0, 3.0, 4.0]]),
            (vec![2, 1, 3], array![[3.0, -4.0, 5.0, 6.0], [2.0, 3.0, 4.0, 5.0], [4.0, 5.0, 6.0, 7.0]]),
        ];
        let a = PartitionedMatrix::from_row_blocks(blocks, 4, ExecutionContext::global()).unwrap();
        assert_eq!(a.partitions()[0].row_indices(), &[4, 0]);
        assert_eq!(a.collect(), m);
    }

    #[test]
    fn duplicated_row_index_is_rejected() {
        let blocks = vec![
            (vec![0, 1], Array2::zeros((2, 3))),
            (vec![1], Array2::zeros((1, 3))),
        ];
        let result = PartitionedMatrix::from_row_blocks(blocks, 3, ExecutionContext::global());
        match result {
            Err(DecompositionError::Configuration(msg)) => assert!(msg.contains("duplicated")),
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn block_shape_must_match_indices() {
        let blocks = vec![(vec![0, 1], Array2::zeros((3, 2)))];
        assert!(PartitionedMatrix::from_row_blocks(blocks, 2, ExecutionContext::global()).is_err());
        let blocks = vec![(vec![0], Array2::zeros((1, 5)))];
        assert!(PartitionedMatrix::from_row_blocks(blocks, 2, ExecutionContext::global()).is_err());
    }

    #[test]
    fn dedicated_pool_runs_operations() {
        let context = ExecutionContext::with_num_threads(2).unwrap();
        assert_eq!(context.num_threads(), 2);
        let m = sample_matrix();
        let a = PartitionedMatrix::from_dense(m.view(), 3, context).unwrap();
        let total = a.all_reduce_small(|b| Ok(b.sum()), |x, y| x + y).unwrap();
        assert!((total - m.sum()).abs() < 1e-12);
        assert!(ExecutionContext::with_num_threads(0).is_err());
    }
}

#[cfg(test)]
mod test_map_and_reduce {
    use super::*;

    #[test]
    fn map_block_preserves_tag_and_changes_columns() {
        let a = split(&sample_matrix(), 2);
        let w = array![[1.0], [0.0], [0.0], [-1.0]];
        let projected = a.map_block(|block| Ok(block.dot(&w))).unwrap();
        assert_eq!(projected.dim(), (5, 1));
        assert_eq!(projected.partitioning_tag(), a.partitioning_tag());
        assert!(projected.is_zip_compatible(&a));
        assert_eq!(projected.collect(), sample_matrix().dot(&w));
    }

    #[test]
    fn map_block_may_not_drop_rows() {
        let a = split(&sample_matrix(), 2);
        let result = a.map_block(|block| Ok(Array2::zeros((block.nrows().saturating_sub(1), 2))));
        assert!(matches!(result, Err(DecompositionError::AggregationFailure { .. })));
    }

    #[test]
    fn failing_block_names_its_partition() {
        let a = split(&sample_matrix(), 2);
        let result = a.map_block(|block| {
            if block.nrows() == 2 {
                Err("boom".into())
            } else {
                Ok(block.to_owned())
            }
        });
        match result {
            Err(DecompositionError::AggregationFailure { stage, source }) => {
                assert_eq!(stage, "partition 1");
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("expected aggregation failure, got {:?}", other),
        }
    }

    #[test]
    fn all_reduce_small_computes_gram_matrix() {
        let m = sample_matrix();
        let a = split(&m, 3);
        let gram = a
            .all_reduce_small(|block| Ok(block.t().dot(&block)), |left, right| left + right)
            .unwrap();
        let expected = m.t().dot(&m);
        for (x, y) in gram.iter().zip(expected.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn reduction_result_is_independent_of_partition_count() {
        let m = sample_matrix();
        let sums: Vec<f64> = (1..=5)
            .map(|parts| {
                split(&m, parts)
                    .all_reduce_small(|b| Ok(b.iter().map(|v| v * v).sum::<f64>()), |x, y| x + y)
                    .unwrap()
            })
            .collect();
        for s in &sums {
            assert!((s - sums[0]).abs() < 1e-9);
        }
    }

    #[test]
    fn reducing_an_empty_matrix_fails() {
        let empty = PartitionedMatrix::from_row_blocks(Vec::new(), 3, ExecutionContext::global()).unwrap();
        assert_eq!(empty.num_partitions(), 0);
        let result = empty.all_reduce_small(|b| Ok(b.sum()), |x, y| x + y);
        assert!(matches!(result, Err(DecompositionError::AggregationFailure { .. })));
    }
}

#[cfg(test)]
mod test_zip {
    use super::*;

    #[test]
    fn structurally_equal_tags_zip() {
        let m = sample_matrix();
        let a = split(&m, 2);
        let b = split(&(&m * 2.0), 2);
        let zipped = a.zip(&b).unwrap();
        let inner = zipped
            .all_reduce_small(|x, y| Ok((&x * &y).sum()), |l, r| l + r)
            .unwrap();
        let expected = 2.0 * m.iter().map(|v| v * v).sum::<f64>();
        assert!((inner - expected).abs() < 1e-9);

        let diff = zipped.map_block(|x, y| Ok(&y - &x)).unwrap();
        assert_eq!(diff.partitioning_tag(), a.partitioning_tag());
        assert_eq!(diff.collect(), m);
    }

    #[test]
    fn different_partition_counts_do_not_zip() {
        let m = sample_matrix();
        let a = split(&m, 2);
        let b = split(&m, 3);
        match a.zip(&b) {
            Err(DecompositionError::PartitionMismatch(msg)) => assert!(msg.contains("2 partitions")),
            other => panic!("expected partition mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn same_count_different_rows_do_not_zip() {
        let m = sample_matrix();
        let a = split(&m, 2);
        let blocks = vec![
            (vec![0, 1], m.slice(ndarray::s![0..2, ..]).to_owned()),
            (vec![2, 3, 4], m.slice(ndarray::s![2..5, ..]).to_owned()),
        ];
        let b = PartitionedMatrix::from_row_blocks(blocks, 4, ExecutionContext::global()).unwrap();
        assert_eq!(a.collect(), b.collect());
        assert!(matches!(a.zip(&b), Err(DecompositionError::PartitionMismatch(_))));
    }
}

#[cfg(test)]
mod test_persistence {
    use super::*;

    #[test]
    fn persist_level_is_shared_by_clones_only() {
        let a = split(&sample_matrix(), 2);
        assert_eq!(a.persist_level(), None);
        let alias = a.clone();
        a.persist(PersistLevel::MemoryAndDisk);
        assert_eq!(alias.persist_level(), Some(PersistLevel::MemoryAndDisk));

        let derived = a.map_block(|b| Ok(b.to_owned())).unwrap();
        assert_eq!(derived.persist_level(), None);

        a.unpersist();
        assert_eq!(alias.persist_level(), None);
    }

    #[test]
    fn save_and_load_keep_partitioning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.bin");
        let blocks = vec![
            (vec![3, 0], array![[4.0, 5.0], [1.0, 2.0]]),
            (vec![1, 2], array![[2.0, 3.0], [3.0, -4.0]]),
        ];
        let a = PartitionedMatrix::from_row_blocks(blocks, 2, ExecutionContext::global()).unwrap();
        a.save(&path).unwrap();

        let loaded = PartitionedMatrix::load(&path, ExecutionContext::global()).unwrap();
        assert_eq!(loaded.partitioning_tag(), a.partitioning_tag());
        assert_eq!(loaded.collect(), a.collect());
        assert!(loaded.zip(&a).is_ok());
    }

    #[test]
    fn loading_a_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = PartitionedMatrix::load(dir.path().join("absent.bin"), ExecutionContext::global());
        assert!(matches!(result, Err(DecompositionError::Persistence(_))));
    }
}
