//! Distance oracle abstraction (§3, §9).
//!
//! Rather than threading a concrete matrix type through every call site, the rest
//! of the crate talks to two narrow traits: [`FeatureSource`] (rows in feature
//! space, dense or sparse, consumed by D² seeding and the Lloyd/mini-batch
//! refiners) and [`DistanceMatrix`] (a precomputed nrows x ncols distance table,
//! consumed by the local-search k-median searcher). Each backend below implements
//! whichever of the two trait(s) its representation naturally supports.

use ndarray::Array2;
use sprs::CsMat;
use std::fs::File;
use std::path::Path;

use crate::error::{SumError, SumResult};

/// A single row of a feature matrix, dense or sparse.
///
/// Sparse rows are handed to measure evaluation by densifying locally
/// ([`RowView::to_dense`]): every measure in [`crate::measure`] is defined over
/// dense slices, so sparsity is purely a storage concern resolved at this boundary,
/// keeping the measure code free of two parallel implementations per measure.
pub enum RowView<'a> {
    Dense(&'a [f32]),
    Sparse {
        indices: &'a [usize],
        values: &'a [f32],
        dim: usize,
    },
}

impl<'a> RowView<'a> {
    pub fn dim(&self) -> usize {
        match self {
            RowView::Dense(v) => v.len(),
            RowView::Sparse { dim, .. } => *dim,
        }
    }

    pub fn sum(&self) -> f64 {
        match self {
            RowView::Dense(v) => v.iter().map(|x| *x as f64).sum(),
            RowView::Sparse { values, .. } => values.iter().map(|x| *x as f64).sum(),
        }
    }

    pub fn to_dense(&self) -> Vec<f32> {
        match self {
            RowView::Dense(v) => v.to_vec(),
            RowView::Sparse { indices, values, dim } => {
                let mut out = vec![0f32; *dim];
                for (idx, val) in indices.iter().zip(values.iter()) {
                    out[*idx] = *val;
                }
                out
            }
        }
    }
}

/// Rows in feature space: what D² seeding and the Lloyd/mini-batch refiners need.
pub trait FeatureSource: Sync {
    fn num_points(&self) -> usize;
    fn dim(&self) -> usize;
    fn row(&self, i: usize) -> RowView<'_>;

    fn row_sum(&self, i: usize) -> f64 {
        self.row(i).sum()
    }
}

/// Dense feature matrix, row-major: `ndarray::Array2<f32>` backed.
pub struct DenseMatrix {
    data: Array2<f32>,
}

impl DenseMatrix {
    pub fn new(data: Array2<f32>) -> Self {
        DenseMatrix { data }
    }
}

impl FeatureSource for DenseMatrix {
    fn num_points(&self) -> usize {
        self.data.nrows()
    }

    fn dim(&self) -> usize {
        self.data.ncols()
    }

    fn row(&self, i: usize) -> RowView<'_> {
        RowView::Dense(self.data.row(i).to_slice().expect("dense row must be contiguous"))
    }
}

/// Sparse feature matrix in compressed-sparse-row form: `sprs::CsMat<f32>` backed.
///
/// Ingestion from an external compressed-sparse representation (`SparseSource`
/// per §1) happens before this type is constructed; this crate only consumes
/// the already-materialized CSR matrix.
pub struct SparseMatrix {
    data: CsMat<f32>,
}

impl SparseMatrix {
    pub fn new(data: CsMat<f32>) -> SumResult<Self> {
        if !data.is_csr() {
            return Err(SumError::InvalidArgument(
                "SparseMatrix requires a CSR matrix".to_string(),
            ));
        }
        Ok(SparseMatrix { data })
    }
}

impl FeatureSource for SparseMatrix {
    fn num_points(&self) -> usize {
        self.data.rows()
    }

    fn dim(&self) -> usize {
        self.data.cols()
    }

    fn row(&self, i: usize) -> RowView<'_> {
        let range = self.data.indptr().outer_inds_sz(i);
        RowView::Sparse {
            indices: &self.data.indices()[range.start..range.end],
            values: &self.data.data()[range.start..range.end],
            dim: self.data.cols(),
        }
    }
}

/// A precomputed nrows x ncols distance table, accessed by row/column index.
///
/// This is the abstraction the local-search k-median searcher (§4.6) consumes:
/// rows are candidate centers, columns are all points. [`DenseDistanceMatrix`]
/// covers the in-core `PrecomputedDistanceMatrix` and `GraphShortestPath`
/// variants from §3 (both arrive as an already-computed table — shortest-path
/// computation itself is the out-of-scope `ShortestPaths` collaborator); [`DiskMat`]
/// covers the memory-mapped on-disk variant from §5.
pub trait DistanceMatrix: Sync {
    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;
    fn get(&self, i: usize, j: usize) -> f32;

    fn row(&self, i: usize) -> Vec<f32> {
        (0..self.ncols()).map(|j| self.get(i, j)).collect()
    }
}

/// In-core dense distance matrix. Constructed either directly from an
/// already-computed `Array2<f32>` (`PrecomputedDistanceMatrix`), or via
/// [`DenseDistanceMatrix::from_shortest_paths`] when the source is an
/// externally-computed all-pairs shortest-path table (`GraphShortestPath`).
pub struct DenseDistanceMatrix {
    data: Array2<f32>,
}

impl DenseDistanceMatrix {
    pub fn new(data: Array2<f32>) -> Self {
        DenseDistanceMatrix { data }
    }

    /// Wrap an all-pairs shortest-path matrix already computed by the external
    /// `ShortestPaths` collaborator (graph parsing + path precomputation are
    /// out of scope for this core per §1).
    pub fn from_shortest_paths(data: Array2<f32>) -> Self {
        DenseDistanceMatrix { data }
    }
}

impl DistanceMatrix for DenseDistanceMatrix {
    fn nrows(&self) -> usize {
        self.data.nrows()
    }

    fn ncols(&self) -> usize {
        self.data.ncols()
    }

    fn get(&self, i: usize, j: usize) -> f32 {
        self.data[[i, j]]
    }
}

/// Element width used to encode an on-disk distance matrix (§6: "f = 4 for
/// float32, 8 for float64, fixed by build").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatWidth {
    F32,
    F64,
}

impl FloatWidth {
    fn bytes(self) -> usize {
        match self {
            FloatWidth::F32 => 4,
            FloatWidth::F64 => 8,
        }
    }
}

/// Row-major, headerless, contiguous f32/f64 distance matrix on disk, accessed
/// through a read-only memory map (§5: "callers pass a file path; the core
/// treats it as a random-access 2D accessor and makes no assumption about
/// in-core residency").
pub struct DiskMat {
    mmap: memmap2::Mmap,
    nrows: usize,
    ncols: usize,
    width: FloatWidth,
}

impl DiskMat {
    /// Open `path` as a row-major (nrows, ncols) matrix of the given element width.
    /// There is no header: dimensions come from the caller, as specified in §6.
    pub fn open<P: AsRef<Path>>(path: P, nrows: usize, ncols: usize, width: FloatWidth) -> SumResult<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        let expected = nrows * ncols * width.bytes();
        if mmap.len() < expected {
            return Err(SumError::InvalidArgument(format!(
                "disk matrix file too small: need {expected} bytes for {nrows}x{ncols} at width {}, got {}",
                width.bytes(),
                mmap.len()
            )));
        }
        Ok(DiskMat {
            mmap,
            nrows,
            ncols,
            width,
        })
    }
}

impl DistanceMatrix for DiskMat {
    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn get(&self, i: usize, j: usize) -> f32 {
        let offset = (i * self.ncols + j) * self.width.bytes();
        match self.width {
            FloatWidth::F32 => {
                let bytes: [u8; 4] = self.mmap[offset..offset + 4].try_into().unwrap();
                f32::from_le_bytes(bytes)
            }
            FloatWidth::F64 => {
                let bytes: [u8; 8] = self.mmap[offset..offset + 8].try_into().unwrap();
                f64::from_le_bytes(bytes) as f32
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;

    #[test]
    fn dense_matrix_rows() {
        let m = DenseMatrix::new(array![[1.0f32, 2.0], [3.0, 4.0]]);
        assert_eq!(m.num_points(), 2);
        assert_eq!(m.dim(), 2);
        match m.row(1) {
            RowView::Dense(v) => assert_eq!(v, &[3.0, 4.0]),
            _ => panic!("expected dense row"),
        }
    }

    #[test]
    fn sparse_matrix_rows() {
        let mut tri = sprs::TriMat::new((2, 3));
        tri.add_triplet(0, 0, 1.5f32);
        tri.add_triplet(1, 2, 4.0f32);
        let csr: CsMat<f32> = tri.to_csr();
        let m = SparseMatrix::new(csr).unwrap();
        match m.row(0) {
            RowView::Sparse { indices, values, dim } => {
                assert_eq!(indices, &[0]);
                assert_eq!(values, &[1.5]);
                assert_eq!(dim, 3);
            }
            _ => panic!("expected sparse row"),
        }
    }

    #[test]
    fn disk_mat_roundtrip() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("sumcore_test_diskmat_{}.bin", std::process::id()));
        {
            let mut f = File::create(&path).unwrap();
            let data: [f32; 4] = [0.0, 1.0, 2.0, 3.0];
            for v in data {
                f.write_all(&v.to_le_bytes()).unwrap();
            }
        }
        let dm = DiskMat::open(&path, 2, 2, FloatWidth::F32).unwrap();
        assert_eq!(dm.get(0, 0), 0.0);
        assert_eq!(dm.get(1, 1), 3.0);
        std::fs::remove_file(&path).ok();
    }
}
