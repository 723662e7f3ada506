//! Partitioned, product-quantized ANN index (IVF-PQ).
//!
//! Vectors are clustered into partitions by K-means; each partition keeps a
//! posting list of `(record id, PQ code)` pairs where the code compresses the
//! record's residual from the partition centroid. A query probes the
//! `nprobes` closest partitions and ranks their postings with table-driven
//! approximate distances. Approximate distances only select candidates; the
//! search executor recomputes exact distances before anything is reported.
//!
//! The index is rebuilt wholesale and never mutated incrementally. Records
//! with ids above [`IvfPqIndex::indexed_through`] were appended after the
//! build and form the overflow set scanned exhaustively.
//!
//! # File Format
//! - Header (32 bytes): magic, version, dimension, metric, partition count,
//!   sub-vector count, indexed-through id, reserved
//! - Codebooks: per sub-space `start, len, count` then `count * len` f32
//! - Partitions: centroid f32s, posting count, ids, then `count * M` codes

use std::borrow::Cow;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::{RagError, RagResult};
use crate::vector::clustering::{ClusteringError, KMeansParams, kmeans_clustering};
use crate::vector::codec::{ByteReader, put_f32s, put_u32};
use crate::vector::distance;
use crate::vector::quantization::{DistanceTable, ProductQuantizer, Subspace};
use crate::vector::types::{Metric, PartitionId, RecordId, VectorDimension};

/// Magic bytes to identify index files.
const MAGIC_BYTES: &[u8; 4] = b"RIVF";

/// Current index format version.
const INDEX_VERSION: u32 = 1;

/// Upper bound on residuals used to train the quantizer.
const TRAINING_SAMPLE_LIMIT: usize = 16_384;

/// Build parameters of an index.
#[derive(Debug, Clone, Copy)]
pub struct IndexParams {
    pub num_partitions: usize,
    pub num_sub_vectors: usize,
    pub metric: Metric,
    /// Fixed seed for reproducible builds; `None` draws one from the OS.
    pub seed: Option<u64>,
    pub deadline: Option<Instant>,
}

/// One inverted list: a centroid and its quantized postings.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    centroid: Vec<f32>,
    ids: Vec<RecordId>,
    /// `ids.len() * num_sub_vectors` bytes.
    codes: Vec<u8>,
}

impl Partition {
    #[must_use]
    pub fn centroid(&self) -> &[f32] {
        &self.centroid
    }

    #[must_use]
    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Posting list as `(record id, code)` pairs.
    pub fn postings(&self, num_sub_vectors: usize) -> impl Iterator<Item = (RecordId, &[u8])> {
        self.ids
            .iter()
            .copied()
            .zip(self.codes.chunks_exact(num_sub_vectors.max(1)))
    }
}

/// IVF-PQ index over one tenant's records.
#[derive(Debug, Clone, PartialEq)]
pub struct IvfPqIndex {
    dimension: VectorDimension,
    metric: Metric,
    partitions: Vec<Partition>,
    quantizer: ProductQuantizer,
    indexed_through: u32,
}

impl IvfPqIndex {
    /// Builds an index over `records`, which must be sorted by id.
    ///
    /// Fails with `InsufficientData` when there are fewer records than
    /// partitions; callers fall back to exhaustive scanning.
    pub fn build(
        records: &[(RecordId, &[f32])],
        dimension: VectorDimension,
        params: IndexParams,
    ) -> RagResult<Self> {
        let started = Instant::now();

        if params.num_partitions == 0 {
            return Err(RagError::Config(
                "index.num_partitions must be at least 1".to_string(),
            ));
        }
        if records.len() < params.num_partitions {
            return Err(RagError::InsufficientData {
                records: records.len(),
                partitions: params.num_partitions,
            });
        }
        for (_, vector) in records {
            dimension.validate_vector(vector)?;
        }

        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let space: Vec<Cow<'_, [f32]>> = records
            .iter()
            .map(|(_, v)| to_index_space(params.metric, v))
            .collect();
        let space_refs: Vec<&[f32]> = space.iter().map(|v| v.as_ref()).collect();

        let kmeans = KMeansParams::new(params.num_partitions, params.metric)
            .with_deadline(params.deadline);
        let clustering = kmeans_clustering(&space_refs, kmeans, &mut rng).map_err(|e| match e {
            ClusteringError::DeadlineExceeded { .. } => RagError::BuildTimeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
            ClusteringError::InvalidClusterCount { k, vectors } => RagError::InsufficientData {
                records: vectors,
                partitions: k,
            },
            other => RagError::Config(format!("partition clustering failed: {other}")),
        })?;

        let residuals: Vec<Vec<f32>> = space_refs
            .iter()
            .zip(&clustering.assignments)
            .map(|(v, p)| residual(v, &clustering.centroids[p.index()]))
            .collect();

        let training: Vec<Vec<f32>> = if residuals.len() <= TRAINING_SAMPLE_LIMIT {
            residuals.clone()
        } else {
            rand::seq::index::sample(&mut rng, residuals.len(), TRAINING_SAMPLE_LIMIT)
                .into_iter()
                .map(|i| residuals[i].clone())
                .collect()
        };
        let quantizer = ProductQuantizer::train(
            &training,
            dimension.get(),
            params.num_sub_vectors,
            &mut rng,
        )?;

        if params.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(RagError::BuildTimeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }

        let codes = quantizer.encode_batch(&residuals);
        let mut partitions: Vec<Partition> = clustering
            .centroids
            .into_iter()
            .map(|centroid| Partition {
                centroid,
                ids: Vec::new(),
                codes: Vec::new(),
            })
            .collect();

        for (((id, _), assignment), code) in records
            .iter()
            .zip(&clustering.assignments)
            .zip(codes)
        {
            let partition = &mut partitions[assignment.index()];
            partition.ids.push(*id);
            partition.codes.extend_from_slice(&code);
        }

        let indexed_through = records.iter().map(|(id, _)| id.get()).max().unwrap_or(0);

        tracing::debug!(
            "Built index: {} records, {} partitions, {} sub-vectors, {} k-means iterations in {:?}",
            records.len(),
            partitions.len(),
            quantizer.num_sub_vectors(),
            clustering.iterations,
            started.elapsed()
        );

        Ok(Self {
            dimension,
            metric: params.metric,
            partitions,
            quantizer,
            indexed_through,
        })
    }

    /// Ranks partitions by centroid distance and returns the closest
    /// `nprobes` (clamped to `[1, num_partitions]`).
    ///
    /// Lower partition ids win exact distance ties.
    #[must_use]
    pub fn nearest_partitions(&self, query: &[f32], nprobes: usize) -> Vec<PartitionId> {
        let query = to_index_space(self.metric, query);
        let nprobes = nprobes.clamp(1, self.partitions.len().max(1));

        let mut ranked: Vec<(f32, PartitionId)> = self
            .partitions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                (
                    distance::distance(self.metric, &query, &p.centroid),
                    PartitionId::new(i as u32),
                )
            })
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        ranked.truncate(nprobes);
        ranked.into_iter().map(|(_, id)| id).collect()
    }

    /// Builds the approximate-distance table for scanning `partition`.
    #[must_use]
    pub fn distance_table(&self, query: &[f32], partition: PartitionId) -> DistanceTable {
        let query = to_index_space(self.metric, query);
        self.quantizer.distance_table(
            self.metric,
            &query,
            &self.partitions[partition.index()].centroid,
        )
    }

    #[must_use]
    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(id.index())
    }

    #[must_use]
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    #[must_use]
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn num_sub_vectors(&self) -> usize {
        self.quantizer.num_sub_vectors()
    }

    #[must_use]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Highest record id covered by this build.
    #[must_use]
    pub fn indexed_through(&self) -> u32 {
        self.indexed_through
    }

    /// Whether `id` was appended after this build.
    #[must_use]
    pub fn is_overflow(&self, id: RecordId) -> bool {
        id.get() > self.indexed_through
    }

    /// Number of postings across all partitions.
    #[must_use]
    pub fn indexed_count(&self) -> usize {
        self.partitions.iter().map(Partition::len).sum()
    }

    /// Writes the index atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> RagResult<()> {
        let m = self.num_sub_vectors();
        let mut buf = Vec::new();

        buf.extend_from_slice(MAGIC_BYTES);
        put_u32(&mut buf, INDEX_VERSION);
        put_u32(&mut buf, self.dimension.get() as u32);
        buf.extend_from_slice(&[self.metric.to_byte(), 0, 0, 0]);
        put_u32(&mut buf, self.partitions.len() as u32);
        put_u32(&mut buf, m as u32);
        put_u32(&mut buf, self.indexed_through);
        put_u32(&mut buf, 0);

        for s in &self.quantizer.subspaces {
            put_u32(&mut buf, s.start as u32);
            put_u32(&mut buf, s.len as u32);
            put_u32(&mut buf, (s.codewords.len() / s.len.max(1)) as u32);
            put_f32s(&mut buf, &s.codewords);
        }

        for p in &self.partitions {
            put_f32s(&mut buf, &p.centroid);
            put_u32(&mut buf, p.ids.len() as u32);
            for id in &p.ids {
                buf.extend_from_slice(&id.to_bytes());
            }
            buf.extend_from_slice(&p.codes);
        }

        let tmp = path.with_extension("ivf.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        };
        write().map_err(|e| RagError::storage(path, e))
    }

    /// Loads an index written by [`IvfPqIndex::save`].
    ///
    /// Returns `Ok(None)` when no index file exists.
    pub fn load(path: &Path) -> RagResult<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RagError::storage(path, e)),
        };

        let mut r = ByteReader::new(&bytes, path);
        if r.take(4)? != MAGIC_BYTES {
            return Err(RagError::corrupted(path, "invalid magic bytes"));
        }
        let version = r.u32()?;
        if version != INDEX_VERSION {
            return Err(RagError::corrupted(
                path,
                format!("unsupported index version {version}, expected {INDEX_VERSION}"),
            ));
        }
        let dim = r.u32()? as usize;
        let dimension = VectorDimension::new(dim)
            .map_err(|_| RagError::corrupted(path, "zero dimension"))?;
        let metric_byte = r.take(4)?[0];
        let metric = Metric::from_byte(metric_byte)
            .ok_or_else(|| RagError::corrupted(path, format!("unknown metric {metric_byte}")))?;
        let num_partitions = r.u32()? as usize;
        let m = r.u32()? as usize;
        let indexed_through = r.u32()?;
        let _reserved = r.u32()?;

        let mut subspaces = Vec::with_capacity(m);
        for _ in 0..m {
            let start = r.u32()? as usize;
            let len = r.u32()? as usize;
            let count = r.u32()? as usize;
            if len == 0 || start + len > dim || count == 0 || count > 256 {
                return Err(RagError::corrupted(path, "invalid sub-space header"));
            }
            let codewords = r.f32s(count * len)?;
            subspaces.push(Subspace {
                start,
                len,
                codewords,
            });
        }

        let mut partitions = Vec::with_capacity(num_partitions);
        for _ in 0..num_partitions {
            let centroid = r.f32s(dim)?;
            let n = r.u32()? as usize;
            let mut ids = Vec::with_capacity(n);
            for _ in 0..n {
                let b = r.take(4)?;
                let id = RecordId::from_bytes([b[0], b[1], b[2], b[3]])
                    .ok_or_else(|| RagError::corrupted(path, "zero record id in posting list"))?;
                ids.push(id);
            }
            let codes = r.take(n * m)?.to_vec();
            partitions.push(Partition {
                centroid,
                ids,
                codes,
            });
        }

        if !r.is_empty() {
            return Err(RagError::corrupted(path, "trailing bytes after partitions"));
        }

        Ok(Some(Self {
            dimension,
            metric,
            partitions,
            quantizer: ProductQuantizer {
                dimension: dim,
                subspaces,
            },
            indexed_through,
        }))
    }
}

/// Maps a raw embedding into the space the index is trained in.
pub(crate) fn to_index_space(metric: Metric, vector: &[f32]) -> Cow<'_, [f32]> {
    match metric {
        Metric::Cosine => Cow::Owned(distance::normalized(vector)),
        Metric::L2 | Metric::Dot => Cow::Borrowed(vector),
    }
}

fn residual(vector: &[f32], centroid: &[f32]) -> Vec<f32> {
    vector.iter().zip(centroid).map(|(v, c)| v - c).collect()
}
