//! Kernel-state cache.
//!
//! The ME kernels ship as one blob holding several kernel binaries. Each
//! binary starts with a table of per-bucket start pointers. Program state for
//! a bucket is parsed from the header on first use and then served from the
//! cache for the rest of the session.
//!
//! Blob layout (little-endian):
//!
//! ```text
//! u32 count
//! u32 offsets[count + 1]      kernel k spans offsets[k]..offsets[k + 1]
//! kernel binaries...
//! ```
//!
//! Kernel binary layout:
//!
//! ```text
//! u32 start_pointer[2]        one per bucket, in 64-byte units
//! programs...
//! ```

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::binding::slots;
use super::curbe::CURBE_BYTES;
use super::{align_up, KernelBucket};
use crate::error::{MotionForgeError, Result};

/// Granularity of kernel start pointers.
pub const KERNEL_START_SHIFT: u32 = 6;

/// Binding-table entries are 4 bytes, padded to this alignment.
const BINDING_TABLE_ALIGNMENT: u32 = 64;

/// Bytes per start-pointer entry in a kernel header.
const START_POINTER_BYTES: usize = 4;

/// Hardware program state for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelStateEntry {
    pub bucket: KernelBucket,
    /// Byte offset of the program inside the blob.
    pub program_offset: u32,
    /// Program size in bytes.
    pub program_size: u32,
    /// Binding-table entries the kernel declares.
    pub binding_table_count: u32,
    /// Binding-table size in bytes.
    pub binding_table_size: u32,
    /// Constant-buffer length in bytes.
    pub curbe_length: u32,
}

impl KernelStateEntry {
    fn new(bucket: KernelBucket, program_offset: u32, program_size: u32) -> Self {
        let binding_table_count = slots::NUM_SURFACES;
        Self {
            bucket,
            program_offset,
            program_size,
            binding_table_count,
            binding_table_size: align_up(binding_table_count * 4, BINDING_TABLE_ALIGNMENT),
            curbe_length: CURBE_BYTES as u32,
        }
    }
}

/// Per-bucket kernel state, created lazily from the kernel blob.
#[derive(Debug, Clone)]
pub struct KernelStateCache {
    blob: Vec<u8>,
    kernel_id: u32,
    entries: BTreeMap<KernelBucket, KernelStateEntry>,
    header_reads: usize,
}

impl KernelStateCache {
    /// Wrap `blob` and select kernel `kernel_id` from it.
    pub fn new(blob: Vec<u8>, kernel_id: u32) -> Self {
        Self {
            blob,
            kernel_id,
            entries: BTreeMap::new(),
            header_reads: 0,
        }
    }

    /// Cached state for `bucket`, parsing the header on a miss.
    pub fn get_or_create(&mut self, bucket: KernelBucket) -> Result<KernelStateEntry> {
        if let Some(entry) = self.entries.get(&bucket) {
            return Ok(*entry);
        }

        self.header_reads += 1;
        let (kernel_start, kernel_end) = self.kernel_span()?;
        let (start, size) = self.bucket_span(bucket, kernel_start, kernel_end)?;
        let entry = KernelStateEntry::new(bucket, start, size);

        debug!(
            "Loaded ME kernel state: kernel_id={}, bucket={:?}, offset={}, size={}",
            self.kernel_id, bucket, start, size
        );
        self.entries.insert(bucket, entry);
        Ok(entry)
    }

    /// Program bytes for `entry`.
    pub fn program(&self, entry: &KernelStateEntry) -> Result<&[u8]> {
        let start = entry.program_offset as usize;
        let end = start + entry.program_size as usize;
        self.blob.get(start..end).ok_or_else(|| {
            MotionForgeError::KernelConfiguration(format!(
                "program {start}..{end} outside a {}-byte blob",
                self.blob.len()
            ))
        })
    }

    /// Header parses performed so far.
    pub fn header_reads(&self) -> usize {
        self.header_reads
    }

    /// Drop every cached entry.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            info!("Clearing {} cached ME kernel states", self.entries.len());
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn read_u32(&self, offset: usize, what: &str) -> Result<u32> {
        self.blob
            .get(offset..offset + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| {
                MotionForgeError::KernelConfiguration(format!(
                    "kernel blob truncated reading {what} at byte {offset}"
                ))
            })
    }

    /// Byte range of the selected kernel binary.
    fn kernel_span(&self) -> Result<(usize, usize)> {
        let count = self.read_u32(0, "kernel count")?;
        if self.kernel_id >= count {
            return Err(MotionForgeError::KernelConfiguration(format!(
                "kernel id {} not in a blob of {} kernels",
                self.kernel_id, count
            )));
        }
        let slot = 4 + self.kernel_id as usize * 4;
        let start = self.read_u32(slot, "kernel offset")? as usize;
        let end = self.read_u32(slot + 4, "kernel offset")? as usize;
        if end <= start {
            return Err(MotionForgeError::KernelConfiguration(format!(
                "kernel {} has zero size",
                self.kernel_id
            )));
        }
        if end > self.blob.len() {
            return Err(MotionForgeError::KernelConfiguration(format!(
                "kernel {} ends at byte {} past a {}-byte blob",
                self.kernel_id,
                end,
                self.blob.len()
            )));
        }
        Ok((start, end))
    }

    /// Absolute offset and size of `bucket`'s program.
    fn bucket_span(
        &self,
        bucket: KernelBucket,
        kernel_start: usize,
        kernel_end: usize,
    ) -> Result<(u32, u32)> {
        let kernel_size = kernel_end - kernel_start;
        let header_bytes = KernelBucket::ALL.len() * START_POINTER_BYTES;
        if kernel_size < header_bytes {
            return Err(MotionForgeError::KernelConfiguration(format!(
                "kernel {} is {} bytes, too small for its {}-byte header",
                self.kernel_id, kernel_size, header_bytes
            )));
        }

        let index = bucket.index();
        let start_of = |i: usize| -> Result<usize> {
            let pointer = self.read_u32(kernel_start + i * START_POINTER_BYTES, "start pointer")?;
            Ok((pointer as usize) << KERNEL_START_SHIFT)
        };
        let start = start_of(index)?;
        let next = if index + 1 < KernelBucket::ALL.len() {
            start_of(index + 1)?
        } else {
            kernel_size
        };

        if next <= start || next > kernel_size {
            return Err(MotionForgeError::KernelConfiguration(format!(
                "kernel {} bucket {:?} has an empty or out-of-range program ({}..{} of {})",
                self.kernel_id, bucket, start, next, kernel_size
            )));
        }
        let to_u32 = |v: usize| {
            u32::try_from(v).map_err(|_| {
                MotionForgeError::KernelConfiguration(format!("kernel offset {v} exceeds 32 bits"))
            })
        };
        Ok((to_u32(kernel_start + start)?, to_u32(next - start)?))
    }
}

/// Assemble a kernel blob from per-bucket programs.
///
/// Each entry of `kernels` holds the P and B programs of one kernel id.
/// Programs are padded to the start-pointer granularity.
pub fn build_kernel_blob(kernels: &[[&[u8]; 2]]) -> Vec<u8> {
    let granule = 1usize << KERNEL_START_SHIFT;
    let pad = |v: &mut Vec<u8>| v.resize(v.len().div_ceil(granule) * granule, 0);

    let binaries: Vec<Vec<u8>> = kernels
        .iter()
        .map(|programs| {
            let mut binary = vec![0u8; programs.len() * START_POINTER_BYTES];
            pad(&mut binary);
            for (i, program) in programs.iter().enumerate() {
                let pointer = (binary.len() >> KERNEL_START_SHIFT) as u32;
                binary[i * START_POINTER_BYTES..(i + 1) * START_POINTER_BYTES]
                    .copy_from_slice(&pointer.to_le_bytes());
                binary.extend_from_slice(program);
                pad(&mut binary);
            }
            binary
        })
        .collect();

    let mut blob = Vec::new();
    blob.extend_from_slice(&(kernels.len() as u32).to_le_bytes());
    let mut offset = 4 + (kernels.len() + 1) * 4;
    blob.extend_from_slice(&(offset as u32).to_le_bytes());
    for binary in &binaries {
        offset += binary.len();
        blob.extend_from_slice(&(offset as u32).to_le_bytes());
    }
    for binary in binaries {
        blob.extend_from_slice(&binary);
    }
    blob
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blob() -> Vec<u8> {
        build_kernel_blob(&[[&[0xAA; 100], &[0xBB; 40]], [&[0xCC; 64], &[0xDD; 200]]])
    }

    #[test]
    fn test_entry_constants() {
        let mut cache = KernelStateCache::new(sample_blob(), 0);
        let entry = cache.get_or_create(KernelBucket::Predicted).unwrap();
        assert_eq!(entry.binding_table_count, 27);
        assert_eq!(entry.binding_table_size, 128);
        assert_eq!(entry.curbe_length, 156);
    }

    #[test]
    fn test_bucket_spans() {
        let mut cache = KernelStateCache::new(sample_blob(), 0);
        let p = cache.get_or_create(KernelBucket::Predicted).unwrap();
        let b = cache.get_or_create(KernelBucket::BiPredicted).unwrap();
        // 100-byte program padded to 128; the last bucket takes the remainder.
        assert_eq!(p.program_size, 128);
        assert_eq!(b.program_size, 64);
        assert_eq!(b.program_offset, p.program_offset + 128);
        assert!(cache.program(&p).unwrap()[..100].iter().all(|&x| x == 0xAA));
        assert!(cache.program(&b).unwrap()[..40].iter().all(|&x| x == 0xBB));
    }

    #[test]
    fn test_second_kernel_id() {
        let mut cache = KernelStateCache::new(sample_blob(), 1);
        let b = cache.get_or_create(KernelBucket::BiPredicted).unwrap();
        assert_eq!(b.program_size, 256);
        assert!(cache.program(&b).unwrap()[..200].iter().all(|&x| x == 0xDD));
    }

    #[test]
    fn test_cache_hit_skips_header() {
        let mut cache = KernelStateCache::new(sample_blob(), 0);
        let first = cache.get_or_create(KernelBucket::BiPredicted).unwrap();
        let second = cache.get_or_create(KernelBucket::BiPredicted).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.header_reads(), 1);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        cache.get_or_create(KernelBucket::BiPredicted).unwrap();
        assert_eq!(cache.header_reads(), 2);
    }

    #[test]
    fn test_unknown_kernel_id() {
        let mut cache = KernelStateCache::new(sample_blob(), 2);
        assert!(matches!(
            cache.get_or_create(KernelBucket::Predicted),
            Err(MotionForgeError::KernelConfiguration(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_truncated_blob() {
        let mut blob = sample_blob();
        blob.truncate(6);
        let mut cache = KernelStateCache::new(blob, 0);
        assert!(cache
            .get_or_create(KernelBucket::Predicted)
            .unwrap_err()
            .is_configuration());

        let mut cache = KernelStateCache::new(Vec::new(), 0);
        assert!(cache.get_or_create(KernelBucket::Predicted).is_err());
    }

    #[test]
    fn test_zero_sized_kernel() {
        // One kernel whose start and end offsets coincide.
        let mut blob = Vec::new();
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&12u32.to_le_bytes());
        blob.extend_from_slice(&12u32.to_le_bytes());
        let mut cache = KernelStateCache::new(blob, 0);
        assert!(matches!(
            cache.get_or_create(KernelBucket::Predicted),
            Err(MotionForgeError::KernelConfiguration(_))
        ));
    }

    #[test]
    fn test_empty_bucket_program() {
        let blob = build_kernel_blob(&[[&[], &[0x11; 16]]]);
        let mut cache = KernelStateCache::new(blob, 0);
        assert!(cache.get_or_create(KernelBucket::Predicted).is_err());
        assert!(cache.get_or_create(KernelBucket::BiPredicted).is_ok());
    }
}
