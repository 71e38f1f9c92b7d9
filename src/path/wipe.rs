use std::io::SeekFrom;

use rand::seq::SliceRandom;
use rand::RngCore;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::error::{Access, FsError, Result};
use crate::path::Entry;

pub const WIPE_BLOCK_SIZE: u64 = 4096;

/// Data written by a wipe pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillSource {
    Zero,
    Random,
}

impl Entry {
    /// Create (or replace) the file as `size` bytes of fill data, written
    /// block-wise. See `shred_in_place` for the block ordering contract.
    pub async fn initialize(
        &self,
        size: u64,
        source: FillSource,
        randomize_order: bool,
        passes: u32,
    ) -> Result<()> {
        self.check_closed()?;
        self.restrictions.check(&self.source, Access::Write)?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(&self.source)
            .await
            .map_err(|io| {
                FsError::filesystem_io(format!("cannot initialize {}", self.source.display()), io)
            })?;
        file.set_len(size).await.map_err(|io| FsError::FileActionFailed {
            action: "truncate",
            path: self.source.clone(),
            source: io,
        })?;

        self.overwrite(&mut file, size, source, randomize_order, passes)
            .await
    }

    /// Overwrite the existing file contents in place. The plan covers the
    /// full size including a final partial block; the very first block is
    /// always rewritten first so header-sniffing tools lose their anchor
    /// before anything else happens, then the remaining blocks are visited
    /// sequentially or in a random permutation.
    pub async fn shred_in_place(
        &self,
        source: FillSource,
        randomize_order: bool,
        passes: u32,
    ) -> Result<()> {
        self.check_closed()?;
        self.restrictions.check(&self.source, Access::Write)?;

        let size = tokio::fs::metadata(&self.source)
            .await
            .map_err(|_| FsError::FileNotExist {
                path: self.source.clone(),
            })?
            .len();

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.source)
            .await
            .map_err(|io| {
                FsError::filesystem_io(format!("cannot open {} for wiping", self.source.display()), io)
            })?;

        self.overwrite(&mut file, size, source, randomize_order, passes)
            .await
    }

    async fn overwrite(
        &self,
        file: &mut tokio::fs::File,
        size: u64,
        source: FillSource,
        randomize_order: bool,
        passes: u32,
    ) -> Result<()> {
        let blocks = block_plan(size, WIPE_BLOCK_SIZE);
        if blocks.is_empty() {
            return Ok(());
        }

        for _ in 0..passes.max(1) {
            for &(offset, length) in &visit_order(&blocks, randomize_order) {
                let mut data = vec![0u8; length as usize];
                if source == FillSource::Random {
                    rand::thread_rng().fill_bytes(&mut data);
                }

                file.seek(SeekFrom::Start(offset))
                    .await
                    .map_err(|io| FsError::FileActionFailed {
                        action: "seek",
                        path: self.source.clone(),
                        source: io,
                    })?;
                file.write_all(&data)
                    .await
                    .map_err(|io| FsError::FileActionFailed {
                        action: "write",
                        path: self.source.clone(),
                        source: io,
                    })?;
            }
        }

        file.sync_all().await.map_err(|io| FsError::FileActionFailed {
            action: "sync",
            path: self.source.clone(),
            source: io,
        })?;
        Ok(())
    }
}

/// (offset, length) pairs covering `size` bytes in `block_size` steps, the
/// last block truncated to the remainder.
fn block_plan(size: u64, block_size: u64) -> Vec<(u64, u64)> {
    let mut blocks = Vec::new();
    let mut offset = 0;
    while offset < size {
        let length = block_size.min(size - offset);
        blocks.push((offset, length));
        offset += length;
    }
    blocks
}

/// The first block always comes first; the rest keep their order or get
/// shuffled.
fn visit_order(blocks: &[(u64, u64)], randomize: bool) -> Vec<(u64, u64)> {
    let mut order = blocks.to_vec();
    if randomize && order.len() > 2 {
        order[1..].shuffle(&mut rand::thread_rng());
    }
    order
}
