//! Per-variable storage layout
//!
//! [`VariableEncoder`] turns a variable and the shape it will have in the
//! archive into [`ArrayMetadata`]: chunk lengths, compression and, for
//! packed variables, the scale-offset filter and fill value.
//!
//! Chunk length per axis is taken from the first of:
//!
//! 1. the configured [`ChunkPlan`]
//! 2. the chunking the variable was read with
//! 3. the full axis length
//!
//! and clamped to `1..=length`.

use crate::config::ConverterConfig;
use crate::packing::Packer;
use gridstore_core::{ChunkPlan, Result, Variable};
use gridstore_storage::{ArrayMetadata, Codec, Compression};

/// Builds array metadata for variables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableEncoder {
    plan: ChunkPlan,
    compression: Compression,
    packer: Option<Packer>,
}

impl VariableEncoder {
    /// Encoder with the given chunk plan and compression, no packing
    pub fn new(plan: ChunkPlan, compression: Compression) -> Self {
        Self {
            plan,
            compression,
            packer: None,
        }
    }

    /// Encoder for `config`, using `plan` in place of the configured chunking
    pub fn from_config(config: &ConverterConfig, plan: ChunkPlan) -> Result<Self> {
        let packer = if config.packing.enabled {
            Some(Packer::new(config.packing.bits)?)
        } else {
            None
        };
        Ok(Self {
            plan,
            compression: config.compression.method,
            packer,
        })
    }

    /// Enable packing, builder style
    pub fn with_packer(mut self, packer: Packer) -> Self {
        self.packer = Some(packer);
        self
    }

    /// Chunk plan in use
    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    /// Chunk lengths for `var` stored with `shape`
    pub fn chunks_for(&self, var: &Variable, shape: &[usize]) -> Vec<usize> {
        var.dims
            .iter()
            .zip(shape)
            .enumerate()
            .map(|(i, (dim, &len))| {
                let chosen = self
                    .plan
                    .get(dim)
                    .or_else(|| var.chunks.as_ref().and_then(|c| c.get(i).copied()))
                    .unwrap_or(len);
                chosen.clamp(1, len.max(1))
            })
            .collect()
    }

    /// Metadata for `var` stored with `shape`
    pub fn metadata(&self, var: &Variable, shape: Vec<usize>) -> Result<ArrayMetadata> {
        let chunks = self.chunks_for(var, &shape);
        let mut codec = Codec::new(self.compression);
        let mut fill_value = None;
        if let Some(packer) = &self.packer {
            if let Some(packed) = packer.encoding(var)? {
                codec = codec.with_scale_offset(packed.filter);
                fill_value = Some(packed.fill_value);
            }
        }
        Ok(ArrayMetadata::new(var.dims.clone(), shape, chunks, var.dtype)
            .with_codec(codec)
            .with_fill_value(fill_value)
            .with_attributes(var.attrs.clone()))
    }
}
