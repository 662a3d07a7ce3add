use serde::Serialize;
use tracing::info;

use super::{fit, PlatformLimits, RenderedBlock};

/// One platform message worth of blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeliveryBatch {
    pub blocks: Vec<RenderedBlock>,
}

impl DeliveryBatch {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn omission_notice(omitted: usize, limit: usize) -> RenderedBlock {
    let noun = if omitted == 1 { "item" } else { "items" };
    let text = format!(
        "…{omitted} more {noun} omitted from this response. Try a narrower query to see the rest."
    );
    RenderedBlock::context(fit(&text, limit.max(1)).0)
}

/// Splits blocks into batches of at most `max_blocks_per_message`. Past the
/// `max_blocks_per_response` ceiling the tail is replaced by one notice
/// stating how many blocks were dropped.
pub fn plan(blocks: &[RenderedBlock], limits: &PlatformLimits) -> Vec<DeliveryBatch> {
    let per_message = limits.max_blocks_per_message.max(1);
    let ceiling = limits.max_blocks_per_response.max(1);

    let kept = if blocks.len() > ceiling {
        let keep = ceiling - 1;
        let omitted = blocks.len() - keep;
        info!(
            event_name = "render.overflow.blocks_omitted",
            total_blocks = blocks.len(),
            omitted,
            ceiling,
            "response exceeds block ceiling"
        );
        let mut kept = blocks[..keep].to_vec();
        kept.push(omission_notice(omitted, limits.max_text_per_block));
        kept
    } else {
        blocks.to_vec()
    };

    kept.chunks(per_message).map(|chunk| DeliveryBatch { blocks: chunk.to_vec() }).collect()
}
