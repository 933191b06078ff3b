use async_trait::async_trait;

use crate::models::Frame;

/// Turns a picture into a code payload. `None` means "nothing found yet".
#[async_trait]
pub trait FrameDecoder: Send + Sync {
    async fn decode(&self, frame: Frame) -> Option<String>;
}

/// QR decoding via `rqrr`. Detection is CPU bound, so it runs on the
/// blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct QrFrameDecoder;

impl QrFrameDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode_now(frame: &Frame) -> Option<String> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            frame.width() as usize,
            frame.height() as usize,
            |x, y| frame.pixel(x as u32, y as u32),
        );
        prepared
            .detect_grids()
            .into_iter()
            .find_map(|grid| match grid.decode() {
                Ok((_, payload)) if !payload.is_empty() => Some(payload),
                Ok(_) => None,
                Err(err) => {
                    tracing::trace!(error = ?err, "Grid found but not decodable");
                    None
                }
            })
    }
}

#[async_trait]
impl FrameDecoder for QrFrameDecoder {
    async fn decode(&self, frame: Frame) -> Option<String> {
        match tokio::task::spawn_blocking(move || Self::decode_now(&frame)).await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "Decoder task failed");
                None
            }
        }
    }
}
