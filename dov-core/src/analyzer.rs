//! Frame analyzer: finds and decodes a frame in a raw capture.
//!
//! Header lookup cascades through three searches, stopping at the first
//! header that parses and passes the length checks:
//!
//! 1. around the detector's offset (radius 2), if the markers were found;
//! 2. around the last offset that worked (radius 4), if there is one;
//! 3. around the origin (radius 8).
//!
//! A successful lookup becomes the new cached offset. Failure anywhere is
//! a plain `None`: most captures taken between display refreshes are
//! blurred, so misses are only traced.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::codec::FrameCodec;
use crate::detector::{DetectorConfig, FrameDetector, Offset};
use crate::header::{FrameHeader, FrameType};
use crate::image::CarrierImage;
use crate::layout::Layout;
use crate::payload::LogicalFrame;

const DETECTED_RADIUS: i32 = 2;
const CACHED_RADIUS: i32 = 4;
const ORIGIN_RADIUS: i32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Radius of the extra search when a DATA CRC fails; 0 disables it.
    pub payload_retry_range: i32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            payload_retry_range: 0,
        }
    }
}

/// A header located in a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderMatch {
    pub header: FrameHeader,
    pub offset: Offset,
    /// The header was read from the rescaled scratch image, so the
    /// payload must be read from there as well.
    pub rescaled: bool,
}

pub struct FrameAnalyzer {
    layout: Layout,
    codec: FrameCodec,
    detector: FrameDetector,
    config: AnalyzerConfig,
    scratch: Option<CarrierImage>,
    last_offset: Option<Offset>,
}

impl FrameAnalyzer {
    pub fn new(layout: Layout, detector: DetectorConfig, config: AnalyzerConfig) -> Self {
        Self {
            layout,
            codec: FrameCodec::new(layout),
            detector: FrameDetector::new(layout, detector),
            config,
            scratch: None,
            last_offset: None,
        }
    }

    /// Offset of the most recent successful decode.
    pub fn last_offset(&self) -> Option<Offset> {
        self.last_offset
    }

    /// Forget the cached offset.
    pub fn reset(&mut self) {
        self.last_offset = None;
    }

    /// Locate and parse the header only.
    pub fn analyze_header(&mut self, image: &CarrierImage) -> Option<HeaderMatch> {
        let rescaled = self.normalize(image);
        let target = match (rescaled, self.scratch.as_ref()) {
            (true, Some(scratch)) => scratch,
            _ => image,
        };

        let mut found = None;
        if let Some(detected) = self.detector.detect(target) {
            found = search_header(&self.codec, target, detected, DETECTED_RADIUS);
        }
        if found.is_none() {
            if let Some(last) = self.last_offset {
                found = search_header(&self.codec, target, last, CACHED_RADIUS);
            }
        }
        if found.is_none() {
            found = search_header(&self.codec, target, Offset::ZERO, ORIGIN_RADIUS);
        }

        let Some((header, offset)) = found else {
            trace!("no frame header found");
            return None;
        };
        self.last_offset = Some(offset);
        Some(HeaderMatch {
            header,
            offset,
            rescaled,
        })
    }

    /// Decode the payload for a header found by
    /// [`analyze_header`](Self::analyze_header) on the same `image`.
    ///
    /// DATA payloads are CRC-checked and returned without the CRC; other
    /// kinds are returned raw, empty when the header declares no payload.
    pub fn decode_payload(&mut self, image: &CarrierImage, found: &HeaderMatch) -> Option<Vec<u8>> {
        let target = match (found.rescaled, self.scratch.as_ref()) {
            (true, Some(scratch)) => scratch,
            _ => image,
        };
        let len = found.header.data_length as usize;

        if found.header.frame_type != FrameType::Data {
            if len == 0 {
                return Some(Vec::new());
            }
            return self.codec.decode_data(target, found.offset, len);
        }

        if let Some(chunk) = self.codec.decode_data_with_crc(target, found.offset, len) {
            return Some(chunk);
        }
        let range = self.config.payload_retry_range;
        if range <= 0 {
            return None;
        }
        for (dx, dy) in neighbourhood(range) {
            let offset = Offset::new(found.offset.x + dx, found.offset.y + dy);
            if let Some(chunk) = self.codec.decode_data_with_crc(target, offset, len) {
                trace!(?offset, "DATA payload recovered at shifted offset");
                self.last_offset = Some(offset);
                return Some(chunk);
            }
        }
        None
    }

    /// Header lookup and payload decode in one step.
    pub fn analyze(&mut self, image: &CarrierImage) -> Option<LogicalFrame> {
        let found = self.analyze_header(image)?;
        let payload = self.decode_payload(image, &found)?;
        LogicalFrame::from_parts(found.header.frame_type, found.header.frame_index, payload)
    }

    /// Rescale into the scratch buffer when `image` is not at the
    /// canonical resolution. Returns whether the scratch image is in use.
    fn normalize(&mut self, image: &CarrierImage) -> bool {
        let (w, h) = (self.layout.frame_width(), self.layout.frame_height());
        if image.width() == w && image.height() == h {
            return false;
        }
        let reusable = self
            .scratch
            .as_ref()
            .is_some_and(|s| s.width() == w && s.height() == h && s.format() == image.format());
        if !reusable {
            self.scratch = Some(CarrierImage::new(w, h, image.format()));
        }
        if let Some(scratch) = self.scratch.as_mut() {
            image.resize_nearest_into(scratch);
        }
        true
    }
}

/// Try `base` first, then every other offset in the square of `radius`
/// around it, row by row.
fn search_header(
    codec: &FrameCodec,
    image: &CarrierImage,
    base: Offset,
    radius: i32,
) -> Option<(FrameHeader, Offset)> {
    std::iter::once((0, 0))
        .chain(neighbourhood(radius))
        .map(|(dx, dy)| Offset::new(base.x + dx, base.y + dy))
        .find_map(|offset| codec.decode_header(image, offset).map(|h| (h, offset)))
}

/// The square of `radius` in row-major order, without its centre.
fn neighbourhood(radius: i32) -> impl Iterator<Item = (i32, i32)> {
    (-radius..=radius)
        .flat_map(move |dy| (-radius..=radius).map(move |dx| (dx, dy)))
        .filter(|&(dx, dy)| dx != 0 || dy != 0)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FRAME_GREY;
    use crate::layout::LayoutConfig;
    use crate::payload::{EofPayload, StartPayload, TransferFlags};

    fn layout() -> Layout {
        Layout::new(&LayoutConfig {
            frame_width: 640,
            frame_height: 480,
            ..LayoutConfig::default()
        })
        .unwrap()
    }

    fn analyzer() -> FrameAnalyzer {
        FrameAnalyzer::new(layout(), DetectorConfig::default(), AnalyzerConfig::default())
    }

    fn translate(image: &CarrierImage, dx: i64, dy: i64) -> CarrierImage {
        let mut out = CarrierImage::filled(image.width(), image.height(), FRAME_GREY);
        for y in 0..image.height() as i64 {
            for x in 0..image.width() as i64 {
                let (tx, ty) = (x + dx, y + dy);
                if out.contains(tx, ty) {
                    out.set_rgb(tx as u32, ty as u32, image.rgb(x as u32, y as u32));
                }
            }
        }
        out
    }

    #[test]
    fn neighbourhood_skips_centre() {
        let cells: Vec<_> = neighbourhood(1).collect();
        assert_eq!(cells.len(), 8);
        assert_eq!(cells[0], (-1, -1));
        assert!(!cells.contains(&(0, 0)));
    }

    #[test]
    fn decodes_every_frame_kind() {
        let codec = FrameCodec::new(layout());
        let mut analyzer = analyzer();

        assert_eq!(analyzer.analyze(&codec.encode_idle()), Some(LogicalFrame::Idle));

        let start = StartPayload {
            name: "a.bin".into(),
            file_size: 3,
            total_frames: 1,
            sha256: [1; 32],
            flags: TransferFlags::empty(),
        };
        let image = codec.encode_start(&start).unwrap();
        assert_eq!(analyzer.analyze(&image), Some(LogicalFrame::Start(start)));

        let image = codec.encode_data(0, b"abc").unwrap();
        assert_eq!(
            analyzer.analyze(&image),
            Some(LogicalFrame::Data {
                index: 0,
                chunk: b"abc".to_vec()
            })
        );

        let eof = EofPayload {
            total_frames: 1,
            sha256: [1; 32],
        };
        let image = codec.encode_eof(&eof).unwrap();
        assert_eq!(analyzer.analyze(&image), Some(LogicalFrame::Eof(eof)));
        assert_eq!(analyzer.last_offset(), Some(Offset::ZERO));
    }

    #[test]
    fn tolerates_small_translation() {
        let codec = FrameCodec::new(layout());
        let chunk: Vec<u8> = (0..200u8).collect();
        let image = codec.encode_data(9, &chunk).unwrap();

        for (dx, dy) in [(2, 0), (-2, 0), (0, 2), (0, -2), (2, -2), (-1, 1)] {
            let mut analyzer = analyzer();
            let shifted = translate(&image, dx, dy);
            let frame = analyzer.analyze(&shifted);
            assert_eq!(
                frame,
                Some(LogicalFrame::Data {
                    index: 9,
                    chunk: chunk.clone()
                }),
                "shift ({dx}, {dy})"
            );
        }
    }

    #[test]
    fn decodes_rescaled_capture() {
        let codec = FrameCodec::new(layout());
        let chunk = b"scaled up twice".to_vec();
        let image = codec.encode_data(1, &chunk).unwrap();

        let mut big = CarrierImage::new(1280, 960, image.format());
        image.resize_nearest_into(&mut big);

        let mut analyzer = analyzer();
        let found = analyzer.analyze_header(&big).unwrap();
        assert!(found.rescaled);
        assert_eq!(found.header.frame_index, 1);
        assert_eq!(analyzer.decode_payload(&big, &found), Some(chunk));
    }

    #[test]
    fn blank_capture_is_a_miss() {
        let mut analyzer = analyzer();
        let blank = CarrierImage::filled(640, 480, FRAME_GREY);
        assert_eq!(analyzer.analyze(&blank), None);
        assert_eq!(analyzer.last_offset(), None);
    }

    #[test]
    fn payload_retry_recovers_shifted_data() {
        let codec = FrameCodec::new(layout());
        let chunk = vec![0xC3; 100];
        let image = codec.encode_data(5, &chunk).unwrap();
        let shifted = translate(&image, 4, 0);

        let mut strict = analyzer();
        let found = HeaderMatch {
            header: FrameHeader::new(FrameType::Data, 5, 100),
            offset: Offset::ZERO,
            rescaled: false,
        };
        assert_eq!(strict.decode_payload(&shifted, &found), None);

        let mut retrying = FrameAnalyzer::new(
            layout(),
            DetectorConfig::default(),
            AnalyzerConfig {
                payload_retry_range: 4,
            },
        );
        assert_eq!(retrying.decode_payload(&shifted, &found), Some(chunk));
        assert!(retrying.last_offset().is_some());
    }
}
