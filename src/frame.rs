//! The frame contract and the value fields shared between proxy layers.
//!
//! A frame is a shared, mutable unit of pipeline work. Producers obtain frames
//! from a [`VideoPort`](crate::port::VideoPort), fill in the value fields,
//! render them and release them. Frames are handled through [`FrameRef`]
//! (`Arc<dyn Frame>`): every reference holder keeps one `Arc`, and `free` /
//! `dispose` consume the caller's handle.
//!
//! # Field propagation
//!
//! When a frame is wrapped by a proxy, both layers carry their own copy of
//! [`FrameFields`]. [`sync_down`] pushes producer-side changes (timestamps,
//! field flags, crop, stream affiliation) into the wrapped frame before an
//! operation is forwarded, and [`sync_up`] pulls the output-side changes
//! (`vpts`, `duration`, stream) back after it returns.

use crate::error::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to a frame.
pub type FrameRef = Arc<dyn Frame>;

/// Shared handle to a stream.
///
/// Holding a `StreamRef` keeps the stream alive; this is the stream
/// affiliation reference carried in [`FrameFields::stream`].
pub type StreamRef = Arc<Stream>;

static STREAM_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A media stream that frames are affiliated with.
#[derive(Debug)]
pub struct Stream {
    id: u64,
    name: String,
    decoder_info: Mutex<ExtraInfo>,
}

impl Stream {
    /// Create a new stream with a unique id.
    pub fn new(name: impl Into<String>) -> StreamRef {
        Arc::new(Self {
            id: STREAM_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            decoder_info: Mutex::new(ExtraInfo::default()),
        })
    }

    /// Unique stream id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extra info most recently published by the stream's video decoder.
    pub fn decoder_extra_info(&self) -> ExtraInfo {
        *self.decoder_info.lock().unwrap()
    }

    /// Publish decoder extra info.
    pub fn set_decoder_extra_info(&self, info: ExtraInfo) {
        *self.decoder_info.lock().unwrap() = info;
    }
}

/// Positional information that travels with a frame from input to output.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExtraInfo {
    /// Position in the input (0..65535), time or offset based.
    pub input_normpos: i32,
    /// Time offset in milliseconds from the beginning of the stream.
    pub input_time: i32,
    /// Frame number, if known.
    pub frame_number: u32,
    /// Seek generation.
    pub seek_count: i32,
    /// Presentation time on the output clock.
    pub vpts: i64,
    /// Do not use this info to update anything.
    pub invalid: bool,
    /// Stream duration in milliseconds.
    pub total_time: i32,
}

impl ExtraInfo {
    /// Merge `src` into `self`.
    ///
    /// Only non-zero fields of a valid source overwrite the destination.
    pub fn merge(&mut self, src: &ExtraInfo) {
        if src.invalid {
            return;
        }
        if src.input_normpos != 0 {
            self.input_normpos = src.input_normpos;
        }
        if src.input_time != 0 {
            self.input_time = src.input_time;
        }
        if src.frame_number != 0 {
            self.frame_number = src.frame_number;
        }
        if src.seek_count != 0 {
            self.seek_count = src.seek_count;
        }
        if src.vpts != 0 {
            self.vpts = src.vpts;
        }
    }
}

/// Crop rectangle, in pixels trimmed from each edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crop {
    /// Pixels cropped on the left.
    pub left: u32,
    /// Pixels cropped on the right.
    pub right: u32,
    /// Pixels cropped at the top.
    pub top: u32,
    /// Pixels cropped at the bottom.
    pub bottom: u32,
}

/// Value fields of a frame.
#[derive(Debug, Clone, Default)]
pub struct FrameFields {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Display aspect ratio.
    pub ratio: f64,
    /// Opaque format tag (fourcc).
    pub format: u32,
    /// Allocation flags requested by the producer.
    pub flags: u32,
    /// Presentation timestamp from the producer.
    pub pts: i64,
    /// Presentation time on the output clock.
    pub vpts: i64,
    /// Frame duration in clock ticks.
    pub duration: i32,
    /// Frame content is known to be damaged.
    pub bad_frame: bool,
    /// Top field is displayed first.
    pub top_field_first: bool,
    /// First field is repeated (pulldown).
    pub repeat_first_field: bool,
    /// Frame is progressive.
    pub progressive_frame: bool,
    /// Picture coding type (I/P/B).
    pub picture_coding_type: u8,
    /// Frame was rendered by a consumer that bypassed the output.
    pub drawn: bool,
    /// Crop rectangle.
    pub crop: Crop,
    /// Stream affiliation.
    pub stream: Option<StreamRef>,
    /// Positional information.
    pub extra_info: ExtraInfo,
}

impl FrameFields {
    /// Fields for a freshly allocated frame of the given geometry.
    pub fn with_geometry(width: u32, height: u32, ratio: f64, format: u32, flags: u32) -> Self {
        Self {
            width,
            height,
            ratio,
            format,
            flags,
            ..Self::default()
        }
    }
}

/// Lock-guarded [`FrameFields`] owned by one frame layer.
#[derive(Debug, Default)]
pub struct FrameData {
    fields: Mutex<FrameFields>,
}

impl FrameData {
    /// Wrap a set of fields.
    pub fn new(fields: FrameFields) -> Self {
        Self {
            fields: Mutex::new(fields),
        }
    }

    /// Lock the fields for reading or writing.
    pub fn fields(&self) -> MutexGuard<'_, FrameFields> {
        self.fields.lock().unwrap()
    }

    /// Copy of the current fields.
    pub fn snapshot(&self) -> FrameFields {
        self.fields().clone()
    }

    /// Replace all fields.
    pub fn replace(&self, fields: FrameFields) {
        *self.fields() = fields;
    }
}

/// Which field of an interlaced frame an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldParity {
    /// Top field.
    Top,
    /// Bottom field.
    Bottom,
    /// Both fields.
    Frame,
}

/// Preprocessing hooks a frame supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preprocess {
    /// `proc_frame` is available.
    pub frame: bool,
    /// `proc_slice` is available.
    pub slice: bool,
}

impl Preprocess {
    /// No preprocessing hooks.
    pub const NONE: Self = Self {
        frame: false,
        slice: false,
    };

    /// Both preprocessing hooks.
    pub const ALL: Self = Self {
        frame: true,
        slice: true,
    };
}

/// The frame contract.
///
/// A frame handed out by a port starts with one reference owned by the
/// caller. `lock` adds a reference (the new holder clones the `Arc`), `free`
/// gives one back, and `dispose` is the final release that returns the frame
/// to the port that produced it.
pub trait Frame: Send + Sync {
    /// Value fields of this frame layer.
    fn data(&self) -> &FrameData;

    /// Add a reference.
    fn lock(&self);

    /// Release one reference.
    fn free(self: Arc<Self>);

    /// Final release: hand the frame back to its producer.
    fn dispose(self: Arc<Self>);

    /// Render the frame; returns how many upcoming frames the producer may skip.
    fn render(&self, stream: Option<&StreamRef>) -> Result<u32>;

    /// Select the field used by a field-based renderer.
    fn field(&self, _parity: FieldParity) {}

    /// Preprocessing hooks this frame supports.
    fn preprocess(&self) -> Preprocess {
        Preprocess::NONE
    }

    /// Whole-frame preprocessing, run before `render`.
    fn proc_frame(&self) {}

    /// Slice preprocessing, run before `render` as slices are decoded.
    fn proc_slice(&self, _planes: &[&[u8]]) {}
}

/// Propagate producer-side changes from `from` down into `to`.
pub fn sync_down(from: &FrameData, to: &FrameData) {
    let src = from.snapshot();
    let mut dst = to.fields();

    dst.pts = src.pts;
    dst.bad_frame = src.bad_frame;
    dst.duration = src.duration;
    dst.top_field_first = src.top_field_first;
    dst.repeat_first_field = src.repeat_first_field;
    dst.progressive_frame = src.progressive_frame;
    dst.picture_coding_type = src.picture_coding_type;
    dst.drawn = src.drawn;
    dst.stream = src.stream;
    dst.crop = src.crop;
    dst.ratio = src.ratio;
    dst.extra_info.merge(&src.extra_info);
}

/// Propagate output-side changes from `from` up into `to`.
pub fn sync_up(to: &FrameData, from: &FrameData) {
    let src = from.snapshot();
    let mut dst = to.fields();

    dst.vpts = src.vpts;
    dst.duration = src.duration;
    dst.stream = src.stream;
    dst.extra_info.merge(&src.extra_info);
}

/// End a frame's travel at a stage that consumes it instead of passing it on.
///
/// Re-affiliates the frame with `stream` and merges the stream's decoder
/// extra info, the bookkeeping the output would otherwise have done.
pub fn u_turn(frame: &dyn Frame, stream: Option<&StreamRef>) {
    let mut fields = frame.data().fields();
    fields.stream = stream.cloned();
    if let Some(stream) = stream {
        fields.extra_info.merge(&stream.decoder_extra_info());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_info_merge_skips_zero_fields() {
        let mut dst = ExtraInfo {
            input_time: 100,
            frame_number: 7,
            ..Default::default()
        };
        let src = ExtraInfo {
            input_time: 0,
            frame_number: 9,
            vpts: 3000,
            ..Default::default()
        };

        dst.merge(&src);

        assert_eq!(dst.input_time, 100);
        assert_eq!(dst.frame_number, 9);
        assert_eq!(dst.vpts, 3000);
    }

    #[test]
    fn test_extra_info_merge_ignores_invalid_source() {
        let mut dst = ExtraInfo::default();
        let src = ExtraInfo {
            frame_number: 5,
            invalid: true,
            ..Default::default()
        };

        dst.merge(&src);
        assert_eq!(dst.frame_number, 0);
    }

    #[test]
    fn test_sync_down_copies_producer_fields_only() {
        let stream = Stream::new("s");
        let upper = FrameData::new(FrameFields {
            pts: 1234,
            vpts: 99,
            bad_frame: true,
            progressive_frame: true,
            crop: Crop {
                left: 8,
                ..Default::default()
            },
            stream: Some(stream.clone()),
            ..FrameFields::with_geometry(64, 48, 4.0 / 3.0, 0, 0)
        });
        let lower = FrameData::new(FrameFields {
            vpts: 5000,
            width: 320,
            ..Default::default()
        });

        sync_down(&upper, &lower);

        let fields = lower.snapshot();
        assert_eq!(fields.pts, 1234);
        assert!(fields.bad_frame);
        assert!(fields.progressive_frame);
        assert_eq!(fields.crop.left, 8);
        // vpts and geometry belong to the output side
        assert_eq!(fields.vpts, 5000);
        assert_eq!(fields.width, 320);
        assert!(Arc::ptr_eq(fields.stream.as_ref().unwrap(), &stream));
    }

    #[test]
    fn test_sync_up_copies_output_fields_only() {
        let upper = FrameData::new(FrameFields {
            pts: 10,
            ..Default::default()
        });
        let lower = FrameData::new(FrameFields {
            pts: 20,
            vpts: 777,
            duration: 3003,
            ..Default::default()
        });

        sync_up(&upper, &lower);

        let fields = upper.snapshot();
        assert_eq!(fields.vpts, 777);
        assert_eq!(fields.duration, 3003);
        assert_eq!(fields.pts, 10);
    }

    #[test]
    fn test_stream_reference_follows_fields() {
        let stream = Stream::new("refcount");
        let data = FrameData::new(FrameFields {
            stream: Some(stream.clone()),
            ..Default::default()
        });
        assert_eq!(Arc::strong_count(&stream), 2);

        data.replace(FrameFields::default());
        assert_eq!(Arc::strong_count(&stream), 1);
    }
}
