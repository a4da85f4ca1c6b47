//! Encode pipeline: the per-sender orchestrator.

use crate::cadence::{DEFAULT_MAX_FRAME_HISTORY, DEFAULT_RATE_WINDOW, FrameCadenceTracker};
use crate::config::CodecConfig;
use crate::controller::{ChannelAdaptationController, ChannelParameters};
use crate::encoder::{EncodedImage, VideoEncoder, VideoFrame, encoder_rejected};
use crate::intra::IntraRequestScheduler;
use crate::temporal_layers::{LayerAllocation, TemporalLayerStrategy, new_strategy};
use log::{debug, info, trace, warn};
use shared::error::{Error, Result};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_PROCESS_INTERVAL: Duration = Duration::from_millis(1000);

/// Control input accepted through [`sansio::Protocol::handle_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Force a keyframe on one simulcast stream.
    KeyFrameRequest(i32),
    ChannelParameters(ChannelParameters),
}

/// Builder for the [`EncodePipeline`].
///
/// # Example
///
/// ```ignore
/// use rtc_video_coding::EncodePipelineBuilder;
/// use std::time::Duration;
///
/// let mut pipeline = EncodePipelineBuilder::new()
///     .with_process_interval(Duration::from_millis(500))
///     .build(my_encoder);
/// pipeline.register_send_codec(CodecConfig::default())?;
/// ```
#[derive(Debug, Clone)]
pub struct EncodePipelineBuilder {
    /// Interval between framerate refreshes.
    process_interval: Duration,
    /// Window the input framerate is measured over.
    rate_window: Duration,
    /// Upper bound on the arrival instants kept for the estimate.
    max_frame_history: usize,
}

impl Default for EncodePipelineBuilder {
    fn default() -> Self {
        Self {
            process_interval: DEFAULT_PROCESS_INTERVAL,
            rate_window: DEFAULT_RATE_WINDOW,
            max_frame_history: DEFAULT_MAX_FRAME_HISTORY,
        }
    }
}

impl EncodePipelineBuilder {
    /// Create a builder with default settings.
    ///
    /// Defaults: 1 s process interval, 2 s rate window, 90 frames of history.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_process_interval(mut self, interval: Duration) -> Self {
        self.process_interval = interval;
        self
    }

    pub fn with_rate_window(mut self, window: Duration) -> Self {
        self.rate_window = window;
        self
    }

    pub fn with_max_frame_history(mut self, max_frames: usize) -> Self {
        self.max_frame_history = max_frames;
        self
    }

    pub fn build<E: VideoEncoder>(self, encoder: E) -> EncodePipeline<E> {
        EncodePipeline::new(
            encoder,
            self.process_interval,
            FrameCadenceTracker::new(self.rate_window, self.max_frame_history),
        )
    }
}

/// Drives one [`VideoEncoder`]: keyframe scheduling, temporal layer
/// assignment and rate adaptation.
///
/// Encoded images are queued and handed out through
/// [`poll_write`](sansio::Protocol::poll_write) in submission order.
pub struct EncodePipeline<E> {
    encoder: E,

    codec: Option<CodecConfig>,
    strategy: Option<Box<dyn TemporalLayerStrategy>>,
    scheduler: IntraRequestScheduler,
    controller: ChannelAdaptationController,
    /// Position within the strategy's layer pattern.
    pattern_position: usize,

    process_interval: Duration,
    next_process: Option<Instant>,

    write_queue: VecDeque<EncodedImage>,
}

impl<E: VideoEncoder> EncodePipeline<E> {
    fn new(encoder: E, process_interval: Duration, cadence: FrameCadenceTracker) -> Self {
        Self {
            encoder,

            codec: None,
            strategy: None,
            scheduler: IntraRequestScheduler::default(),
            controller: ChannelAdaptationController::new(cadence),
            pattern_position: 0,

            process_interval,
            next_process: None,

            write_queue: VecDeque::new(),
        }
    }

    /// Register (or replace) the send codec.
    ///
    /// The encoder is re-initialised, pending keyframe requests are dropped
    /// and the layer pattern restarts. On error the previous registration
    /// stays in effect.
    pub fn register_send_codec(&mut self, config: CodecConfig) -> Result<()> {
        config.validate()?;

        let mut strategy = new_strategy(
            config.layer_strategy,
            config.number_of_temporal_layers,
            config.rate_table(),
        );
        self.controller
            .on_streams_reconfigured(&config, strategy.as_mut(), &mut self.encoder)?;

        info!(
            "registered {:?} send codec {}x{}, {} stream(s), {} temporal layer(s)",
            config.layer_strategy,
            config.width,
            config.height,
            config.stream_count(),
            config.number_of_temporal_layers
        );

        self.scheduler = IntraRequestScheduler::new(config.stream_count());
        self.strategy = Some(strategy);
        self.pattern_position = 0;
        self.codec = Some(config);
        Ok(())
    }

    /// Encode one raw frame.
    pub fn submit(&mut self, frame: VideoFrame) -> Result<()> {
        let Some(strategy) = self.strategy.as_mut() else {
            return Err(Error::ErrCodecNotRegistered);
        };

        self.controller.record_frame(frame.arrival);
        if self.next_process.is_none() {
            self.next_process = Some(frame.arrival + self.process_interval);
        }

        let frame_types = self.scheduler.build_frame_types();
        let temporal_layer = strategy.assign_layer(self.pattern_position);
        self.pattern_position = (self.pattern_position + 1) % strategy.cycle_length().max(1);

        match self.encoder.encode(&frame, &frame_types, temporal_layer) {
            Ok(images) => {
                trace!(
                    "encoded frame on layer {} into {} image(s)",
                    temporal_layer,
                    images.len()
                );
                self.write_queue.extend(images);
                Ok(())
            }
            Err(err) => {
                warn!("{} failed to encode: {err}", self.encoder.implementation_name());
                self.scheduler.restore(&frame_types);
                Err(encoder_rejected(err))
            }
        }
    }

    /// Request a keyframe on `stream_index`.
    ///
    /// Encoders that capture their own frames are asked for it right away;
    /// otherwise it rides on the next submitted frame.
    pub fn intra_frame_request(&mut self, stream_index: i32) -> Result<()> {
        if self.codec.is_none() {
            return Err(Error::ErrCodecNotRegistered);
        }
        self.scheduler.request_intra_frame(stream_index)?;
        debug!("keyframe requested on stream {stream_index}");

        if !self.encoder.internal_source() {
            return Ok(());
        }

        let frame_types = self.scheduler.build_frame_types();
        match self.encoder.request_frame(&frame_types) {
            Ok(images) => {
                self.write_queue.extend(images);
                Ok(())
            }
            Err(err) => {
                warn!("{} refused frame request: {err}", self.encoder.implementation_name());
                self.scheduler.restore(&frame_types);
                Err(encoder_rejected(err))
            }
        }
    }

    /// Apply network feedback.
    pub fn set_channel_parameters(
        &mut self,
        target_bitrate_bps: u32,
        loss_fraction: u8,
        rtt_ms: u32,
    ) -> Result<()> {
        let params = ChannelParameters {
            target_bitrate_bps,
            loss_fraction,
            rtt_ms,
        };
        let Some(strategy) = self.strategy.as_mut() else {
            return Err(Error::ErrCodecNotRegistered);
        };
        self.controller
            .on_channel_parameters(params, strategy.as_mut(), &mut self.encoder)
    }

    /// Refresh the input framerate estimate and schedule the next refresh.
    pub fn process(&mut self, now: Instant) -> Result<()> {
        self.next_process = Some(now + self.process_interval);

        let Some(strategy) = self.strategy.as_mut() else {
            return Ok(());
        };
        self.controller
            .on_tick(now, strategy.as_mut(), &mut self.encoder)
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn encoder_mut(&mut self) -> &mut E {
        &mut self.encoder
    }

    pub fn codec(&self) -> Option<&CodecConfig> {
        self.codec.as_ref()
    }

    /// Per temporal layer targets currently in effect.
    pub fn layer_allocation(&self) -> Option<&LayerAllocation> {
        self.controller.allocation()
    }

    pub fn target_bitrate_kbps(&self) -> u32 {
        self.controller.target_bitrate_kbps()
    }

    pub fn framerate_fps(&self) -> u32 {
        self.controller.framerate_fps()
    }
}

impl<E: VideoEncoder> sansio::Protocol<(), VideoFrame, ControlEvent> for EncodePipeline<E> {
    type Rout = ();
    type Wout = EncodedImage;
    type Eout = ();
    type Error = Error;
    type Time = Instant;

    fn handle_read(&mut self, _msg: ()) -> Result<()> {
        Ok(())
    }

    fn poll_read(&mut self) -> Option<Self::Rout> {
        None
    }

    fn handle_write(&mut self, frame: VideoFrame) -> Result<()> {
        self.submit(frame)
    }

    fn poll_write(&mut self) -> Option<Self::Wout> {
        self.write_queue.pop_front()
    }

    fn handle_event(&mut self, evt: ControlEvent) -> Result<()> {
        match evt {
            ControlEvent::KeyFrameRequest(stream_index) => self.intra_frame_request(stream_index),
            ControlEvent::ChannelParameters(params) => self.set_channel_parameters(
                params.target_bitrate_bps,
                params.loss_fraction,
                params.rtt_ms,
            ),
        }
    }

    fn poll_event(&mut self) -> Option<Self::Eout> {
        None
    }

    fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        match self.next_process {
            Some(eto) if eto <= now => self.process(now),
            _ => Ok(()),
        }
    }

    fn poll_timeout(&mut self) -> Option<Instant> {
        self.next_process
    }

    fn close(&mut self) -> Result<()> {
        self.write_queue.clear();
        self.next_process = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LayerStrategyKind, StreamConfig};
    use crate::encoder::FrameType::{Delta, Key};
    use crate::encoder::{EncoderRates, FrameType};
    use crate::test_utils::RecordingEncoder;
    use sansio::Protocol;

    fn three_streams(layers: u8) -> CodecConfig {
        let stream = StreamConfig {
            number_of_temporal_layers: layers,
            ..Default::default()
        };
        CodecConfig {
            number_of_temporal_layers: layers,
            streams: vec![stream.clone(), stream.clone(), stream],
            ..Default::default()
        }
    }

    fn pipeline(config: CodecConfig) -> EncodePipeline<RecordingEncoder> {
        pipeline_with(RecordingEncoder::default(), config)
    }

    fn pipeline_with(
        encoder: RecordingEncoder,
        config: CodecConfig,
    ) -> EncodePipeline<RecordingEncoder> {
        let mut pipeline = EncodePipelineBuilder::new().build(encoder);
        pipeline.register_send_codec(config).unwrap();
        pipeline
    }

    fn frame(arrival: Instant) -> VideoFrame {
        VideoFrame::empty(arrival, 352, 288)
    }

    #[test]
    fn test_unregistered_pipeline() {
        let mut pipeline = EncodePipelineBuilder::new().build(RecordingEncoder::default());
        let now = Instant::now();

        assert_eq!(pipeline.submit(frame(now)), Err(Error::ErrCodecNotRegistered));
        assert_eq!(pipeline.intra_frame_request(0), Err(Error::ErrCodecNotRegistered));
        assert_eq!(
            pipeline.set_channel_parameters(300_000, 0, 100),
            Err(Error::ErrCodecNotRegistered)
        );
        assert!(pipeline.process(now).is_ok());
        assert!(pipeline.encoder().encode_calls.is_empty());
        assert!(pipeline.layer_allocation().is_none());
    }

    #[test]
    fn test_register_initialises_encoder() {
        let pipeline = pipeline(three_streams(3));
        let init = &pipeline.encoder().init_calls;
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].bitrate_kbps, 300);
        assert_eq!(init[0].allocation.bitrate_kbps, vec![120, 180, 300]);
        assert_eq!(pipeline.codec().unwrap().stream_count(), 3);
        assert_eq!(pipeline.target_bitrate_kbps(), 300);
        assert_eq!(pipeline.framerate_fps(), 30);
    }

    #[test]
    fn test_invalid_registration_keeps_previous_codec() {
        let mut pipeline = pipeline(three_streams(1));
        let result = pipeline.register_send_codec(CodecConfig {
            number_of_temporal_layers: 4,
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::ErrInvalidConfiguration(_))));
        assert_eq!(pipeline.encoder().init_calls.len(), 1);
        assert_eq!(pipeline.codec().unwrap().stream_count(), 3);

        pipeline.encoder_mut().fail_init = true;
        let result = pipeline.register_send_codec(CodecConfig::default());
        assert!(matches!(result, Err(Error::ErrEncoderRejected(_))));
        assert_eq!(pipeline.codec().unwrap().stream_count(), 3);
        assert!(pipeline.intra_frame_request(2).is_ok());
    }

    #[test]
    fn test_keyframe_request_reaches_one_frame() {
        let mut pipeline = pipeline(three_streams(1));
        let now = Instant::now();

        pipeline.intra_frame_request(1).unwrap();
        pipeline.submit(frame(now)).unwrap();
        assert_eq!(pipeline.encoder().last_frame_types(), Some(&[Delta, Key, Delta][..]));

        pipeline.submit(frame(now)).unwrap();
        assert_eq!(pipeline.encoder().last_frame_types(), Some(&[Delta, Delta, Delta][..]));
    }

    #[test]
    fn test_invalid_keyframe_request() {
        let mut pipeline = pipeline(three_streams(1));
        assert_eq!(pipeline.intra_frame_request(3), Err(Error::ErrInvalidStreamIndex(3)));
        assert_eq!(pipeline.intra_frame_request(-1), Err(Error::ErrInvalidStreamIndex(-1)));

        pipeline.submit(frame(Instant::now())).unwrap();
        assert_eq!(pipeline.encoder().last_frame_types(), Some(&[Delta, Delta, Delta][..]));
    }

    #[test]
    fn test_failed_encode_keeps_keyframe_request() {
        let mut pipeline = pipeline(three_streams(1));
        let now = Instant::now();

        pipeline.intra_frame_request(0).unwrap();
        pipeline.encoder_mut().fail_encode = true;
        assert!(matches!(
            pipeline.submit(frame(now)),
            Err(Error::ErrEncoderRejected(_))
        ));
        assert!(pipeline.poll_write().is_none());

        pipeline.encoder_mut().fail_encode = false;
        pipeline.submit(frame(now)).unwrap();
        assert_eq!(pipeline.encoder().last_frame_types(), Some(&[Key, Delta, Delta][..]));
    }

    #[test]
    fn test_layer_pattern_and_output_order() {
        let mut pipeline = pipeline(CodecConfig {
            number_of_temporal_layers: 3,
            ..Default::default()
        });
        let start = Instant::now();
        for i in 0..8 {
            pipeline
                .submit(frame(start + Duration::from_millis(33 * i)))
                .unwrap();
        }

        let layers: Vec<u8> = std::iter::from_fn(|| pipeline.poll_write())
            .map(|image| image.temporal_layer)
            .collect();
        assert_eq!(layers, vec![0, 2, 1, 2, 0, 2, 1, 2]);
    }

    #[test]
    fn test_registration_restarts_pattern() {
        let mut pipeline = pipeline(CodecConfig {
            number_of_temporal_layers: 3,
            ..Default::default()
        });
        let now = Instant::now();
        pipeline.submit(frame(now)).unwrap();
        pipeline.submit(frame(now)).unwrap();

        pipeline
            .register_send_codec(CodecConfig {
                number_of_temporal_layers: 2,
                ..Default::default()
            })
            .unwrap();
        pipeline.submit(frame(now)).unwrap();
        assert_eq!(pipeline.encoder().encode_calls.last().unwrap().1, 0);
    }

    #[test]
    fn test_internal_source_keyframe_is_immediate() {
        let mut pipeline = pipeline_with(RecordingEncoder::with_internal_source(), three_streams(1));

        pipeline.intra_frame_request(2).unwrap();
        assert_eq!(pipeline.encoder().request_calls, vec![vec![Delta, Delta, Key]]);
        assert_eq!(pipeline.poll_write().map(|image| image.stream_index), Some(0));

        pipeline.encoder_mut().fail_encode = true;
        assert!(pipeline.intra_frame_request(0).is_err());
        pipeline.encoder_mut().fail_encode = false;
        pipeline.intra_frame_request(1).unwrap();
        assert_eq!(
            pipeline.encoder().request_calls.last().unwrap(),
            &vec![Key, Key, Delta]
        );
    }

    #[test]
    fn test_keyframe_request_kept_without_request_frame() {
        /// Claims to capture its own frames but leaves `request_frame` alone.
        #[derive(Default)]
        struct CaptureOnlyEncoder {
            encoded: Vec<Vec<FrameType>>,
        }

        impl VideoEncoder for CaptureOnlyEncoder {
            fn init_encode(&mut self, _config: &CodecConfig, _rates: &EncoderRates) -> Result<()> {
                Ok(())
            }

            fn encode(
                &mut self,
                _frame: &VideoFrame,
                frame_types: &[FrameType],
                _temporal_layer: u8,
            ) -> Result<Vec<EncodedImage>> {
                self.encoded.push(frame_types.to_vec());
                Ok(vec![])
            }

            fn set_rates(&mut self, _rates: &EncoderRates) -> Result<()> {
                Ok(())
            }

            fn set_channel_parameters(&mut self, _loss_fraction: u8, _rtt_ms: u32) -> Result<()> {
                Ok(())
            }

            fn internal_source(&self) -> bool {
                true
            }
        }

        let mut pipeline = EncodePipelineBuilder::new().build(CaptureOnlyEncoder::default());
        pipeline.register_send_codec(three_streams(1)).unwrap();

        assert!(matches!(
            pipeline.intra_frame_request(1),
            Err(Error::ErrEncoderRejected(_))
        ));
        assert!(pipeline.poll_write().is_none());

        pipeline.submit(frame(Instant::now())).unwrap();
        assert_eq!(pipeline.encoder().encoded, vec![vec![Delta, Key, Delta]]);
    }

    #[test]
    fn test_events_and_timeouts() {
        let mut pipeline = EncodePipelineBuilder::new()
            .with_process_interval(Duration::from_millis(500))
            .build(RecordingEncoder::default());
        pipeline
            .register_send_codec(CodecConfig {
                layer_strategy: LayerStrategyKind::RealTime,
                ..three_streams(1)
            })
            .unwrap();
        assert!(pipeline.poll_timeout().is_none());

        let start = Instant::now();
        let mut now = start;
        for _ in 0..20 {
            pipeline.handle_write(frame(now)).unwrap();
            now += Duration::from_millis(100);
        }
        assert_eq!(pipeline.poll_timeout(), Some(start + Duration::from_millis(500)));

        pipeline.handle_timeout(now).unwrap();
        assert_eq!(pipeline.framerate_fps(), 10);
        assert_eq!(pipeline.encoder().rate_calls.last().unwrap().framerate_fps, 10);
        assert_eq!(pipeline.poll_timeout(), Some(now + Duration::from_millis(500)));

        // Not due yet.
        pipeline.handle_timeout(now).unwrap();
        assert_eq!(pipeline.encoder().rate_calls.len(), 1);

        pipeline
            .handle_event(ControlEvent::ChannelParameters(ChannelParameters {
                target_bitrate_bps: 600_000,
                loss_fraction: 2,
                rtt_ms: 80,
            }))
            .unwrap();
        assert_eq!(pipeline.target_bitrate_kbps(), 600);
        assert_eq!(pipeline.encoder().channel_calls, vec![(2, 80)]);

        pipeline.handle_event(ControlEvent::KeyFrameRequest(1)).unwrap();
        pipeline.handle_write(frame(now)).unwrap();
        assert_eq!(pipeline.encoder().last_frame_types(), Some(&[Delta, Key, Delta][..]));

        assert!(pipeline.poll_write().is_some());
        pipeline.close().unwrap();
        assert!(pipeline.poll_write().is_none());
        assert!(pipeline.poll_timeout().is_none());
        assert!(pipeline.poll_event().is_none());
    }

    #[test]
    fn test_steady_input_publishes_framerate_once() {
        let cadences = [
            (20, Duration::from_millis(50)),
            (30, Duration::from_nanos(33_333_333)),
        ];
        for (fps, interval) in cadences {
            let mut pipeline = pipeline(CodecConfig {
                layer_strategy: LayerStrategyKind::RealTime,
                max_framerate: 60,
                ..three_streams(3)
            });

            // Ticks land exactly on frame arrivals.
            let mut now = Instant::now();
            let mut ticks = 0;
            for _ in 0..fps * 6 {
                pipeline.handle_write(frame(now)).unwrap();
                while pipeline.poll_write().is_some() {}
                if pipeline.poll_timeout().is_some_and(|eto| eto <= now) {
                    pipeline.handle_timeout(now).unwrap();
                    ticks += 1;
                }
                now += interval;
            }

            assert!(ticks >= 4, "{fps} fps: only {ticks} ticks");
            assert_eq!(pipeline.framerate_fps(), fps);
            let published: Vec<u32> = pipeline
                .encoder()
                .rate_calls
                .iter()
                .map(|rates| rates.framerate_fps)
                .collect();
            assert_eq!(published, vec![fps], "{fps} fps");
        }
    }
}
