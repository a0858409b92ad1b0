//! Audio capture plumbing
//!
//! A shared overwrite-oldest sample queue sits between the capture callback
//! (producer, audio thread) and the async consumer. The capture device is
//! owned by a dedicated thread because audio streams cannot move across
//! threads; the rest of the system only ever sees the queue.

use async_trait::async_trait;
use cache_padded::CachePadded;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Audio sample format on the capture side (normalized to -1.0 .. 1.0)
pub type AudioSample = f32;

/// Seconds of audio the shared queue can hold before overwriting
pub const QUEUE_DURATION_SECS: usize = 3;

/// Samples handed out per chunk read
pub const CHUNK_SIZE: usize = 512;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No capture device available: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to build capture stream: {0}")]
    StreamBuild(String),

    #[error("Capture stream closed")]
    StreamClosed,
}

/// Fixed linear f32 -> PCM16 scaling
///
/// Every consumer of captured audio goes through this one function so that
/// detection behavior never depends on which path converted the samples.
pub fn to_pcm16(samples: &[AudioSample]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Downmix interleaved stereo to mono by averaging channel pairs
pub fn stereo_to_mono(stereo: &[AudioSample]) -> Vec<AudioSample> {
    stereo.chunks_exact(2).map(|pair| (pair[0] + pair[1]) / 2.0).collect()
}

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Thread-safe sample queue between the capture callback and a consumer
///
/// Overwrites the oldest samples when full, so a slow consumer loses history
/// instead of stalling the audio thread.
pub struct SampleQueue {
    producer: CachePadded<Mutex<RingProducer>>,
    consumer: CachePadded<Mutex<RingConsumer>>,
    notify: Notify,
}

impl SampleQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        debug!("Creating sample queue with capacity: {} samples", capacity);

        let rb = HeapRb::<AudioSample>::new(capacity);
        let (producer, consumer) = rb.split();

        Self {
            producer: CachePadded::new(Mutex::new(producer)),
            consumer: CachePadded::new(Mutex::new(consumer)),
            notify: Notify::new(),
        }
    }

    /// Append samples, dropping the oldest queued samples if necessary.
    /// Returns the number of samples written.
    pub fn push(&self, samples: &[AudioSample]) -> usize {
        let mut producer = self.producer.lock();

        let vacant = producer.vacant_len();
        if samples.len() > vacant {
            let to_drop = samples.len() - vacant;
            let mut consumer = self.consumer.lock();
            consumer.skip(to_drop);
            drop(consumer);

            warn!("Sample queue full, dropping {} oldest samples", to_drop);
        }

        let written = producer.push_slice(samples);
        self.notify.notify_one();
        written
    }

    /// Remove and return up to `max` samples
    pub fn pop_chunk(&self, max: usize) -> Vec<AudioSample> {
        let mut consumer = self.consumer.lock();
        let to_read = consumer.occupied_len().min(max);

        let mut out = vec![0.0; to_read];
        let read = consumer.pop_slice(&mut out);
        out.truncate(read);
        out
    }

    pub fn len(&self) -> usize {
        self.consumer.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.consumer.lock().capacity().get()
    }

    pub fn clear(&self) {
        let mut consumer = self.consumer.lock();
        let occupied = consumer.occupied_len();
        consumer.skip(occupied);
    }

    /// Future that resolves when the producer signals new samples (or a
    /// wake-up). Call `enable` on the pinned future before re-checking the
    /// queue so a signal between the check and the await is not lost.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Wake every waiting consumer, e.g. on close
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}

/// A live source of captured audio chunks
#[async_trait]
pub trait CaptureStream: Send {
    /// Next chunk of samples. Returns `None` once the stream is closed.
    async fn next_chunk(&mut self) -> Option<Vec<AudioSample>>;

    /// Release the capture device. Safe to call more than once.
    fn close(&mut self);
}

/// Microphone capture stream
///
/// Owns a dedicated thread holding the device stream; the callback feeds the
/// shared queue. `open` blocks until the stream is live or failed, so device
/// acquisition errors surface at the call site.
pub struct MicCapture {
    queue: Arc<SampleQueue>,
    closed: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl MicCapture {
    pub fn open(sample_rate: u32, channels: u16) -> Result<Self, CaptureError> {
        let queue = Arc::new(SampleQueue::with_capacity(
            sample_rate as usize * QUEUE_DURATION_SECS,
        ));
        let closed = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread = {
            let queue = Arc::clone(&queue);
            let closed = Arc::clone(&closed);
            std::thread::Builder::new()
                .name("aura-capture".to_string())
                .spawn(move || capture_thread(sample_rate, channels, queue, closed, ready_tx))
                .map_err(|e| CaptureError::StreamBuild(e.to_string()))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                queue,
                closed,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::StreamBuild(
                    "capture thread exited before reporting readiness".to_string(),
                ))
            }
        }
    }
}

#[async_trait]
impl CaptureStream for MicCapture {
    async fn next_chunk(&mut self) -> Option<Vec<AudioSample>> {
        loop {
            let wakeup = self.queue.notified();
            tokio::pin!(wakeup);
            wakeup.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            let chunk = self.queue.pop_chunk(CHUNK_SIZE);
            if !chunk.is_empty() {
                return Some(chunk);
            }

            wakeup.await;
        }
    }

    fn close(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.queue.wake_all();
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
            debug!("Capture stream closed");
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// Body of the capture thread: build the device stream, report readiness,
/// then keep the stream alive until asked to close.
fn capture_thread(
    sample_rate: u32,
    channels: u16,
    queue: Arc<SampleQueue>,
    closed: Arc<AtomicBool>,
    ready_tx: std::sync::mpsc::Sender<Result<(), CaptureError>>,
) {
    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(device) => device,
        None => {
            let _ = ready_tx.send(Err(CaptureError::DeviceUnavailable(
                "no default input device".to_string(),
            )));
            return;
        }
    };

    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = {
        let queue = Arc::clone(&queue);
        device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if channels == 2 {
                    queue.push(&stereo_to_mono(data));
                } else {
                    queue.push(data);
                }
            },
            |err| warn!("Capture stream error: {}", err),
            None,
        )
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::StreamBuild(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::StreamBuild(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    while !closed.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    queue.wake_all();
}
