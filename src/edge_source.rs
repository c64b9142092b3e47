//! Edge event sources.
//!
//! An [`EdgeSource`] delivers falling edges for a channel to a subscribed
//! callback, stamped with the counter value at which the edge was seen.
//! Subscriptions are RAII guards: dropping one releases the registration.
//!
//! The digital-input hardware itself lives outside this crate. This module
//! provides the trait the engine consumes plus a simulated implementation
//! used by the CLI and by tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::channel::{ChannelIndex, CHANNEL_COUNT, VALID_PERIOD_MAX};
use crate::counter::CounterSource;
use crate::error::{IsovError, Result};

/// Callback invoked as `callback(channel, now)` for every edge.
pub type EdgeCallback = Arc<dyn Fn(ChannelIndex, u32) + Send + Sync>;

/// Provider of per-channel edge events.
pub trait EdgeSource: Send + Sync {
    /// Start delivering edges on `channel` to `callback`.
    ///
    /// Delivery stops when the returned [`Subscription`] is dropped.
    fn subscribe(&self, channel: ChannelIndex, callback: EdgeCallback) -> Result<Subscription>;
}

/// Registration guard returned by [`EdgeSource::subscribe`].
pub struct Subscription {
    channel: ChannelIndex,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a release action for `channel`.
    pub fn new(channel: ChannelIndex, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            channel,
            release: Some(Box::new(release)),
        }
    }

    /// Channel this subscription delivers.
    pub fn channel(&self) -> ChannelIndex {
        self.channel
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Ordered collection of subscriptions, released newest-first on drop.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an acquired subscription.
    pub fn push(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Channels held, in acquisition order.
    pub fn channels(&self) -> Vec<ChannelIndex> {
        self.subscriptions.iter().map(Subscription::channel).collect()
    }

    /// Number of subscriptions held.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether the set holds nothing.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        while let Some(subscription) = self.subscriptions.pop() {
            debug!(channel = %subscription.channel(), "Releasing edge subscription");
            drop(subscription);
        }
    }
}

struct Slots {
    callbacks: [RwLock<Option<EdgeCallback>>; CHANNEL_COUNT],
    failing: [AtomicBool; CHANNEL_COUNT],
    releases: Mutex<Vec<ChannelIndex>>,
}

/// In-process edge source driven by [`trigger`](Self::trigger) or a [`PulseTrain`].
///
/// Like an interrupt line, each channel accepts one subscriber at a time.
pub struct SimulatedEdgeSource {
    counter: Arc<dyn CounterSource>,
    slots: Arc<Slots>,
}

impl SimulatedEdgeSource {
    /// Create a source that stamps edges with `counter`.
    pub fn new(counter: Arc<dyn CounterSource>) -> Self {
        Self {
            counter,
            slots: Arc::new(Slots {
                callbacks: Default::default(),
                failing: Default::default(),
                releases: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Deliver an edge on `channel` stamped with the current counter value.
    ///
    /// Returns `false` if nothing is subscribed to the channel.
    pub fn trigger(&self, channel: ChannelIndex) -> bool {
        self.trigger_at(channel, self.counter.now())
    }

    /// Deliver an edge on `channel` with an explicit timestamp.
    pub fn trigger_at(&self, channel: ChannelIndex, now: u32) -> bool {
        let callback = self.slots.callbacks[channel.get()].read().clone();
        match callback {
            Some(callback) => {
                callback(channel, now);
                true
            }
            None => false,
        }
    }

    /// Whether `channel` currently has a subscriber.
    pub fn is_subscribed(&self, channel: ChannelIndex) -> bool {
        self.slots.callbacks[channel.get()].read().is_some()
    }

    /// Make future subscriptions to `channel` fail.
    pub fn fail_channel(&self, channel: ChannelIndex) {
        self.slots.failing[channel.get()].store(true, Ordering::Release);
    }

    /// Channels released so far, in release order.
    pub fn release_log(&self) -> Vec<ChannelIndex> {
        self.slots.releases.lock().clone()
    }

    /// The counter used to stamp edges.
    pub fn counter(&self) -> &Arc<dyn CounterSource> {
        &self.counter
    }
}

impl EdgeSource for SimulatedEdgeSource {
    fn subscribe(&self, channel: ChannelIndex, callback: EdgeCallback) -> Result<Subscription> {
        if self.slots.failing[channel.get()].load(Ordering::Acquire) {
            return Err(IsovError::EdgeSource {
                channel: channel.get(),
                message: "input line unavailable".to_string(),
            });
        }

        {
            let mut slot = self.slots.callbacks[channel.get()].write();
            if slot.is_some() {
                return Err(IsovError::ChannelBusy {
                    channel: channel.get(),
                });
            }
            *slot = Some(callback);
        }

        let slots: Weak<Slots> = Arc::downgrade(&self.slots);
        Ok(Subscription::new(channel, move || {
            if let Some(slots) = slots.upgrade() {
                *slots.callbacks[channel.get()].write() = None;
                slots.releases.lock().push(channel);
            }
        }))
    }
}

impl<S: EdgeSource + ?Sized> EdgeSource for Arc<S> {
    fn subscribe(&self, channel: ChannelIndex, callback: EdgeCallback) -> Result<Subscription> {
        (**self).subscribe(channel, callback)
    }
}

impl std::fmt::Debug for SimulatedEdgeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribed: Vec<_> = ChannelIndex::all()
            .filter(|ch| self.is_subscribed(*ch))
            .collect();
        f.debug_struct("SimulatedEdgeSource")
            .field("subscribed", &subscribed)
            .finish()
    }
}

/// Pulse period a converter would produce for `voltage` with `coefficient`.
///
/// `None` if the voltage is not positive or the period would fall outside
/// the validity window.
pub fn period_for_voltage(coefficient: i64, voltage: i32) -> Option<Duration> {
    if voltage <= 0 || coefficient <= 0 {
        return None;
    }
    let micros = coefficient / i64::from(voltage);
    if micros <= 0 || micros >= i64::from(VALID_PERIOD_MAX) {
        return None;
    }
    Some(Duration::from_micros(micros as u64))
}

/// Background thread delivering edges on one channel at a fixed period.
///
/// Stops when [`stop`](Self::stop) is called or the train is dropped.
pub struct PulseTrain {
    channel: ChannelIndex,
    period: Duration,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PulseTrain {
    /// Start generating edges on `channel` every `period`.
    pub fn start(
        source: Arc<SimulatedEdgeSource>,
        channel: ChannelIndex,
        period: Duration,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = std::thread::Builder::new()
            .name(format!("isov-pulse-{}", channel))
            .spawn(move || {
                let mut deadline = Instant::now();
                while flag.load(Ordering::Acquire) {
                    deadline += period;
                    if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
                        std::thread::sleep(wait);
                    }
                    source.trigger(channel);
                }
            })
            .map_err(|e| IsovError::EdgeSource {
                channel: channel.get(),
                message: format!("failed to spawn pulse generator: {e}"),
            })?;

        info!(%channel, period_us = period.as_micros() as u64, "Pulse train started");

        Ok(Self {
            channel,
            period,
            running,
            handle: Some(handle),
        })
    }

    /// Channel the train drives.
    pub fn channel(&self) -> ChannelIndex {
        self.channel
    }

    /// Interval between edges.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stop the train and wait for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(channel = %self.channel, "Pulse train thread panicked");
            }
        }
    }
}

impl Drop for PulseTrain {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PulseTrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseTrain")
            .field("channel", &self.channel)
            .field("period", &self.period)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}
