//! [`SendStreamConfig`], the send-side value-record config.
//!
//! See spec.md §6 "Send stream config" and §9 "Dynamic config": a value
//! record with enumerated validated fields, setters validate and either
//! reject or store, matching `spead2::send::stream_config`'s
//! constructor-validates-everything shape (`original_source/include/spead2/send_stream.h`).

use crate::error::ConfigError;

const DEFAULT_MAX_PACKET_SIZE: usize = 1472;
const DEFAULT_BURST_SIZE: usize = 65536;
const DEFAULT_MAX_HEAPS: usize = 4;
const DEFAULT_BURST_RATE_RATIO: f64 = 1.05;

/// Configuration for a [`super::SendScheduler`].
///
/// Constructed via [`SendStreamConfig::new`], which validates every field up
/// front; `rate` of `0.0` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendStreamConfig {
    max_packet_size: usize,
    rate: f64,
    burst_size: usize,
    max_heaps: usize,
    burst_rate_ratio: f64,
}

impl Default for SendStreamConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            rate: 0.0,
            burst_size: DEFAULT_BURST_SIZE,
            max_heaps: DEFAULT_MAX_HEAPS,
            burst_rate_ratio: DEFAULT_BURST_RATE_RATIO,
        }
    }
}

impl SendStreamConfig {
    /// Builds a config from individually-validated fields.
    ///
    /// # Errors
    ///
    /// Errors on the first invalid field, in the order `rate`,
    /// `max_heaps`, `burst_rate_ratio`.
    pub fn new(
        max_packet_size: usize,
        rate: f64,
        burst_size: usize,
        max_heaps: usize,
        burst_rate_ratio: f64,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.set_max_packet_size(max_packet_size);
        config.set_rate(rate)?;
        config.set_burst_size(burst_size);
        config.set_max_heaps(max_heaps)?;
        config.set_burst_rate_ratio(burst_rate_ratio)?;
        Ok(config)
    }

    /// Maximum size in bytes of a generated packet.
    #[must_use]
    pub const fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Sets [`SendStreamConfig::max_packet_size`].
    ///
    /// Not validated here (matching `original_source`): an undersized value
    /// surfaces as [`ConfigError::PacketTooSmall`] at the first generator
    /// construction instead (spec.md §4.2 "invalid-config error at
    /// construction").
    pub fn set_max_packet_size(&mut self, max_packet_size: usize) -> &mut Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Average send rate in bytes/sec; `0.0` means unlimited.
    #[must_use]
    pub const fn rate(&self) -> f64 {
        self.rate
    }

    /// Sets [`SendStreamConfig::rate`].
    ///
    /// # Errors
    ///
    /// Errors if `rate` is negative or not finite.
    pub fn set_rate(&mut self, rate: f64) -> Result<&mut Self, ConfigError> {
        if rate < 0.0 || !rate.is_finite() {
            return Err(ConfigError::InvalidRate);
        }
        self.rate = rate;
        Ok(self)
    }

    /// Bytes sent per burst before the pacer sleeps.
    #[must_use]
    pub const fn burst_size(&self) -> usize {
        self.burst_size
    }

    /// Sets [`SendStreamConfig::burst_size`].
    pub fn set_burst_size(&mut self, burst_size: usize) -> &mut Self {
        self.burst_size = burst_size;
        self
    }

    /// Send-queue depth bound.
    #[must_use]
    pub const fn max_heaps(&self) -> usize {
        self.max_heaps
    }

    /// Sets [`SendStreamConfig::max_heaps`].
    ///
    /// # Errors
    ///
    /// Errors if `max_heaps == 0`.
    pub fn set_max_heaps(&mut self, max_heaps: usize) -> Result<&mut Self, ConfigError> {
        if max_heaps == 0 {
            return Err(ConfigError::ZeroMaxHeaps);
        }
        self.max_heaps = max_heaps;
        Ok(self)
    }

    /// Ratio applied to `rate` to get the burst rate.
    #[must_use]
    pub const fn burst_rate_ratio(&self) -> f64 {
        self.burst_rate_ratio
    }

    /// Sets [`SendStreamConfig::burst_rate_ratio`].
    ///
    /// # Errors
    ///
    /// Errors if `burst_rate_ratio` is less than `1.0` or not finite.
    pub fn set_burst_rate_ratio(&mut self, burst_rate_ratio: f64) -> Result<&mut Self, ConfigError> {
        if burst_rate_ratio < 1.0 || !burst_rate_ratio.is_finite() {
            return Err(ConfigError::InvalidBurstRateRatio);
        }
        self.burst_rate_ratio = burst_rate_ratio;
        Ok(self)
    }

    /// `rate * burst_rate_ratio`.
    #[must_use]
    pub fn burst_rate(&self) -> f64 {
        self.rate * self.burst_rate_ratio
    }
}
