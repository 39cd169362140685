use crate::error::{NodelinkError, Result};
use serde::{Deserialize, Serialize};

/// Number of equalizer bands an audio node exposes
pub const EQUALIZER_BANDS: usize = 15;

/// A single equalizer band adjustment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Band index, 0..15
    pub band: u8,
    /// Gain in [-0.25, 1.0]; 0.0 leaves the band untouched
    pub gain: f64,
}

/// 15-band equalizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Equalizer {
    bands: Vec<Band>,
}

impl Equalizer {
    /// An equalizer with every band at 0.0 gain
    pub fn flat() -> Self {
        Self {
            bands: (0..EQUALIZER_BANDS as u8).map(|band| Band { band, gain: 0.0 }).collect(),
        }
    }

    /// Build an equalizer from a full set of band gains
    pub fn new(gains: [f64; EQUALIZER_BANDS]) -> Self {
        Self {
            bands: gains
                .iter()
                .enumerate()
                .map(|(band, &gain)| Band { band: band as u8, gain })
                .collect(),
        }
    }

    /// Set a single band's gain, leaving the rest untouched
    pub fn with_band(mut self, band: usize, gain: f64) -> Self {
        if let Some(entry) = self.bands.get_mut(band) {
            entry.gain = gain;
        }
        self
    }

    /// All band adjustments, in band order
    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    fn validate(&self) -> Result<()> {
        for entry in &self.bands {
            if entry.band as usize >= EQUALIZER_BANDS {
                return Err(invalid("equalizer", format!("band[{}]", entry.band), "band index must be 0..15"));
            }
            if !(-0.25..=1.0).contains(&entry.gain) {
                return Err(invalid(
                    "equalizer",
                    format!("gain[{}]", entry.band),
                    format!("gain {} outside [-0.25, 1.0]", entry.gain),
                ));
            }
        }
        Ok(())
    }
}

/// Karaoke (vocal suppression) filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Karaoke {
    pub level: f64,
    pub mono_level: f64,
    pub filter_band: f64,
    pub filter_width: f64,
}

impl Default for Karaoke {
    fn default() -> Self {
        Self { level: 1.0, mono_level: 1.0, filter_band: 220.0, filter_width: 100.0 }
    }
}

/// Playback speed/pitch/rate multipliers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timescale {
    pub speed: f64,
    pub pitch: f64,
    pub rate: f64,
}

impl Default for Timescale {
    fn default() -> Self {
        Self { speed: 1.0, pitch: 1.0, rate: 1.0 }
    }
}

impl Timescale {
    fn validate(&self) -> Result<()> {
        for (field, value) in [("speed", self.speed), ("pitch", self.pitch), ("rate", self.rate)] {
            if value <= 0.0 {
                return Err(invalid("timescale", field, format!("{value} must be > 0")));
            }
        }
        Ok(())
    }
}

/// Volume oscillation filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tremolo {
    pub frequency: f64,
    pub depth: f64,
}

impl Default for Tremolo {
    fn default() -> Self {
        Self { frequency: 2.0, depth: 0.5 }
    }
}

/// Pitch oscillation filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vibrato {
    pub frequency: f64,
    pub depth: f64,
}

impl Default for Vibrato {
    fn default() -> Self {
        Self { frequency: 2.0, depth: 0.5 }
    }
}

fn validate_oscillator(filter: &'static str, frequency: f64, depth: f64) -> Result<()> {
    if frequency <= 0.0 {
        return Err(invalid(filter, "frequency", format!("{frequency} must be > 0")));
    }
    if depth <= 0.0 || depth > 1.0 {
        return Err(invalid(filter, "depth", format!("{depth} outside (0.0, 1.0]")));
    }
    Ok(())
}

/// Composed DSP filter configuration for one player
///
/// The chain always serializes as a single object and replaces the node-side
/// filter state wholesale; there is no partial application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterChain {
    /// Volume multiplier applied inside the filter pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equalizer: Option<Equalizer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<Karaoke>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timescale: Option<Timescale>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<Tremolo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<Vibrato>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_equalizer(mut self, equalizer: Equalizer) -> Self {
        self.equalizer = Some(equalizer);
        self
    }

    pub fn with_karaoke(mut self, karaoke: Karaoke) -> Self {
        self.karaoke = Some(karaoke);
        self
    }

    pub fn with_timescale(mut self, timescale: Timescale) -> Self {
        self.timescale = Some(timescale);
        self
    }

    pub fn with_tremolo(mut self, tremolo: Tremolo) -> Self {
        self.tremolo = Some(tremolo);
        self
    }

    pub fn with_vibrato(mut self, vibrato: Vibrato) -> Self {
        self.vibrato = Some(vibrato);
        self
    }

    /// Whether no filter is set; an empty chain is sent as an empty object,
    /// which clears all node-side filters
    pub fn is_empty(&self) -> bool {
        self.volume.is_none()
            && self.equalizer.is_none()
            && self.karaoke.is_none()
            && self.timescale.is_none()
            && self.tremolo.is_none()
            && self.vibrato.is_none()
    }

    /// Check every set filter against its declared parameter ranges
    pub fn validate(&self) -> Result<()> {
        if let Some(volume) = self.volume {
            if volume < 0.0 {
                return Err(invalid("filters", "volume", format!("{volume} must be >= 0")));
            }
        }
        if let Some(equalizer) = &self.equalizer {
            equalizer.validate()?;
        }
        if let Some(timescale) = &self.timescale {
            timescale.validate()?;
        }
        if let Some(tremolo) = &self.tremolo {
            validate_oscillator("tremolo", tremolo.frequency, tremolo.depth)?;
        }
        if let Some(vibrato) = &self.vibrato {
            validate_oscillator("vibrato", vibrato.frequency, vibrato.depth)?;
        }
        Ok(())
    }

    /// Validate and merge the chain into the single payload object sent to
    /// the node
    pub fn to_chain(&self) -> Result<serde_json::Value> {
        self.validate()?;
        Ok(serde_json::to_value(self)?)
    }
}

fn invalid(filter: &'static str, field: impl Into<String>, reason: impl Into<String>) -> NodelinkError {
    NodelinkError::FilterValidation {
        filter,
        field: field.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_chain_passes_and_merges() {
        let chain = FilterChain::new()
            .with_equalizer(Equalizer::flat().with_band(0, 0.25).with_band(14, -0.25))
            .with_karaoke(Karaoke::default())
            .with_timescale(Timescale { speed: 1.5, pitch: 0.9, rate: 1.0 })
            .with_tremolo(Tremolo { frequency: 4.0, depth: 1.0 })
            .with_vibrato(Vibrato::default());

        let payload = chain.to_chain().unwrap();
        assert_eq!(payload["equalizer"][0]["gain"], 0.25);
        assert_eq!(payload["karaoke"]["monoLevel"], 1.0);
        assert_eq!(payload["timescale"]["speed"], 1.5);
        assert_eq!(payload["tremolo"]["depth"], 1.0);
    }

    #[test]
    fn equalizer_gain_out_of_range_names_the_band() {
        let chain = FilterChain::new().with_equalizer(Equalizer::flat().with_band(3, 1.5));
        match chain.validate() {
            Err(NodelinkError::FilterValidation { filter, field, .. }) => {
                assert_eq!(filter, "equalizer");
                assert_eq!(field, "gain[3]");
            }
            other => panic!("expected FilterValidation, got {other:?}"),
        }
    }

    #[test]
    fn timescale_multipliers_must_be_positive() {
        let chain = FilterChain::new().with_timescale(Timescale { speed: 0.0, ..Default::default() });
        match chain.validate() {
            Err(NodelinkError::FilterValidation { filter, field, .. }) => {
                assert_eq!(filter, "timescale");
                assert_eq!(field, "speed");
            }
            other => panic!("expected FilterValidation, got {other:?}"),
        }
    }

    #[test]
    fn oscillator_depth_bounds() {
        let chain = FilterChain::new().with_tremolo(Tremolo { frequency: 2.0, depth: 0.0 });
        assert!(chain.validate().is_err());

        let chain = FilterChain::new().with_vibrato(Vibrato { frequency: 2.0, depth: 1.5 });
        match chain.validate() {
            Err(NodelinkError::FilterValidation { filter, field, .. }) => {
                assert_eq!(filter, "vibrato");
                assert_eq!(field, "depth");
            }
            other => panic!("expected FilterValidation, got {other:?}"),
        }

        let chain = FilterChain::new().with_tremolo(Tremolo { frequency: -1.0, depth: 0.5 });
        assert!(chain.validate().is_err());
    }

    #[test]
    fn empty_chain_serializes_to_empty_object() {
        let chain = FilterChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.to_chain().unwrap(), serde_json::json!({}));
    }

    #[test]
    fn chain_round_trips() {
        let chain = FilterChain::new()
            .with_volume(0.8)
            .with_equalizer(Equalizer::new([0.1; EQUALIZER_BANDS]))
            .with_vibrato(Vibrato { frequency: 7.0, depth: 0.3 });

        let json = serde_json::to_string(&chain).unwrap();
        let back: FilterChain = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chain);
    }
}
