//! Electrode contact quality.
//!
//! Maps raw resistance readings (Ω) to quality tiers and the compact text
//! shown on the live screen, e.g.
//!
//! ```text
//! O1: 45k✓ • O2: 180k○ • T3: 1200k● • T4: ∞✗
//! ```

use std::fmt;

use crate::protocol::{
    CHANNEL_NAMES, EXCELLENT_BELOW_OHMS, FAIR_BELOW_OHMS, GOOD_BELOW_OHMS, POOR_BELOW_OHMS,
};
use crate::types::ResistanceSample;

/// Text shown instead of per-channel tiers when no electrode touches skin.
pub const NO_CONTACT_MESSAGE: &str = "No contact: apply the electrodes to the scalp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResistanceQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    NoContact,
}

impl ResistanceQuality {
    pub fn symbol(self) -> &'static str {
        match self {
            ResistanceQuality::Excellent => "✓",
            ResistanceQuality::Good => "○",
            ResistanceQuality::Fair => "◐",
            ResistanceQuality::Poor => "●",
            ResistanceQuality::NoContact => "✗",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResistanceQuality::Excellent => "excellent",
            ResistanceQuality::Good => "good",
            ResistanceQuality::Fair => "fair",
            ResistanceQuality::Poor => "poor",
            ResistanceQuality::NoContact => "no contact",
        }
    }
}

/// Classify one reading.  Thresholds are exclusive upper bounds.
pub fn classify(ohms: f64) -> ResistanceQuality {
    if !ohms.is_finite() {
        ResistanceQuality::NoContact
    } else if ohms < EXCELLENT_BELOW_OHMS {
        ResistanceQuality::Excellent
    } else if ohms < GOOD_BELOW_OHMS {
        ResistanceQuality::Good
    } else if ohms < FAIR_BELOW_OHMS {
        ResistanceQuality::Fair
    } else if ohms < POOR_BELOW_OHMS {
        ResistanceQuality::Poor
    } else {
        ResistanceQuality::NoContact
    }
}

/// Compact value text: `∞`, `?` for NaN, otherwise whole kΩ.
pub fn format_ohms(ohms: f64) -> String {
    if ohms.is_infinite() {
        "∞".to_owned()
    } else if ohms.is_nan() {
        "?".to_owned()
    } else {
        format!("{:.0}k", ohms / 1000.0)
    }
}

/// Quality of one electrode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelResistance {
    pub name: &'static str,
    pub ohms: f64,
    pub quality: ResistanceQuality,
}

/// Display form of a full [`ResistanceSample`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResistanceReport {
    /// All four electrodes read `+∞`.
    NoContact,
    Channels([ChannelResistance; 4]),
}

impl ResistanceReport {
    pub fn from_sample(sample: &ResistanceSample) -> Self {
        let values = sample.channels();
        if values.iter().all(|&v| v == f64::INFINITY) {
            return ResistanceReport::NoContact;
        }
        ResistanceReport::Channels(std::array::from_fn(|i| ChannelResistance {
            name: CHANNEL_NAMES[i],
            ohms: values[i],
            quality: classify(values[i]),
        }))
    }

    /// Worst tier across the electrodes.
    pub fn worst(&self) -> ResistanceQuality {
        match self {
            ResistanceReport::NoContact => ResistanceQuality::NoContact,
            ResistanceReport::Channels(ch) => ch
                .iter()
                .map(|c| c.quality)
                .max()
                .unwrap_or(ResistanceQuality::NoContact),
        }
    }
}

impl fmt::Display for ResistanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResistanceReport::NoContact => f.write_str(NO_CONTACT_MESSAGE),
            ResistanceReport::Channels(ch) => {
                for (i, c) in ch.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" • ")?;
                    }
                    write!(f, "{}: {}{}", c.name, format_ohms(c.ohms), c.quality.symbol())?;
                }
                Ok(())
            }
        }
    }
}

/// One-line log form with raw ohms, `INF` and `NaN` spelled out.
pub fn log_line(sample: &ResistanceSample) -> String {
    let mut out = String::from("Resistance data received:");
    for (name, v) in CHANNEL_NAMES.iter().zip(sample.channels()) {
        let value = if v.is_infinite() {
            "INF".to_owned()
        } else if v.is_nan() {
            "NaN".to_owned()
        } else {
            format!("{v:.0}")
        };
        out.push_str(&format!(" {name}={value}Ω"));
    }
    out
}
