//! Read-only views of a session, shared by the daemon and the CLI.

use crate::types::{EmotionLabel, Gender, Observation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One row of the expression breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionRow {
    pub emotion: EmotionLabel,
    pub label: String,
    pub percent: u32,
}

/// What the analysis dashboard shows for the latest observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardView {
    pub emotion: EmotionLabel,
    pub label: String,
    pub confidence_percent: u32,
    pub age: u32,
    pub gender: Gender,
    /// All expressions, highest first; equal values keep label order.
    pub expressions: Vec<ExpressionRow>,
}

impl DashboardView {
    pub fn from_observation(obs: &Observation) -> Self {
        let mut expressions: Vec<ExpressionRow> = obs
            .expressions()
            .iter()
            .map(|(emotion, p)| ExpressionRow {
                emotion,
                label: emotion.display_name().to_string(),
                percent: percent(p),
            })
            .collect();
        // Stable sort keeps label order for equal percentages.
        expressions.sort_by(|a, b| b.percent.cmp(&a.percent));

        Self {
            emotion: obs.dominant_emotion(),
            label: obs.dominant_emotion().display_name().to_string(),
            confidence_percent: percent(obs.dominant_confidence()),
            age: obs.age().round() as u32,
            gender: obs.gender(),
            expressions,
        }
    }
}

fn percent(p: f32) -> u32 {
    (p.clamp(0.0, 1.0) * 100.0).round() as u32
}

impl fmt::Display for DashboardView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current emotion: {} ({}% confident)", self.label, self.confidence_percent)?;
        writeln!(f, "Estimated age:   {}", self.age)?;
        writeln!(f, "Gender:          {}", self.gender)?;
        writeln!(f, "Expressions:")?;
        for row in &self.expressions {
            writeln!(f, "  {:<10} {:>3}%", row.label, row.percent)?;
        }
        Ok(())
    }
}

/// Observable state of the daemon's session controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: String,
    pub session_id: Option<String>,
    pub analyzing: bool,
    pub models_loaded: bool,
    pub model_error: Option<String>,
    pub capture_error: Option<String>,
    pub analysis: Option<DashboardView>,
    pub last_spoken_emotion: Option<EmotionLabel>,
    pub voice_message: Option<String>,
    pub speaking: bool,
    pub muted: bool,
}

impl fmt::Display for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.analyzing { "analyzing" } else { "idle" };
        writeln!(f, "moodcamd {}: {state}", self.version)?;
        writeln!(f, "Models loaded:   {}", if self.models_loaded { "yes" } else { "no" })?;
        if let Some(err) = &self.capture_error {
            writeln!(f, "Camera error:    {err}")?;
        }
        if let Some(err) = &self.model_error {
            writeln!(f, "Model error:     {err}")?;
        }
        match &self.analysis {
            Some(view) => write!(f, "{view}")?,
            None if self.analyzing => writeln!(f, "Analyzing...")?,
            None => writeln!(f, "Start a session to begin analysis")?,
        }
        if let Some(msg) = &self.voice_message {
            let voice = if self.speaking {
                "Speaking"
            } else if self.muted {
                "Muted"
            } else {
                "Voice"
            };
            writeln!(f, "{voice}: {msg}")?;
        }
        Ok(())
    }
}
