use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box for a detected face, in source-frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        let inter = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// The seven expressions the analyzer reports, in fixed order.
///
/// The order is significant: it breaks ties when picking the dominant
/// emotion of an [`Observation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Happy,
    Sad,
    Angry,
    Neutral,
    Surprised,
    Fearful,
    Disgusted,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 7] = [
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Angry,
        EmotionLabel::Neutral,
        EmotionLabel::Surprised,
        EmotionLabel::Fearful,
        EmotionLabel::Disgusted,
    ];

    /// Lowercase key, as used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Angry => "angry",
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Surprised => "surprised",
            EmotionLabel::Fearful => "fearful",
            EmotionLabel::Disgusted => "disgusted",
        }
    }

    /// Capitalized name for dashboards.
    pub fn display_name(self) -> &'static str {
        match self {
            EmotionLabel::Happy => "Happy",
            EmotionLabel::Sad => "Sad",
            EmotionLabel::Angry => "Angry",
            EmotionLabel::Neutral => "Neutral",
            EmotionLabel::Surprised => "Surprised",
            EmotionLabel::Fearful => "Fearful",
            EmotionLabel::Disgusted => "Disgusted",
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => f.write_str("male"),
            Gender::Female => f.write_str("female"),
        }
    }
}

/// Per-emotion probabilities in [0, 1]. Values need not sum to 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Expressions {
    #[serde(default)]
    pub happy: f32,
    #[serde(default)]
    pub sad: f32,
    #[serde(default)]
    pub angry: f32,
    #[serde(default)]
    pub neutral: f32,
    #[serde(default)]
    pub surprised: f32,
    #[serde(default)]
    pub fearful: f32,
    #[serde(default)]
    pub disgusted: f32,
}

impl Expressions {
    /// Probability for `label`. Undefined (NaN) values read as 0.
    pub fn get(&self, label: EmotionLabel) -> f32 {
        let value = match label {
            EmotionLabel::Happy => self.happy,
            EmotionLabel::Sad => self.sad,
            EmotionLabel::Angry => self.angry,
            EmotionLabel::Neutral => self.neutral,
            EmotionLabel::Surprised => self.surprised,
            EmotionLabel::Fearful => self.fearful,
            EmotionLabel::Disgusted => self.disgusted,
        };
        if value.is_nan() {
            0.0
        } else {
            value
        }
    }

    pub fn set(&mut self, label: EmotionLabel, value: f32) {
        let slot = match label {
            EmotionLabel::Happy => &mut self.happy,
            EmotionLabel::Sad => &mut self.sad,
            EmotionLabel::Angry => &mut self.angry,
            EmotionLabel::Neutral => &mut self.neutral,
            EmotionLabel::Surprised => &mut self.surprised,
            EmotionLabel::Fearful => &mut self.fearful,
            EmotionLabel::Disgusted => &mut self.disgusted,
        };
        *slot = value;
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, label: EmotionLabel, value: f32) -> Self {
        self.set(label, value);
        self
    }

    /// Iterate `(label, probability)` in fixed label order.
    pub fn iter(&self) -> impl Iterator<Item = (EmotionLabel, f32)> + '_ {
        EmotionLabel::ALL.into_iter().map(move |label| (label, self.get(label)))
    }

    /// Label with the highest probability and that probability.
    ///
    /// Scans [`EmotionLabel::ALL`] in order and only replaces the current
    /// best on a strictly greater value, so the earliest label wins ties.
    pub fn dominant(&self) -> (EmotionLabel, f32) {
        let mut best = (EmotionLabel::ALL[0], self.get(EmotionLabel::ALL[0]));
        for label in EmotionLabel::ALL.into_iter().skip(1) {
            let p = self.get(label);
            if p > best.1 {
                best = (label, p);
            }
        }
        best
    }
}

/// One inference result for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ObservationFields")]
pub struct Observation {
    age: f32,
    gender: Gender,
    expressions: Expressions,
    dominant_emotion: EmotionLabel,
    dominant_confidence: f32,
}

impl Observation {
    /// Build an observation, deriving the dominant emotion from `expressions`.
    /// Negative or undefined age estimates clamp to 0.
    pub fn new(age: f32, gender: Gender, expressions: Expressions) -> Self {
        let (dominant_emotion, dominant_confidence) = expressions.dominant();
        Self {
            age: if age.is_nan() { 0.0 } else { age.max(0.0) },
            gender,
            expressions,
            dominant_emotion,
            dominant_confidence,
        }
    }

    pub fn age(&self) -> f32 {
        self.age
    }

    pub fn gender(&self) -> Gender {
        self.gender
    }

    pub fn expressions(&self) -> &Expressions {
        &self.expressions
    }

    pub fn dominant_emotion(&self) -> EmotionLabel {
        self.dominant_emotion
    }

    pub fn dominant_confidence(&self) -> f32 {
        self.dominant_confidence
    }
}

/// The inputs of an [`Observation`]; the dominant emotion is re-derived on load.
#[derive(Deserialize)]
struct ObservationFields {
    age: f32,
    gender: Gender,
    expressions: Expressions,
}

impl From<ObservationFields> for Observation {
    fn from(fields: ObservationFields) -> Self {
        Observation::new(fields.age, fields.gender, fields.expressions)
    }
}
