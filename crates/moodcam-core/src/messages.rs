//! Voice feedback templates.

use crate::types::EmotionLabel;
use rand::seq::SliceRandom;
use rand::Rng;

const HAPPY: &[&str] = &[
    "I'm glad to see that you are in a good mood today!",
    "Your smile is contagious! Keep spreading that positive energy!",
    "It's wonderful to see you so happy!",
];

const SAD: &[&str] = &[
    "I can see you're feeling down. Remember, brighter days are ahead.",
    "It's okay to feel sad sometimes. Things will get better.",
    "Whatever is weighing on you, you don't have to carry it alone.",
];

const ANGRY: &[&str] = &[
    "I sense some frustration. Take a deep breath and let it go.",
    "Anger is natural, but don't let it control you.",
    "Whatever is bothering you, you have the strength to overcome it.",
];

const NEUTRAL: &[&str] = &[
    "You seem calm and composed today.",
    "A balanced state of mind is a powerful thing.",
    "Neutral energy can be peaceful energy.",
];

const SURPRISED: &[&str] = &[
    "You look surprised! I hope it's a pleasant surprise!",
    "Life is full of unexpected moments, isn't it?",
];

const FEARFUL: &[&str] = &[
    "I can sense some worry. Everything will be alright.",
    "Don't be afraid. You're stronger than you think.",
];

const DISGUSTED: &[&str] = &[
    "Something bothering you? Let's focus on the positive.",
    "Try to find something that brings you joy today.",
];

const GREETING_MORNING: &str =
    "Good morning! Welcome to MoodCam. Let me see your beautiful face!";
const GREETING_AFTERNOON: &str = "Good afternoon! Ready to analyze your emotions?";
const GREETING_EVENING: &str = "Good evening! Let's see how you're feeling today!";

/// Candidate phrasings for an emotion.
pub fn templates(emotion: EmotionLabel) -> &'static [&'static str] {
    match emotion {
        EmotionLabel::Happy => HAPPY,
        EmotionLabel::Sad => SAD,
        EmotionLabel::Angry => ANGRY,
        EmotionLabel::Neutral => NEUTRAL,
        EmotionLabel::Surprised => SURPRISED,
        EmotionLabel::Fearful => FEARFUL,
        EmotionLabel::Disgusted => DISGUSTED,
    }
}

/// Pick one phrasing for `emotion`, uniformly at random.
pub fn emotion_message<R: Rng + ?Sized>(emotion: EmotionLabel, rng: &mut R) -> &'static str {
    let candidates = templates(emotion);
    candidates.choose(rng).copied().unwrap_or(candidates[0])
}

/// Greeting for a local hour of day (0–23).
pub fn greeting_for_hour(hour: u32) -> &'static str {
    if hour < 12 {
        GREETING_MORNING
    } else if hour < 18 {
        GREETING_AFTERNOON
    } else {
        GREETING_EVENING
    }
}
