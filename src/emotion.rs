use anyhow::Result;
use base64::Engine;
use image::RgbImage;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::annotation::AnnotationStage;
use crate::error::DetectionError;
use crate::stream::encode_jpeg;

/// Emotion vocabulary reported by the emotion stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == label)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-class emotion scores, indexed in [`Emotion::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EmotionScores(pub [f32; 7]);

impl EmotionScores {
    pub fn get(&self, emotion: Emotion) -> f32 {
        self.0[emotion.index()]
    }

    pub fn set(&mut self, emotion: Emotion, score: f32) {
        self.0[emotion.index()] = score;
    }

    /// Highest-scoring emotion; ties go to the earlier class.
    pub fn dominant(&self) -> Emotion {
        let mut best = Emotion::ALL[0];
        for emotion in Emotion::ALL {
            if self.get(emotion) > self.get(best) {
                best = emotion;
            }
        }
        best
    }
}

/// Backend that scores the emotions of the face in a frame.
pub trait EmotionModel {
    fn scores(&mut self, frame: &RgbImage) -> Result<EmotionScores>;
}

/// Emotion backend reached over HTTP.
///
/// Posts the frame as a base64 data URI and accepts DeepFace-style answers:
/// `{"results": [{"emotion": {..}}]}`, `[{"emotion": {..}}]` or
/// `{"emotion": {..}}`.
pub struct RemoteEmotionModel {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl RemoteEmotionModel {
    pub fn new(endpoint: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl EmotionModel for RemoteEmotionModel {
    fn scores(&mut self, frame: &RgbImage) -> Result<EmotionScores> {
        let jpeg = encode_jpeg(frame, 85)?;
        let data_uri = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&jpeg)
        );

        let body = json!({
            "img": data_uri,
            "img_path": data_uri,
            "actions": ["emotion"],
            "enforce_detection": false,
        });

        let response = self.client.post(&self.endpoint).json(&body).send()?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Emotion backend returned HTTP {}",
                response.status()
            ));
        }

        let value: Value = response.json()?;
        Ok(parse_emotion_scores(&value)?)
    }
}

/// Extract per-class scores from a DeepFace-style response body.
pub fn parse_emotion_scores(value: &Value) -> Result<EmotionScores, DetectionError> {
    let first_face = |v: &Value| match v {
        Value::Array(items) => items.first().cloned(),
        other => Some(other.clone()),
    };

    let face = match value.get("results") {
        Some(results) => first_face(results),
        None => first_face(value),
    }
    .ok_or_else(|| DetectionError::MalformedResponse {
        reason: "no face in response".into(),
    })?;

    let emotions = face
        .get("emotion")
        .and_then(Value::as_object)
        .ok_or_else(|| DetectionError::MalformedResponse {
            reason: "missing 'emotion' object".into(),
        })?;

    let mut scores = EmotionScores::default();
    let mut known = 0;
    for (label, score) in emotions {
        if let (Some(emotion), Some(score)) = (Emotion::from_label(label), score.as_f64()) {
            scores.set(emotion, score as f32);
            known += 1;
        }
    }

    if known == 0 {
        return Err(DetectionError::MalformedResponse {
            reason: "no known emotion classes".into(),
        });
    }

    Ok(scores)
}

/// Emotion stage with flicker suppression.
///
/// Keeps the scores of the last `window` successful inferences and reports
/// the argmax of their average. Failed inferences are not added to the window.
pub struct EmotionDetector {
    model: Box<dyn EmotionModel>,
    history: VecDeque<EmotionScores>,
    window: usize,
}

impl EmotionDetector {
    pub fn new(model: Box<dyn EmotionModel>, window: usize) -> Self {
        let window = window.max(1);
        Self {
            model,
            history: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Average of the scores currently in the window.
    pub fn averaged(&self) -> Option<EmotionScores> {
        if self.history.is_empty() {
            return None;
        }
        let mut sum = EmotionScores::default();
        for scores in &self.history {
            for (total, value) in sum.0.iter_mut().zip(scores.0) {
                *total += value;
            }
        }
        let n = self.history.len() as f32;
        sum.0.iter_mut().for_each(|v| *v /= n);
        Some(sum)
    }
}

impl AnnotationStage for EmotionDetector {
    type Output = Emotion;

    fn name(&self) -> &'static str {
        "Emotion"
    }

    fn analyze(&mut self, frame: &RgbImage) -> Result<Emotion> {
        let scores = self.model.scores(frame)?;

        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(scores);

        Ok(self
            .averaged()
            .map(|avg| avg.dominant())
            .unwrap_or(Emotion::Neutral))
    }
}
