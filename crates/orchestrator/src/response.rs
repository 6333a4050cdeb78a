//! Spoken responses derived from recognized intents
//!
//! The intent recognizer publishes a JSON document. Both shapes seen in
//! practice are accepted:
//!
//! ```json
//! {"intent": "ChangeLightState", "slots": {"state": "on"}, "text": "turn on the lights"}
//! {"intent": {"name": "ChangeLightState"}, "entities": [{"entity": "state", "value": "on"}]}
//! ```

use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;

use voice_flow_config::ResponseSettings;

/// Fields pulled out of an intent payload
#[derive(Debug, Default, Clone, PartialEq)]
struct RecognizedIntent {
    name: String,
    text: String,
    slots: Vec<(String, String)>,
}

impl RecognizedIntent {
    fn parse(payload: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(payload).ok()?;
        let object = value.as_object()?;

        let name = match object.get("intent") {
            Some(Value::String(name)) => name.clone(),
            Some(Value::Object(intent)) => intent
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };

        let text = object
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut slots = Vec::new();
        if let Some(Value::Object(map)) = object.get("slots") {
            slots.extend(map.iter().map(|(k, v)| (k.clone(), slot_text(v))));
        }
        if let Some(Value::Array(entities)) = object.get("entities") {
            for entity in entities {
                let key = entity.get("entity").and_then(Value::as_str);
                let value = entity.get("value");
                if let (Some(key), Some(value)) = (key, value) {
                    slots.push((key.to_string(), slot_text(value)));
                }
            }
        }

        Some(Self { name, text, slots })
    }
}

fn slot_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("value")
            .map(slot_text)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

/// Builds the text-to-speech payload for a recognized intent
#[derive(Debug, Clone)]
pub struct ResponseComposer {
    /// Keyed by lowercased intent name
    templates: HashMap<String, String>,
    default_template: String,
    fallback: String,
}

impl Default for ResponseComposer {
    fn default() -> Self {
        Self::new(&ResponseSettings::default())
    }
}

impl ResponseComposer {
    pub fn new(settings: &ResponseSettings) -> Self {
        Self {
            templates: settings
                .templates
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
            default_template: settings.default_template.clone(),
            fallback: settings.fallback.clone(),
        }
    }

    /// The sentence to speak for an intent payload
    pub fn compose(&self, payload: &[u8]) -> String {
        let intent = match RecognizedIntent::parse(payload) {
            Some(intent) if !intent.name.is_empty() => intent,
            _ => return self.fallback.clone(),
        };

        let template = self
            .templates
            .get(&intent.name.to_lowercase())
            .unwrap_or(&self.default_template);

        let mut sentence = template.clone();
        for (slot, value) in &intent.slots {
            sentence = sentence.replace(&format!("{{{}}}", slot), value);
        }
        sentence
            .replace("{intent}", &intent.name)
            .replace("{text}", &intent.text)
    }

    /// `{"text": "<sentence>"}` for the say-text topic
    pub fn render(&self, payload: &[u8]) -> Bytes {
        let body = serde_json::json!({ "text": self.compose(payload) });
        Bytes::from(body.to_string())
    }
}
