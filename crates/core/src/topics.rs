//! Topic Registry
//!
//! Maps logical pipeline events and commands to wire-level bus topics. The
//! default names are the interface existing services listen on and must be
//! preserved byte-for-byte. Deployments that run the pipeline under another
//! root use [`TopicRegistry::with_prefix`] instead of duplicating wiring.

use serde::{Deserialize, Serialize};

use crate::command::{CommandAction, Service};
use crate::event::EventKind;

/// Root used by the stock pipeline services
pub const DEFAULT_TOPIC_PREFIX: &str = "rhasspy";

/// Wire topics for every lifecycle event and control command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicRegistry {
    // Inbound
    pub wake_detected: String,
    pub command_stopped: String,
    pub command_timeout: String,
    pub text_captured: String,
    pub intent_recognized: String,

    // Outbound
    pub wake_stop_listening: String,
    pub wake_start_listening: String,
    pub voice_command_start_listening: String,
    pub voice_command_stop_listening: String,
    pub speech_to_text_start_listening: String,
    pub speech_to_text_stop_listening: String,
    pub recognize_intent: String,
    pub say_text: String,
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_TOPIC_PREFIX)
    }
}

impl TopicRegistry {
    /// Build the full topic map under `prefix`
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        let t = |path: &str| format!("{}/{}", prefix, path);
        Self {
            wake_detected: t("wake-word/detected"),
            command_stopped: t("voice-command/command-stopped"),
            command_timeout: t("voice-command/command-timeout"),
            text_captured: t("speech-to-text/text-captured"),
            intent_recognized: t("intent-recognition/intent-recognized"),
            wake_stop_listening: t("wake-word/stop-listening"),
            wake_start_listening: t("wake-word/start-listening"),
            voice_command_start_listening: t("voice-command/start-listening"),
            voice_command_stop_listening: t("voice-command/stop-listening"),
            speech_to_text_start_listening: t("speech-to-text/start-listening"),
            speech_to_text_stop_listening: t("speech-to-text/stop-listening"),
            recognize_intent: t("intent-recognition/recognize-intent"),
            say_text: t("text-to-speech/say-text"),
        }
    }

    /// Topic on which an event of `kind` arrives
    pub fn topic_for_event(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::WakeDetected => &self.wake_detected,
            EventKind::CommandStopped => &self.command_stopped,
            EventKind::CommandTimedOut => &self.command_timeout,
            EventKind::TextCaptured => &self.text_captured,
            EventKind::IntentRecognized => &self.intent_recognized,
        }
    }

    /// Topic for a command, `None` when the service does not accept the action
    pub fn topic_for(&self, service: Service, action: CommandAction) -> Option<&str> {
        use CommandAction::*;
        let topic = match (service, action) {
            (Service::WakeWord, StartListening) => &self.wake_start_listening,
            (Service::WakeWord, StopListening) => &self.wake_stop_listening,
            (Service::VoiceCommand, StartListening) => &self.voice_command_start_listening,
            (Service::VoiceCommand, StopListening) => &self.voice_command_stop_listening,
            (Service::SpeechToText, StartListening) => &self.speech_to_text_start_listening,
            (Service::SpeechToText, StopListening) => &self.speech_to_text_stop_listening,
            (Service::IntentRecognition, Recognize) => &self.recognize_intent,
            (Service::TextToSpeech, Say) => &self.say_text,
            _ => return None,
        };
        Some(topic.as_str())
    }

    /// All inbound topics with their event kinds
    pub fn inbound(&self) -> Vec<(EventKind, &str)> {
        EventKind::ALL
            .into_iter()
            .map(|kind| (kind, self.topic_for_event(kind)))
            .collect()
    }

    fn all(&self) -> [(&'static str, &str); 13] {
        [
            ("wake_detected", self.wake_detected.as_str()),
            ("command_stopped", self.command_stopped.as_str()),
            ("command_timeout", self.command_timeout.as_str()),
            ("text_captured", self.text_captured.as_str()),
            ("intent_recognized", self.intent_recognized.as_str()),
            ("wake_stop_listening", self.wake_stop_listening.as_str()),
            ("wake_start_listening", self.wake_start_listening.as_str()),
            ("voice_command_start_listening", self.voice_command_start_listening.as_str()),
            ("voice_command_stop_listening", self.voice_command_stop_listening.as_str()),
            ("speech_to_text_start_listening", self.speech_to_text_start_listening.as_str()),
            ("speech_to_text_stop_listening", self.speech_to_text_stop_listening.as_str()),
            ("recognize_intent", self.recognize_intent.as_str()),
            ("say_text", self.say_text.as_str()),
        ]
    }

    /// Check that every topic is publishable and inbound topics are distinct
    ///
    /// Returns the offending field name and a message on failure.
    pub fn validate(&self) -> Result<(), (String, String)> {
        for (field, topic) in self.all() {
            if topic.is_empty() {
                return Err((field.to_string(), "topic is empty".to_string()));
            }
            if topic.contains(['+', '#']) {
                return Err((field.to_string(), format!("'{}' contains a wildcard", topic)));
            }
            if topic.contains(char::is_whitespace) {
                return Err((field.to_string(), format!("'{}' contains whitespace", topic)));
            }
        }

        let inbound = self.inbound();
        for (i, (kind, topic)) in inbound.iter().enumerate() {
            if inbound[..i].iter().any(|(_, other)| other == topic) {
                return Err((
                    kind.as_str().to_string(),
                    format!("'{}' is used by more than one inbound event", topic),
                ));
            }
        }

        Ok(())
    }
}

/// Match a topic against a subscription filter
///
/// `+` matches exactly one level, `#` matches the remaining levels (including
/// none) and is only valid as the last level.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topics_match_wire_contract() {
        let topics = TopicRegistry::default();
        assert_eq!(topics.wake_detected, "rhasspy/wake-word/detected");
        assert_eq!(topics.wake_stop_listening, "rhasspy/wake-word/stop-listening");
        assert_eq!(topics.wake_start_listening, "rhasspy/wake-word/start-listening");
        assert_eq!(
            topics.voice_command_start_listening,
            "rhasspy/voice-command/start-listening"
        );
        assert_eq!(topics.command_stopped, "rhasspy/voice-command/command-stopped");
        assert_eq!(
            topics.speech_to_text_start_listening,
            "rhasspy/speech-to-text/start-listening"
        );
        assert_eq!(
            topics.speech_to_text_stop_listening,
            "rhasspy/speech-to-text/stop-listening"
        );
        assert_eq!(topics.text_captured, "rhasspy/speech-to-text/text-captured");
        assert_eq!(
            topics.recognize_intent,
            "rhasspy/intent-recognition/recognize-intent"
        );
        assert_eq!(
            topics.intent_recognized,
            "rhasspy/intent-recognition/intent-recognized"
        );
        assert_eq!(topics.say_text, "rhasspy/text-to-speech/say-text");
        assert!(topics.validate().is_ok());
    }

    #[test]
    fn test_with_prefix() {
        let topics = TopicRegistry::with_prefix("kitchen/");
        assert_eq!(topics.wake_detected, "kitchen/wake-word/detected");
        assert_eq!(
            topics.topic_for_event(EventKind::TextCaptured),
            "kitchen/speech-to-text/text-captured"
        );
    }

    #[test]
    fn test_validate_rejects_duplicates_and_wildcards() {
        let mut topics = TopicRegistry::default();
        topics.text_captured = topics.wake_detected.clone();
        assert!(topics.validate().is_err());

        let mut topics = TopicRegistry::default();
        topics.say_text = "rhasspy/#".to_string();
        let (field, _) = topics.validate().unwrap_err();
        assert_eq!(field, "say_text");
    }

    #[test]
    fn test_partial_override_deserializes() {
        let topics: TopicRegistry =
            serde_json::from_str(r#"{"say_text": "custom/say"}"#).unwrap();
        assert_eq!(topics.say_text, "custom/say");
        assert_eq!(topics.wake_detected, "rhasspy/wake-word/detected");
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("rhasspy/wake-word/detected", "rhasspy/wake-word/detected"));
        assert!(topic_matches("rhasspy/+/detected", "rhasspy/wake-word/detected"));
        assert!(topic_matches("rhasspy/#", "rhasspy/wake-word/detected"));
        assert!(topic_matches("rhasspy/#", "rhasspy"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("rhasspy/+", "rhasspy/wake-word/detected"));
        assert!(!topic_matches("rhasspy/wake-word", "rhasspy/wake-word/detected"));
        assert!(!topic_matches("rhasspy/wake-word/detected/extra", "rhasspy/wake-word/detected"));
        assert!(!topic_matches("rhasspy/#/detected", "rhasspy/wake-word/detected"));
    }
}
