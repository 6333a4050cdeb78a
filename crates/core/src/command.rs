//! Outbound control commands

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::topics::TopicRegistry;

/// Pipeline services addressed by control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    WakeWord,
    VoiceCommand,
    SpeechToText,
    IntentRecognition,
    TextToSpeech,
}

impl Service {
    /// Service name as used in topic paths
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::WakeWord => "wake-word",
            Service::VoiceCommand => "voice-command",
            Service::SpeechToText => "speech-to-text",
            Service::IntentRecognition => "intent-recognition",
            Service::TextToSpeech => "text-to-speech",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a command asks the target service to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    StartListening,
    StopListening,
    Recognize,
    Say,
}

impl CommandAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandAction::StartListening => "start_listening",
            CommandAction::StopListening => "stop_listening",
            CommandAction::Recognize => "recognize",
            CommandAction::Say => "say",
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound fire-and-forget directive to a pipeline service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    target: Service,
    action: CommandAction,
    payload: Bytes,
}

impl ControlCommand {
    pub fn new(target: Service, action: CommandAction, payload: impl Into<Bytes>) -> Self {
        Self {
            target,
            action,
            payload: payload.into(),
        }
    }

    pub fn start(target: Service) -> Self {
        Self::new(target, CommandAction::StartListening, Bytes::new())
    }

    pub fn stop(target: Service) -> Self {
        Self::new(target, CommandAction::StopListening, Bytes::new())
    }

    pub fn target(&self) -> Service {
        self.target
    }

    pub fn action(&self) -> CommandAction {
        self.action
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Topic this command is published on, if the registry defines one
    pub fn topic<'a>(&self, topics: &'a TopicRegistry) -> Option<&'a str> {
        topics.topic_for(self.target, self.action)
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.action, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display() {
        let cmd = ControlCommand::stop(Service::WakeWord);
        assert_eq!(cmd.to_string(), "stop_listening(wake-word)");
        assert!(cmd.payload().is_empty());
    }

    #[test]
    fn test_command_topic_resolution() {
        let topics = TopicRegistry::default();
        let cmd = ControlCommand::start(Service::SpeechToText);
        assert_eq!(
            cmd.topic(&topics),
            Some("rhasspy/speech-to-text/start-listening")
        );
        let cmd = ControlCommand::new(Service::WakeWord, CommandAction::Say, "x");
        assert_eq!(cmd.topic(&topics), None);
    }
}
