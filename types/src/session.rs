use crate::audio::{Modality, Voice};
use crate::content::Content;
use crate::tools::Tool;

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// The first message of every live session.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified model name, ex: "models/gemini-2.0-flash-live-001"
    model: String,

    generation_config: GenerationConfig,

    /// System instructions for the whole session.
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,

    /// Tools(Functions) available to the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

impl Setup {
    pub fn new() -> SetupConfigurator {
        SetupConfigurator::new()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation_config
    }

    pub fn system_instruction(&self) -> Option<&Content> {
        self.system_instruction.as_ref()
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    response_modalities: Vec<Modality>,

    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl GenerationConfig {
    pub fn response_modalities(&self) -> &[Modality] {
        &self.response_modalities
    }

    pub fn voice(&self) -> Option<&Voice> {
        self.speech_config
            .as_ref()
            .map(|speech| &speech.voice_config.prebuilt_voice_config.voice_name)
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: Voice,
}

pub struct SetupConfigurator {
    setup: Setup,
}

impl SetupConfigurator {
    pub fn new() -> Self {
        Self {
            setup: Setup {
                model: DEFAULT_MODEL.to_string(),
                generation_config: GenerationConfig {
                    response_modalities: vec![Modality::Audio],
                    speech_config: None,
                    temperature: None,
                },
                system_instruction: None,
                tools: vec![],
            },
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.setup.model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        self
    }

    pub fn with_modalities(mut self, modalities: Vec<Modality>) -> Self {
        self.setup.generation_config.response_modalities = modalities;
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.setup.generation_config.speech_config = Some(SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: voice },
            },
        });
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.setup.generation_config.temperature = Some(temperature);
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.setup.system_instruction = Some(Content::from_text(instructions.trim()));
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.setup.tools = tools;
        self
    }

    pub fn build(self) -> Setup {
        self.setup
    }
}

impl Default for SetupConfigurator {
    fn default() -> Self {
        Self::new()
    }
}
