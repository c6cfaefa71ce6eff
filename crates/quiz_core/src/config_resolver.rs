//! crates/quiz_core/src/config_resolver.rs
//!
//! Reconciles the two configuration modes into one canonical `QuizConfiguration`.
//!
//! In AI mode the generation service picks difficulty and (optionally) the
//! question count. In manual mode the user picks both. Switching into AI mode
//! snapshots the manual settings so that switching back restores them.

use crate::domain::{Difficulty, QuizConfiguration};

pub const DEFAULT_DIFFICULTY: Difficulty = Difficulty::Medium;
pub const DEFAULT_NUM_QUESTIONS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    AiDetermined,
    Manual,
}

/// The manual settings remembered while AI mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualSettings {
    pub difficulty: Difficulty,
    pub num_questions: u32,
}

impl Default for ManualSettings {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            num_questions: DEFAULT_NUM_QUESTIONS,
        }
    }
}

impl ManualSettings {
    /// Replaces values that are invalid in manual mode with the defaults.
    fn sanitized(self) -> Self {
        Self {
            difficulty: match self.difficulty {
                Difficulty::AiDetermined => DEFAULT_DIFFICULTY,
                other => other,
            },
            num_questions: if self.num_questions == 0 {
                DEFAULT_NUM_QUESTIONS
            } else {
                self.num_questions
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub config: QuizConfiguration,
    pub remembered: ManualSettings,
}

/// Resolves the configuration for `mode` from the previous one.
///
/// `user_difficulty` / `user_num_questions` are explicit user edits to apply on
/// top; `None` keeps what the mode switch produced.
pub fn resolve(
    mode: ConfigMode,
    previous: &QuizConfiguration,
    remembered: ManualSettings,
    user_difficulty: Option<Difficulty>,
    user_num_questions: Option<u32>,
    language: &str,
) -> Resolution {
    let was_ai = previous.is_ai_determined();

    match mode {
        ConfigMode::AiDetermined => {
            let (remembered, base_count) = if was_ai {
                (remembered, previous.num_questions)
            } else {
                let snapshot = ManualSettings {
                    difficulty: previous.difficulty,
                    num_questions: previous.num_questions,
                };
                (snapshot, 0)
            };

            Resolution {
                config: QuizConfiguration {
                    num_questions: user_num_questions.unwrap_or(base_count),
                    difficulty: Difficulty::AiDetermined,
                    language: language.to_string(),
                    custom_prompt: previous.custom_prompt.clone(),
                },
                remembered,
            }
        }
        ConfigMode::Manual => {
            let base = if was_ai {
                remembered.sanitized()
            } else {
                ManualSettings {
                    difficulty: previous.difficulty,
                    num_questions: previous.num_questions,
                }
                .sanitized()
            };

            let difficulty = match user_difficulty {
                Some(Difficulty::AiDetermined) | None => base.difficulty,
                Some(chosen) => chosen,
            };
            let num_questions = user_num_questions.unwrap_or(base.num_questions).max(1);

            Resolution {
                config: QuizConfiguration {
                    num_questions,
                    difficulty,
                    language: language.to_string(),
                    custom_prompt: previous.custom_prompt.clone(),
                },
                remembered,
            }
        }
    }
}

/// Keeps the current configuration and the remembered manual snapshot for one client.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    config: QuizConfiguration,
    remembered: ManualSettings,
}

impl ConfigResolver {
    /// Starts in manual mode with the defaults.
    pub fn new(language: impl Into<String>) -> Self {
        let defaults = ManualSettings::default();
        Self {
            config: QuizConfiguration {
                num_questions: defaults.num_questions,
                difficulty: defaults.difficulty,
                language: language.into(),
                custom_prompt: None,
            },
            remembered: defaults,
        }
    }

    pub fn configuration(&self) -> &QuizConfiguration {
        &self.config
    }

    pub fn mode(&self) -> ConfigMode {
        if self.config.is_ai_determined() {
            ConfigMode::AiDetermined
        } else {
            ConfigMode::Manual
        }
    }

    fn apply(&mut self, mode: ConfigMode, difficulty: Option<Difficulty>, count: Option<u32>) {
        let language = self.config.language.clone();
        let resolution = resolve(mode, &self.config, self.remembered, difficulty, count, &language);
        self.config = resolution.config;
        self.remembered = resolution.remembered;
    }

    pub fn switch_to_ai(&mut self) -> &QuizConfiguration {
        self.apply(ConfigMode::AiDetermined, None, None);
        &self.config
    }

    pub fn switch_to_manual(&mut self) -> &QuizConfiguration {
        self.apply(ConfigMode::Manual, None, None);
        &self.config
    }

    /// Choosing `AiDetermined` as a difficulty is the same as switching to AI mode.
    pub fn set_difficulty(&mut self, difficulty: Difficulty) -> &QuizConfiguration {
        if difficulty == Difficulty::AiDetermined {
            return self.switch_to_ai();
        }
        self.apply(ConfigMode::Manual, Some(difficulty), None);
        &self.config
    }

    pub fn set_num_questions(&mut self, num_questions: u32) -> &QuizConfiguration {
        self.apply(self.mode(), None, Some(num_questions));
        &self.config
    }

    /// Follows the active UI locale.
    pub fn set_language(&mut self, language: impl Into<String>) -> &QuizConfiguration {
        self.config.language = language.into();
        &self.config
    }

    pub fn set_custom_prompt(&mut self, prompt: Option<String>) -> &QuizConfiguration {
        self.config.custom_prompt = prompt.filter(|p| !p.trim().is_empty());
        &self.config
    }
}
