use crate::{
    config::EngineConfig,
    engine::LanguageEvaluator,
    errors::{GraderError, Result},
    scilab::ScilabEvaluator,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Languages the engine can grade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Scilab,
}

impl Language {
    pub const ALL: &'static [Language] = &[Language::Scilab];

    pub fn name(&self) -> &'static str {
        match self {
            Language::Scilab => "scilab",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = GraderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scilab" | "sci" | "sce" => Ok(Language::Scilab),
            _ => Err(GraderError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Evaluator for `language`, configured from the engine config.
pub fn evaluator_for(language: Language, config: &EngineConfig) -> Box<dyn LanguageEvaluator> {
    match language {
        Language::Scilab => Box::new(ScilabEvaluator::from_config(config)),
    }
}
