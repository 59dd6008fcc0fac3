// Language runtime registry: language -> image, source file, compile/run commands
use crate::error::{EngineError, EngineResult};
use crate::sandbox::{BUILD_MOUNT, SRC_MOUNT};
use arbiter_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Everything needed to compile and run one language inside a sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeProfile {
    #[serde(rename = "name")]
    pub language: Language,
    pub image: String,
    /// File the prepared source is written to, e.g. `Main.java`
    pub source_file: String,
    #[serde(default)]
    pub compile_command: Option<Vec<String>>,
    pub run_command: Vec<String>,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f32,
}

fn default_memory_limit_mb() -> u64 {
    256
}

fn default_cpu_limit() -> f32 {
    1.0
}

impl RuntimeProfile {
    pub fn file_extension(&self) -> &str {
        self.source_file
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or("")
    }

    pub fn needs_compile(&self) -> bool {
        self.compile_command.is_some()
    }

    /// CPU share in the units Docker expects (1e9 = one full CPU)
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit as f64 * 1_000_000_000.0) as i64
    }
}

fn cmd(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn builtin_profile(language: Language) -> RuntimeProfile {
    let src = |file: &str| format!("{}/{}", SRC_MOUNT, file);
    let build = |file: &str| format!("{}/{}", BUILD_MOUNT, file);

    match language {
        Language::Python => RuntimeProfile {
            language,
            image: "python:3.12-slim".to_string(),
            source_file: "main.py".to_string(),
            compile_command: None,
            run_command: cmd(&["python3", "-u", &src("main.py")]),
            memory_limit_mb: 256,
            cpu_limit: 1.0,
        },
        Language::JavaScript => RuntimeProfile {
            language,
            image: "node:20-slim".to_string(),
            source_file: "main.js".to_string(),
            compile_command: None,
            run_command: cmd(&["node", &src("main.js")]),
            memory_limit_mb: 256,
            cpu_limit: 1.0,
        },
        Language::Java => RuntimeProfile {
            language,
            image: "eclipse-temurin:21-jdk".to_string(),
            source_file: "Main.java".to_string(),
            compile_command: Some(cmd(&["javac", "-d", BUILD_MOUNT, &src("Main.java")])),
            run_command: cmd(&["java", "-Xss64m", "-cp", BUILD_MOUNT, "Main"]),
            memory_limit_mb: 512,
            cpu_limit: 1.0,
        },
        Language::Cpp => RuntimeProfile {
            language,
            image: "gcc:13".to_string(),
            source_file: "main.cpp".to_string(),
            compile_command: Some(cmd(&[
                "g++",
                "-O2",
                "-std=c++17",
                "-o",
                &build("main"),
                &src("main.cpp"),
            ])),
            run_command: vec![build("main")],
            memory_limit_mb: 256,
            cpu_limit: 1.0,
        },
    }
}

#[derive(Debug, Deserialize)]
struct LanguagesJson {
    languages: Vec<RuntimeProfile>,
}

/// Immutable language table. Build once at startup and share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: HashMap<Language, RuntimeProfile>,
}

impl LanguageRegistry {
    /// Registry with every language the engine ships defaults for
    pub fn builtin() -> Self {
        Self::from_profiles(Language::ALL.iter().copied().map(builtin_profile))
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = RuntimeProfile>) -> Self {
        let profiles = profiles
            .into_iter()
            .map(|profile| (profile.language, profile))
            .collect();
        Self { profiles }
    }

    /// Load profiles from a `languages.json` file. Only the listed languages are enabled.
    pub fn load(config_path: &Path) -> EngineResult<Self> {
        if !config_path.exists() {
            return Err(EngineError::Registry(format!(
                "language config file not found: {}",
                config_path.display()
            )));
        }

        let content = fs::read_to_string(config_path)
            .map_err(|e| EngineError::Registry(format!("failed to read {}: {}", config_path.display(), e)))?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> EngineResult<Self> {
        let parsed: LanguagesJson = serde_json::from_str(content)
            .map_err(|e| EngineError::Registry(format!("failed to parse languages.json: {}", e)))?;

        if parsed.languages.is_empty() {
            return Err(EngineError::Registry("no languages configured".to_string()));
        }

        for profile in &parsed.languages {
            if profile.run_command.is_empty() {
                return Err(EngineError::Registry(format!(
                    "language '{}' has an empty run command",
                    profile.language
                )));
            }
        }

        Ok(Self::from_profiles(parsed.languages))
    }

    pub fn profile_for(&self, language: Language) -> EngineResult<&RuntimeProfile> {
        self.profiles
            .get(&language)
            .ok_or_else(|| EngineError::UnsupportedLanguage(language.to_string()))
    }

    /// Look up a raw language identifier as received from a caller
    pub fn resolve(&self, name: &str) -> EngineResult<&RuntimeProfile> {
        let language = Language::from_str(name)
            .ok_or_else(|| EngineError::UnsupportedLanguage(name.to_string()))?;
        self.profile_for(language)
    }

    /// Enabled languages in a stable order
    pub fn list_languages(&self) -> Vec<Language> {
        Language::ALL
            .iter()
            .copied()
            .filter(|lang| self.profiles.contains_key(lang))
            .collect()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &RuntimeProfile> {
        self.list_languages()
            .into_iter()
            .filter_map(move |lang| self.profiles.get(&lang))
    }
}
