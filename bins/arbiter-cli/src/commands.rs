use anyhow::{bail, Context, Result};
use arbiter_common::types::{ExecutionRequest, Language, TestCase};
use arbiter_engine::{DockerRuntime, EngineConfig, Executor, LanguageRegistry};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct RunOptions {
    pub language: String,
    pub source: PathBuf,
    pub tests: PathBuf,
    pub time_limit_ms: Option<u64>,
    pub memory_limit_mb: Option<u64>,
    pub parallel: Option<usize>,
    pub languages_file: Option<PathBuf>,
}

/// Either a bare list of cases or `{ "testCases": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum TestsFile {
    List(Vec<TestCase>),
    #[serde(rename_all = "camelCase")]
    Wrapped { test_cases: Vec<TestCase> },
}

pub fn parse_tests(content: &str) -> Result<Vec<TestCase>> {
    let parsed: TestsFile = serde_json::from_str(content)
        .context("Tests file must be a JSON list of {\"input\", \"expectedOutput\"} objects")?;
    Ok(match parsed {
        TestsFile::List(cases) => cases,
        TestsFile::Wrapped { test_cases } => test_cases,
    })
}

fn load_registry(languages_file: Option<&Path>) -> Result<LanguageRegistry> {
    match languages_file {
        Some(path) => LanguageRegistry::load(path)
            .with_context(|| format!("Failed to load language profiles from {}", path.display())),
        None => Ok(LanguageRegistry::builtin()),
    }
}

/// Judge a local submission and print the summary as JSON.
/// Returns whether every case passed.
pub async fn run(options: RunOptions) -> Result<bool> {
    let Some(language) = Language::from_str(&options.language) else {
        bail!(
            "Unsupported language '{}'. Valid options: python, javascript, java, cpp",
            options.language
        );
    };

    let code = fs::read_to_string(&options.source)
        .with_context(|| format!("Failed to read {}", options.source.display()))?;
    let tests = fs::read_to_string(&options.tests)
        .with_context(|| format!("Failed to read {}", options.tests.display()))?;

    let request = ExecutionRequest {
        language,
        code,
        test_cases: parse_tests(&tests)?,
        time_limit_ms: options.time_limit_ms,
        memory_limit_mb: options.memory_limit_mb,
    };

    let registry = load_registry(options.languages_file.as_deref())?;
    let mut config = EngineConfig::from_env();
    if let Some(parallel) = options.parallel {
        config.max_parallel_cases = parallel;
    }

    let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;
    let executor = Executor::new(Arc::new(registry), Arc::new(runtime), config);

    let summary = executor.execute(&request).await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    eprintln!(
        "\n{} {}/{} passed in {} ms (time {}, space {}, approximate)",
        if summary.all_passed { "✅" } else { "❌" },
        summary.passed_count(),
        summary.results.len(),
        summary.total_time_ms,
        summary.time_complexity,
        summary.space_complexity
    );

    Ok(summary.all_passed)
}

/// List all enabled languages
pub fn list_languages(languages_file: Option<&Path>) -> Result<()> {
    let registry = load_registry(languages_file)?;

    println!("📋 Enabled Languages:\n");
    println!(
        "{:<12} {:<28} {:<12} {:<10} {:<10}",
        "Name", "Image", "Source", "Compiled", "CPU/Mem"
    );
    println!("{}", "─".repeat(80));

    let mut count = 0;
    for profile in registry.profiles() {
        println!(
            "{:<12} {:<28} {:<12} {:<10} {:.1}/{} MB",
            profile.language.to_string(),
            profile.image,
            profile.source_file,
            if profile.needs_compile() { "yes" } else { "no" },
            profile.cpu_limit,
            profile.memory_limit_mb
        );
        count += 1;
    }

    println!("\n✅ Total: {} language(s)", count);
    Ok(())
}

/// Pull sandbox images so the first job does not pay for it
pub async fn pull_images(language: Option<&str>, languages_file: Option<&Path>) -> Result<()> {
    let registry = load_registry(languages_file)?;

    let images: Vec<String> = match language {
        Some(name) => vec![registry
            .resolve(name)
            .with_context(|| format!("Cannot pull images for '{}'", name))?
            .image
            .clone()],
        None => registry.profiles().map(|p| p.image.clone()).collect(),
    };

    let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;

    for image in &images {
        println!("🐳 Ensuring {}...", image);
        runtime
            .ensure_image(image)
            .await
            .with_context(|| format!("Failed to pull {}", image))?;
    }

    println!("\n✅ {} image(s) ready", images.len());
    Ok(())
}
