use crate::config::SlicerConfig;
use crate::core::definitions::DefinitionStack;
use crate::core::settings::{apply_defaults, DefaultRule, DEFAULT_RULES};
use crate::core::{Invocation, SettingsMap};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Renders one setting value the way the engine's `-s key=value` expects it.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.replace('\n', "\\n"),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct InvocationBuilder {
    binary: String,
    verbose: bool,
    search_path_env: String,
    resources_root: PathBuf,
    apply_policy: bool,
    rules: &'static [DefaultRule],
}

impl InvocationBuilder {
    pub fn new(config: &SlicerConfig) -> Self {
        Self {
            binary: config.engine.binary.clone(),
            verbose: config.engine.verbose,
            search_path_env: config.engine.search_path_env.clone(),
            resources_root: config.paths.resources_root.clone(),
            apply_policy: config.defaults.apply_policy,
            rules: DEFAULT_RULES,
        }
    }

    /// Fills in the engine defaults that are still missing. Keys already in
    /// `settings` are left untouched.
    pub fn with_defaults(&self, settings: &SettingsMap) -> SettingsMap {
        let mut settings = settings.clone();
        let applied = apply_defaults(&mut settings, self.rules, self.apply_policy);
        if !applied.is_empty() {
            tracing::debug!("Applied engine defaults: {}", applied.join(", "));
        }
        settings
    }

    /// `settings` are emitted exactly as given, in iteration order.
    pub fn build(
        &self,
        stack: &DefinitionStack,
        settings: &SettingsMap,
        input: &Path,
        output: &Path,
    ) -> Invocation {
        let mut argv = vec![self.binary.clone(), "slice".to_string()];
        if self.verbose {
            argv.push("-v".to_string());
        }

        for definition in stack.paths() {
            argv.push("-j".to_string());
            argv.push(definition.display().to_string());
        }

        argv.push("-o".to_string());
        argv.push(output.display().to_string());
        argv.push("-l".to_string());
        argv.push(input.display().to_string());

        for (key, value) in settings {
            argv.push("-s".to_string());
            argv.push(format!("{}={}", key, format_value(value)));
        }

        let mut env_overlay = BTreeMap::new();
        env_overlay.insert(
            self.search_path_env.clone(),
            self.resources_root.display().to_string(),
        );

        Invocation {
            argv,
            env_overlay,
            output_path: output.to_path_buf(),
        }
    }
}
