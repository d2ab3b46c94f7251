use anyhow::{anyhow, Context, Result};
use namesmith_core::analysis::ContextProfile;
use namesmith_core::db::{save_project_config, ProjectConfig, ProjectLayout};

use crate::canonicalize_or_current;
use crate::commands::load_project_config;

fn update_config<F>(root: &str, apply: F) -> Result<ProjectConfig>
where
    F: FnOnce(&mut ProjectConfig) -> Result<()>,
{
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);
    let mut config = load_project_config(&layout)?;
    apply(&mut config)?;
    save_project_config(&layout, &config)?;
    Ok(config)
}

/// Print the project's model and analysis settings.
pub fn config_show_command(root: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);
    let config = load_project_config(&layout)?;

    if json {
        let serialized =
            serde_json::to_string_pretty(&config).context("Failed to serialize config to JSON")?;
        println!("{}", serialized);
        return Ok(());
    }

    let model = &config.model;
    println!("Model:");
    println!("  model: {}", model.model);
    println!("  base_url: {}", model.base_url);
    println!("  api_key_env: {}", model.api_key_env);
    println!("  temperature: {}", model.temperature);
    println!("  max_tokens: {}", model.max_tokens);
    println!("  min_completion_tokens: {}", model.min_completion_tokens);
    println!("  timeout_secs: {}", model.timeout_secs);
    println!("  json_response_format: {}", model.json_response_format);
    println!("  reformat_retry: {}", model.reformat_retry);
    println!("Context:");
    println!("  profile: {}", config.context.profile);
    println!("  max_callers: {}", config.context.max_callers);
    println!("  max_callees: {}", config.context.max_callees);
    println!("  important_files: {}", config.context.important_files.join(", "));
    println!("  search_string_callers: {}", config.context.search_string_callers);
    println!("  include_assembly: {}", config.context.include_assembly);
    println!("Chain:");
    println!("  max_depth: {}", config.chain.max_depth);
    println!("  include_callees: {}", config.chain.include_callees);
    println!("  keep_special_leaves: {}", config.chain.keep_special_leaves);
    Ok(())
}

pub fn config_set_model_command(root: &str, model: &str) -> Result<()> {
    let model = model.trim();
    if model.is_empty() {
        return Err(anyhow!("Model name must not be empty"));
    }
    update_config(root, |config| {
        config.model.model = model.to_string();
        Ok(())
    })?;
    println!("Model set to {model}");
    Ok(())
}

pub fn config_set_base_url_command(root: &str, base_url: &str) -> Result<()> {
    let base_url = base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(anyhow!("Base URL must start with http:// or https://: {base_url}"));
    }
    update_config(root, |config| {
        config.model.base_url = base_url.to_string();
        Ok(())
    })?;
    println!("Base URL set to {base_url}");
    Ok(())
}

pub fn config_set_profile_command(root: &str, profile: ContextProfile) -> Result<()> {
    update_config(root, |config| {
        config.context.profile = profile;
        Ok(())
    })?;
    println!("Default context profile set to {profile}");
    Ok(())
}

/// Turn the assembly section of full-profile digests on or off.
pub fn config_set_assembly_command(root: &str, value: &str) -> Result<()> {
    let enabled = match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" => true,
        "off" | "false" | "no" => false,
        other => return Err(anyhow!("Expected on or off, got '{other}'")),
    };
    update_config(root, |config| {
        config.context.include_assembly = enabled;
        Ok(())
    })?;
    println!("Assembly listings {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}
