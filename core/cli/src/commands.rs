use crate::Cli;
use anyhow::{bail, Context, Result};
use fraud_infra::{
    load_sdk_config, load_template, resolve_account, retry_engine_call, stack_parameters,
    CloudFormationEngine, DeployOptions, Deployer, InfraConfig, InfraError, Synthesizer,
    TemplateDiff,
};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub fn load_config(cli: &Cli) -> Result<InfraConfig> {
    let config = InfraConfig::load_from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match &cli.env {
        Some(environment) => config
            .with_environment(environment)
            .with_context(|| format!("Failed to apply environment '{}'", environment)),
        None => Ok(config),
    }
}

pub fn synth(cli: &Cli, config: &InfraConfig) -> Result<()> {
    let output = Synthesizer::new(&cli.out).synthesize(config)?;

    for warning in output.report.warnings() {
        warn!("{}", warning);
    }
    if let Some(summary) = &output.summary {
        println!("{}", summary);
    }
    println!(
        "✅ Synthesized {} resources to {}",
        output.manifest.resource_count,
        output.template_path.display()
    );
    Ok(())
}

pub fn validate(cli: &Cli, config: &InfraConfig, json: bool) -> Result<()> {
    let (template, report) = Synthesizer::new(&cli.out).build(config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for issue in &report.issues {
            println!("{:?}: {}", issue.severity, issue);
        }
        println!(
            "{} resources, {} errors, {} warnings",
            template.resources.len(),
            report.errors().count(),
            report.warnings().count()
        );
    }

    if !report.is_valid() {
        bail!("Template for {} failed validation", config.stack_name);
    }
    Ok(())
}

pub fn diff(cli: &Cli, config: &InfraConfig, against: Option<&Path>) -> Result<()> {
    let synthesizer = Synthesizer::new(&cli.out);
    let (template, _) = synthesizer.build(config)?;

    let previous = match against {
        Some(path) => Some(load_template(path)?),
        None => synthesizer.previous_template(&config.stack_name)?,
    };
    let diff = match &previous {
        Some(previous) => TemplateDiff::between(previous, &template),
        None => {
            info!("No previous template found, comparing against an empty stack");
            TemplateDiff::from_empty(&template)
        }
    };

    println!("Stack {}", config.stack_name);
    if let Some(previous) = synthesizer.previous_config()? {
        let changes = previous.detect_changes(config);
        if changes.has_changes() {
            println!(
                "Configuration sections changed: {}",
                changes.changed_sections().join(", ")
            );
        }
        if changes.requires_replacement() {
            println!("⚠️  Network changes replace the subnets and everything placed in them");
        }
    }
    println!("{}", diff);
    Ok(())
}

pub fn list(cli: &Cli, config: &InfraConfig) -> Result<()> {
    let (template, report) = Synthesizer::new(&cli.out).build(config)?;
    if report.creation_order.is_empty() && !template.resources.is_empty() {
        bail!("Resource graph has a dependency cycle; run 'fraud-infra validate' for details");
    }

    for logical_id in &report.creation_order {
        if let Some(resource) = template.resource(logical_id) {
            println!("{:<70} {}", logical_id, resource.resource_type);
        }
    }
    Ok(())
}

fn deploy_options(poll_seconds: u64) -> DeployOptions {
    DeployOptions {
        poll_interval: Duration::from_secs(poll_seconds.max(1)),
        ..DeployOptions::default()
    }
}

pub async fn deploy(cli: &Cli, mut config: InfraConfig, poll_seconds: u64) -> Result<()> {
    let parameters = stack_parameters(&config)?;

    let sdk_config = load_sdk_config(&config.deployment.region).await;
    let sdk = &sdk_config;
    let configured = config.deployment.account.as_deref();
    let account = retry_engine_call(move || async move {
        resolve_account(sdk, configured)
            .await
            .map_err(InfraError::from)
    })
    .await
    .context("Failed to resolve the target account")?;
    config.deployment.account = Some(account);

    let synthesizer = Synthesizer::new(&cli.out);
    if let Some(previous) = synthesizer.previous_config()? {
        config
            .is_backward_compatible(&previous)
            .context("Configuration cannot update the previously synthesized stack")?;
    }
    let output = synthesizer.synthesize(&config)?;
    if let Some(summary) = &output.summary {
        println!("{}", summary);
    }
    println!(
        "🚀 Deploying {} ({} resources)",
        config.stack_name, output.manifest.resource_count
    );

    let engine = CloudFormationEngine::new(&sdk_config, config.deployment.template_bucket.clone());
    let outcome = Deployer::new(Box::new(engine), deploy_options(poll_seconds))
        .deploy(&config.stack_name, &output.template, parameters)
        .await?;

    if outcome.changed {
        println!("✅ {} is {}", outcome.stack_name, outcome.status);
    } else {
        println!(
            "✅ {} is up to date ({})",
            outcome.stack_name, outcome.status
        );
    }
    print_outputs(&outcome.outputs);
    Ok(())
}

async fn deployer(config: &InfraConfig) -> Deployer {
    let engine = CloudFormationEngine::from_config(&config.deployment).await;
    Deployer::new(Box::new(engine), DeployOptions::default())
}

pub async fn outputs(config: &InfraConfig) -> Result<()> {
    let outputs = deployer(config).await.outputs(&config.stack_name).await?;
    print_outputs(&outputs);
    Ok(())
}

pub async fn destroy(cli: &Cli, config: &InfraConfig, confirmed: bool) -> Result<()> {
    if !confirmed {
        let (template, _) = Synthesizer::new(&cli.out).build(config)?;
        let retained: Vec<&str> = template.retained_resource_types().into_iter().collect();
        bail!(
            "Refusing to delete {} without --yes; these resource types are retained: {}",
            config.stack_name,
            retained.join(", ")
        );
    }

    deployer(config).await.destroy(&config.stack_name).await?;
    println!("🗑️  Deleted {}", config.stack_name);
    Ok(())
}

fn print_outputs(outputs: &std::collections::BTreeMap<String, String>) {
    if outputs.is_empty() {
        return;
    }
    println!("\nOutputs:");
    for (key, value) in outputs {
        println!("  {} = {}", key, value);
    }
}
