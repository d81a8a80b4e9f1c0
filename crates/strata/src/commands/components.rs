//! Component closure command

use anyhow::{Context, Result};
use strata_components::{transitive_component_references, Overwriter, Substitutions};
use strata_core::types::ComponentVersionList;
use strata_core::StrataConfig;
use tabled::{settings::Style, Table, Tabled};

use super::RootComponent;
use crate::cli::{ComponentsCommands, ComponentsResolveArgs};
use crate::output;

#[derive(Tabled)]
struct ComponentRow {
    name: String,
    version: String,
    references: usize,
    resources: String,
}

fn rows(list: &ComponentVersionList) -> Vec<ComponentRow> {
    list.components
        .iter()
        .map(|cv| ComponentRow {
            name: cv.name().to_string(),
            version: cv.version().to_string(),
            references: cv.component_references().len(),
            resources: cv
                .resources()
                .iter()
                .map(|r| r.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect()
}

pub async fn run(cmd: ComponentsCommands, config: &StrataConfig) -> Result<()> {
    match cmd {
        ComponentsCommands::Resolve(args) => resolve(args, config).await,
    }
}

async fn resolve(args: ComponentsResolveArgs, config: &StrataConfig) -> Result<()> {
    let root = RootComponent::load(&args.root).await?;
    let substitutions = Substitutions::new(config.substitutions().to_vec());
    let overwriter = (!substitutions.is_empty()).then_some(&substitutions as &dyn Overwriter);

    let list = transitive_component_references(
        root.registry.as_ref(),
        root.cd.clone(),
        &root.repository_context,
        overwriter,
    )
    .await
    .context("Failed to resolve component references")?;

    if args.json {
        return output::json(&list.to_value());
    }

    output::header(&format!("Components of {}", root.cd.identity()));
    let mut table = Table::new(rows(&list));
    table.with(Style::sharp());
    println!("{}", table);
    output::kv("registry calls", &root.registry.resolve_count().to_string());
    Ok(())
}
