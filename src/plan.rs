// src/plan.rs

//! Build plan resolution
//!
//! Decides, once per build, whether a formula is poured from a bottle or
//! built from source, and which patches a source build applies. The plan
//! is never modified after it is computed.

use crate::bottle;
use crate::config::BuildConfig;
use crate::error::Result;
use crate::formula::{BottleArtifact, FormulaDescriptor, PatchRule, SourceArtifact};
use crate::patch;
use serde::Serialize;
use tracing::{info, warn};

/// How one build will produce its keg
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ResolvedBuildPlan {
    Bottle {
        bottle: BottleArtifact,
    },
    Source {
        source: SourceArtifact,
        patches: Vec<PatchRule>,
    },
}

impl ResolvedBuildPlan {
    pub fn is_bottle(&self) -> bool {
        matches!(self, ResolvedBuildPlan::Bottle { .. })
    }
}

/// Resolve the plan for `formula` under `config`
///
/// A bottle is used when one matches the platform, its cellar policy fits
/// the configured cellar and the caller did not ask for a source build.
/// Otherwise the source is built with the patches selected for the platform.
pub fn resolve(formula: &FormulaDescriptor, config: &BuildConfig) -> Result<ResolvedBuildPlan> {
    if config.build_from_source {
        info!("{}: building from source as requested", formula.name);
    } else if let Some(bottle) = bottle::resolve(&formula.bottles, &config.platform)? {
        if bottle::is_compatible(&bottle.cellar, &config.cellar) {
            info!("{}: pouring bottle for {}", formula.name, bottle.tag);
            return Ok(ResolvedBuildPlan::Bottle {
                bottle: bottle.clone(),
            });
        }
        warn!(
            "{}: bottle for {} requires cellar {}, not {}; building from source",
            formula.name,
            bottle.tag,
            bottle.cellar.as_str(),
            config.cellar.display()
        );
    } else {
        info!(
            "{}: no bottle available for {}; building from source",
            formula.name, config.platform
        );
    }

    Ok(ResolvedBuildPlan::Source {
        source: formula.source.clone(),
        patches: patch::select(&formula.patches, &config.platform),
    })
}
