//! Template resolution and requirement checks.

use reel_models::{Coordinates, Job, JobMetadata, TemplateDefinition, TemplateRegistry, TemplateResult};
use tracing::warn;

use super::Orchestrator;
use crate::error::{PipelineError, PipelineResult};

/// Templates a run will attempt.
#[derive(Debug, Clone)]
pub(crate) struct TemplatePlan {
    /// Ordered, primary first when present
    pub runnable: Vec<TemplateDefinition>,
    /// Fan-out templates that cannot run for this job, already failed
    pub rejected: Vec<TemplateResult>,
    pub coordinates: Option<Coordinates>,
    /// Some template has a flyover slot
    pub wants_flyover: bool,
}

/// Resolve the fan-out list for `job`.
///
/// Order of precedence: `requested`, then `job.metadata.templates`, then the
/// registry default set. The job's own template always comes first and names
/// are deduplicated. Unknown names are a validation error.
pub fn resolve_template_names(
    registry: &TemplateRegistry,
    job: &Job,
    requested: &[String],
) -> PipelineResult<Vec<String>> {
    let source: &[String] = if !requested.is_empty() {
        requested
    } else if !job.metadata.templates.is_empty() {
        &job.metadata.templates
    } else {
        registry.default_set()
    };

    let mut names: Vec<String> = Vec::with_capacity(source.len() + 1);
    for name in std::iter::once(&job.template).chain(source.iter()) {
        let name = name.trim();
        if name.is_empty() || names.iter().any(|n| n == name) {
            continue;
        }
        if registry.get(name).is_none() {
            return Err(PipelineError::validation(format!("unknown template '{}'", name)));
        }
        names.push(name.to_string());
    }

    if names.is_empty() {
        return Err(PipelineError::validation("no templates requested"));
    }
    Ok(names)
}

/// Look up definitions, find coordinates if needed and split off templates
/// this job cannot satisfy.
pub(crate) async fn plan(
    ctx: &Orchestrator,
    job: &Job,
    names: &[String],
    metadata: &mut JobMetadata,
) -> PipelineResult<TemplatePlan> {
    let definitions = names
        .iter()
        .map(|name| ctx.deps.registry.require(name).cloned())
        .collect::<Result<Vec<_>, _>>()?;

    let wants_flyover = definitions.iter().any(|d| d.uses_flyover());
    let coordinates = if wants_flyover {
        find_coordinates(ctx, job, metadata).await?
    } else {
        metadata.coordinates
    };

    if coordinates.is_none() {
        if let Some(t) = definitions.iter().find(|d| d.requires_flyover) {
            return Err(PipelineError::validation(format!(
                "template '{}' requires a flyover but listing {} has no coordinates",
                t.name, job.listing_id
            )));
        }
    }

    let photo_count = job.input_files.len();
    let mut runnable = Vec::with_capacity(definitions.len());
    let mut rejected = Vec::new();

    for definition in definitions {
        match definition.check_requirements(photo_count, coordinates.is_some()) {
            Ok(()) => runnable.push(definition),
            Err(violation) if definition.name == job.template => {
                return Err(PipelineError::validation(format!(
                    "template '{}' {}",
                    definition.name, violation
                )));
            }
            Err(violation) => {
                warn!(
                    job_id = %job.id,
                    template = %definition.name,
                    "Skipping template: {}",
                    violation
                );
                rejected.push(TemplateResult::failed(&definition.name, violation.to_string(), 0));
            }
        }
    }

    Ok(TemplatePlan {
        runnable,
        rejected,
        coordinates,
        wants_flyover,
    })
}

/// Coordinates from the job, falling back to the listing record.
async fn find_coordinates(
    ctx: &Orchestrator,
    job: &Job,
    metadata: &mut JobMetadata,
) -> PipelineResult<Option<Coordinates>> {
    if let Some(c) = metadata.coordinates {
        return Ok(Some(c));
    }

    let found = ctx
        .retry
        .named("listing_lookup")
        .run_if(|e: &reel_firestore::FirestoreError| e.is_retryable(), || {
            ctx.deps.listings.coordinates(&job.listing_id)
        })
        .await?;

    if found.is_some() {
        metadata.coordinates = found;
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::NewJob;

    fn job(template: &str, templates: &[&str]) -> Job {
        let mut job = Job::from_new(NewJob::new(
            "listing-1",
            "user-1",
            template,
            vec!["photos/0.jpg".to_string()],
        ));
        job.metadata.templates = templates.iter().map(|s| s.to_string()).collect();
        job
    }

    #[test]
    fn test_primary_first_then_defaults() {
        let registry = TemplateRegistry::builtin();
        let names = resolve_template_names(&registry, &job("wave", &[]), &[]).unwrap();
        assert_eq!(names, vec!["wave", "crescendo", "storyteller"]);
    }

    #[test]
    fn test_requested_overrides_metadata() {
        let registry = TemplateRegistry::builtin();
        let job = job("crescendo", &["wave"]);

        let names = resolve_template_names(&registry, &job, &[]).unwrap();
        assert_eq!(names, vec!["crescendo", "wave"]);

        let requested = vec!["hyperpop".to_string(), "crescendo".to_string()];
        let names = resolve_template_names(&registry, &job, &requested).unwrap();
        assert_eq!(names, vec!["crescendo", "hyperpop"]);
    }

    #[test]
    fn test_unknown_template_is_validation_error() {
        let registry = TemplateRegistry::builtin();
        let err = resolve_template_names(&registry, &job("vaporwave", &[]), &[]).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("vaporwave"));
    }
}
