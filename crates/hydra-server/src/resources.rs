//! Shared request parsing for the preset-or-explicit resource selection
//! accepted by `/containers/{username}/init` and `/approvals/{username}`.

use hydra_core::ResourceSelection;

use crate::error::AppError;

/// Build a [`ResourceSelection`] from a request's optional preset tier and
/// optional explicit resource fields. Exactly one of the two shapes must be
/// present.
///
/// # Errors
///
/// Returns [`AppError::BadRequest`] if neither or both shapes are present,
/// or if an explicit request is missing one of its four fields.
pub fn selection_from_request(
    preset_tier: Option<String>,
    memory_gb: Option<f64>,
    cpus: Option<f64>,
    storage_gb: Option<f64>,
    gpu_count: Option<u32>,
) -> Result<ResourceSelection, AppError> {
    let explicit_fields = [memory_gb.is_some(), cpus.is_some(), storage_gb.is_some(), gpu_count.is_some()];

    match (preset_tier, explicit_fields.iter().any(|p| *p)) {
        (Some(tier), false) => Ok(ResourceSelection::Preset { tier }),
        (None, true) => {
            if explicit_fields.iter().all(|p| *p) {
                Ok(ResourceSelection::Explicit {
                    memory_gb: memory_gb.expect("checked above"),
                    cpus: cpus.expect("checked above"),
                    storage_gb: storage_gb.expect("checked above"),
                    gpu_count: gpu_count.expect("checked above"),
                })
            } else {
                Err(AppError::BadRequest(
                    "an explicit resource request needs memory_gb, cpus, storage_gb and gpu_count together".to_owned(),
                ))
            }
        }
        (Some(_), true) => {
            Err(AppError::BadRequest("specify either preset_tier or explicit resources, not both".to_owned()))
        }
        (None, false) => {
            Err(AppError::BadRequest("specify either preset_tier or explicit resources (memory_gb, cpus, storage_gb, gpu_count)".to_owned()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn preset_alone_resolves() {
        let selection = selection_from_request(Some("conservative".to_owned()), None, None, None, None).expect("ok");
        assert_eq!(selection, ResourceSelection::Preset { tier: "conservative".to_owned() });
    }

    #[test]
    fn full_explicit_bundle_resolves() {
        let selection = selection_from_request(None, Some(1.0), Some(1.0), Some(10.0), Some(0)).expect("ok");
        assert_eq!(selection, ResourceSelection::Explicit { memory_gb: 1.0, cpus: 1.0, storage_gb: 10.0, gpu_count: 0 });
    }

    #[test]
    fn neither_shape_is_rejected() {
        assert!(selection_from_request(None, None, None, None, None).is_err());
    }

    #[test]
    fn both_shapes_is_rejected() {
        assert!(selection_from_request(Some("conservative".to_owned()), Some(1.0), None, None, None).is_err());
    }

    #[test]
    fn partial_explicit_bundle_is_rejected() {
        assert!(selection_from_request(None, Some(1.0), Some(1.0), None, None).is_err());
    }
}
