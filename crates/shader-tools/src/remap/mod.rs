//! Binding remapper
//!
//! Moves every reflected resource to the coordinates a pipeline layout
//! requires (rewrite mode), or checks that a driver already put it there
//! (verify-only mode).

mod mapping;
mod spirv_patch;
mod wgsl_rewrite;

pub use mapping::{LayoutFlag, LayoutFlags, MappedResource, PipelineLayoutSpec, ResolvedBinding, ResourceLayoutSpec, ResourceMapping};
pub use spirv_patch::{SPV_MAGIC, patch_spirv_bindings, read_spirv_bindings, spirv_debug_name};
pub use wgsl_rewrite::{find_wgsl_bindings, rewrite_wgsl_bindings};

use crate::{
    error::ShaderError,
    reflect::{ResourceAttribs, ResourceList},
    translate::Artifact,
    types::ShaderStage,
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemapMode {
    /// Patch the binding annotations of the artifact
    #[default]
    Rewrite,
    /// Leave the artifact alone and compare the bindings it already has
    VerifyOnly,
}

/// What a verify-only mismatch does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    #[default]
    Error,
    Warn,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapOptions {
    #[serde(default)]
    pub mode: RemapMode,
    #[serde(default)]
    pub verify_severity: VerifySeverity,
    /// Suffix separating an emulated array's base name from the element index
    #[serde(default)]
    pub emulated_array_suffix: Option<String>,
}

/// Binding of one declaration as reported by a driver after linking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedBinding {
    /// Uniform name, with a trailing `[N]` for array elements
    pub name: String,
    pub group: u32,
    pub binding: u32,
}

/// Old and new coordinates of one declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBinding {
    pub name: Arc<str>,
    pub from: (u32, u32),
    pub to: (u32, u32),
}

/// A stage after remapping
#[derive(Debug, Clone)]
pub struct RemappedStage {
    pub artifact: Artifact,
    pub resources: ResourceList,
    pub plan: Vec<PlannedBinding>,
}

/// Remaps resources of one or more stages to a [`ResourceMapping`]
#[derive(Debug, Clone)]
pub struct BindingRemapper {
    mapping: ResourceMapping,
    options: RemapOptions,
}

impl BindingRemapper {
    pub fn new(mapping: ResourceMapping, options: RemapOptions) -> Self {
        Self { mapping, options }
    }

    pub fn mapping(&self) -> &ResourceMapping {
        &self.mapping
    }

    pub fn options(&self) -> &RemapOptions {
        &self.options
    }

    fn array_suffix<'a>(&'a self, list: &'a ResourceList) -> Option<&'a str> {
        self.options.emulated_array_suffix.as_deref().or(list.emulated_array_suffix())
    }

    /// Resolves one resource and computes the new coordinates of each of its declarations
    fn plan_resource(&self, list: &ResourceList, res: &ResourceAttribs) -> Result<(ResourceAttribs, Vec<PlannedBinding>), ShaderError> {
        let shader = list.shader_name();
        let resolved = self.mapping.resolve(shader, &res.name, res.alt_name.as_deref(), self.array_suffix(list))?;
        let (group, base_binding) = resolved.coordinates();
        let first_slot = resolved.element.unwrap_or(0);

        // Both merged and native arrays must fit into the mapped range
        if first_slot.checked_add(res.array_size).is_none_or(|end| end > resolved.entry.array_size) {
            let last = res.elements.last().map_or_else(|| res.name.to_string(), |el| el.name.to_string());
            return Err(ShaderError::ArrayIndexOutOfRange {
                shader: shader.to_string(),
                resource: last,
                array: resolved.key.to_string(),
                index: first_slot.saturating_add(res.array_size - 1),
                array_size: resolved.entry.array_size,
            });
        }

        let mut remapped = res.clone();
        let mut plan = Vec::new();
        if remapped.elements.is_empty() {
            plan.push(PlannedBinding {
                name: res.name.clone(),
                from: (res.bind_group, res.bind_index),
                to: (group, base_binding),
            });
            remapped.bind_group = group;
            remapped.bind_index = base_binding;
        } else {
            for element in &mut remapped.elements {
                let to = (group, base_binding + element.index);
                plan.push(PlannedBinding {
                    name: element.name.clone(),
                    from: (element.bind_group, element.bind_index),
                    to,
                });
                (element.bind_group, element.bind_index) = to;
            }
            remapped.bind_group = remapped.elements[0].bind_group;
            remapped.bind_index = remapped.elements[0].bind_index;
        }

        tracing::debug!(
            "'{}' of shader '{shader}' maps to layout entry '{}' at group {group} binding {base_binding}",
            res.name,
            resolved.key
        );
        Ok((remapped, plan))
    }

    /// Computes the remapped list of one stage without touching its artifact
    pub fn plan(&self, list: &ResourceList) -> Result<(ResourceList, Vec<PlannedBinding>), ShaderError> {
        let mut resources = Vec::with_capacity(list.len());
        let mut plan = Vec::new();
        for res in list {
            let (remapped, mut planned) = self.plan_resource(list, res)?;
            resources.push(remapped);
            plan.append(&mut planned);
        }
        let remapped = ResourceList::new(list.shader_name(), list.stage(), list.source_language(), resources)?
            .with_combined_sampler_suffix(list.combined_sampler_suffix())
            .with_emulated_array_suffix(list.emulated_array_suffix());
        Ok((remapped, plan))
    }

    /// Remaps or verifies one stage
    ///
    /// # Arguments
    /// * `artifact` - Translated shader the list was reflected from
    /// * `list` - Reflected resources, emulated arrays already merged
    pub fn remap_stage(&self, artifact: &Artifact, list: &ResourceList) -> Result<RemappedStage, ShaderError> {
        let shader = list.shader_name();
        let (remapped, plan) = self.plan(list)?;

        if self.options.mode == RemapMode::VerifyOnly {
            for planned in &plan {
                self.check(shader, &planned.name, planned.to, planned.from)?;
            }
            // The artifact keeps its bindings, so does the list
            return Ok(RemappedStage {
                artifact: artifact.clone(),
                resources: list.clone(),
                plan,
            });
        }

        let moves: FxHashMap<(u32, u32), (u32, u32)> = plan.iter().filter(|p| p.from != p.to).map(|p| (p.from, p.to)).collect();
        let (artifact, found) = match artifact {
            Artifact::Wgsl(text) => {
                let (text, found) = rewrite_wgsl_bindings(text, &moves);
                (Artifact::Wgsl(text), found)
            }
            Artifact::Spirv(words) => {
                let mut words = words.clone();
                let found = patch_spirv_bindings(&mut words, &moves).map_err(|message| ShaderError::Rewrite {
                    shader: shader.to_string(),
                    message,
                })?;
                (Artifact::Spirv(words), found)
            }
            Artifact::Glsl(_) => {
                return Err(ShaderError::Unsupported {
                    shader: shader.to_string(),
                    message: "GLSL bindings are assigned by the driver; use verify-only remapping".to_string(),
                });
            }
        };

        if let Some(missing) = plan.iter().find(|p| p.from != p.to && !found.contains(&p.from)) {
            return Err(ShaderError::Rewrite {
                shader: shader.to_string(),
                message: format!(
                    "declaration of '{}' at group {} binding {} not found in the {} artifact",
                    missing.name,
                    missing.from.0,
                    missing.from.1,
                    artifact.kind()
                ),
            });
        }

        Ok(RemappedStage {
            artifact,
            resources: remapped,
            plan,
        })
    }

    /// Compares bindings reported by a driver after linking with the layout
    ///
    /// # Returns
    /// Number of mismatches that were downgraded to warnings
    pub fn verify_reported_bindings(&self, shader: &str, reported: &[ReportedBinding]) -> Result<usize, ShaderError> {
        let mut mismatches = 0;
        for binding in reported {
            let (name, element) = split_array_subscript(&binding.name);
            let resolved = self.mapping.resolve(shader, name, None, self.options.emulated_array_suffix.as_deref())?;
            let (group, base) = resolved.coordinates();
            let slot = element.unwrap_or(0);
            if resolved.element.unwrap_or(0) + slot >= resolved.entry.array_size {
                return Err(ShaderError::ArrayIndexOutOfRange {
                    shader: shader.to_string(),
                    resource: binding.name.clone(),
                    array: resolved.key.to_string(),
                    index: slot,
                    array_size: resolved.entry.array_size,
                });
            }
            if !self.check(shader, &binding.name, (group, base + slot), (binding.group, binding.binding))? {
                mismatches += 1;
            }
        }
        Ok(mismatches)
    }

    /// # Returns
    /// `false` for a mismatch downgraded to a warning
    fn check(&self, shader: &str, resource: &str, expected: (u32, u32), actual: (u32, u32)) -> Result<bool, ShaderError> {
        if expected == actual {
            return Ok(true);
        }
        let error = ShaderError::BindingMismatch {
            shader: shader.to_string(),
            resource: resource.to_string(),
            expected_group: expected.0,
            expected_binding: expected.1,
            actual_group: actual.0,
            actual_binding: actual.1,
        };
        match self.options.verify_severity {
            VerifySeverity::Error => Err(error),
            VerifySeverity::Warn => {
                tracing::warn!("{error}");
                Ok(false)
            }
        }
    }
}

/// `"g_Tex[3]"` -> `("g_Tex", Some(3))`
fn split_array_subscript(name: &str) -> (&str, Option<u32>) {
    if let Some(open) = name.strip_suffix(']').and_then(|rest| rest.rfind('[')) {
        if let Ok(index) = name[open + 1..name.len() - 1].parse() {
            return (&name[..open], Some(index));
        }
    }
    (name, None)
}

/// Checks that resources shared between stages are declared the same way
///
/// Resources are matched by semantic name. Category, dimension, sample type,
/// texel format and array size must all agree.
pub fn check_cross_stage_compatibility(pipeline: &str, stages: &[&ResourceList]) -> Result<(), ShaderError> {
    let mut seen: FxHashMap<&str, (usize, ShaderStage, &ResourceAttribs)> = FxHashMap::default();
    for (stage_index, list) in stages.iter().enumerate() {
        let mut names_in_stage = FxHashSet::default();
        for res in list.iter() {
            let name = res.semantic_name();
            if !names_in_stage.insert(name) {
                continue;
            }
            match seen.get(name) {
                Some(&(first_index, first_stage, first)) if first_index != stage_index => {
                    if let Some((property, value_a, value_b)) = first.first_incompatibility(res, true) {
                        return Err(ShaderError::IncompatibleResource {
                            shader: pipeline.to_string(),
                            resource: name.to_string(),
                            stage_a: first_stage,
                            stage_b: list.stage(),
                            property,
                            value_a,
                            value_b,
                        });
                    }
                }
                Some(_) => {}
                None => {
                    seen.insert(name, (stage_index, list.stage(), res));
                }
            }
        }
    }
    Ok(())
}
