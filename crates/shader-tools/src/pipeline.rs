//! Pipeline-level remapping of several compiled stages against one layout

use crate::{
    binding_table::{BindingTableEntry, build_binding_table},
    error::ShaderError,
    reflect::ResourceList,
    remap::{BindingRemapper, PlannedBinding, RemapMode, check_cross_stage_compatibility},
    shader::{CompiledShader, Shader, TaskQueue},
    translate::Artifact,
    types::{DeviceType, ShaderStage},
};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// One stage of a remapped pipeline
#[derive(Debug, Clone)]
pub struct RemappedShader {
    pub name: String,
    pub stage: ShaderStage,
    pub entry_point: String,
    pub artifact: Artifact,
    /// `None` for GL stages, whose bindings the driver reports after linking
    pub resources: Option<ResourceList>,
    pub plan: Vec<PlannedBinding>,
}

#[derive(Debug, Clone)]
pub struct RemappedPipeline {
    pub name: String,
    pub stages: Vec<RemappedShader>,
    pub binding_table: Vec<BindingTableEntry>,
}

/// Remaps every stage of a pipeline and builds its binding table
///
/// Any failure aborts the whole pipeline: resources shared between stages
/// must agree, and every resource must resolve in the layout.
pub fn remap_pipeline(name: &str, shaders: &[&CompiledShader], remapper: &BindingRemapper, device: DeviceType) -> Result<RemappedPipeline, ShaderError> {
    let reflected: Vec<&ResourceList> = shaders.iter().filter_map(|shader| shader.resources.as_ref()).collect();
    check_cross_stage_compatibility(name, &reflected)?;

    let mut stages = Vec::with_capacity(shaders.len());
    for shader in shaders {
        let Some(list) = &shader.resources else {
            let message = match (&shader.artifact, remapper.options().mode) {
                (Artifact::Glsl(_), RemapMode::VerifyOnly) => None,
                (Artifact::Glsl(_), RemapMode::Rewrite) => Some("GLSL bindings are assigned by the driver; use verify-only remapping".to_string()),
                _ => Some("the shader was compiled without reflection and cannot be remapped".to_string()),
            };
            if let Some(message) = message {
                return Err(ShaderError::Unsupported {
                    shader: shader.name.clone(),
                    message,
                });
            }
            stages.push(RemappedShader {
                name: shader.name.clone(),
                stage: shader.stage,
                entry_point: shader.entry_point.clone(),
                artifact: shader.artifact.clone(),
                resources: None,
                plan: Vec::new(),
            });
            continue;
        };

        let remapped = remapper.remap_stage(&shader.artifact, list)?;
        tracing::debug!("Pipeline '{name}': {} bindings of shader '{}' planned", remapped.plan.len(), shader.name);
        stages.push(RemappedShader {
            name: shader.name.clone(),
            stage: shader.stage,
            entry_point: shader.entry_point.clone(),
            artifact: remapped.artifact,
            resources: Some(remapped.resources),
            plan: remapped.plan,
        });
    }

    let lists: Vec<&ResourceList> = stages.iter().filter_map(|stage| stage.resources.as_ref()).collect();
    let binding_table = build_binding_table(&lists, remapper.mapping(), device)?;

    Ok(RemappedPipeline {
        name: name.to_string(),
        stages,
        binding_table,
    })
}

type PipelineOutcome = Result<Arc<RemappedPipeline>, ShaderError>;

#[derive(Default)]
struct PipelineSlot {
    outcome: Mutex<Option<PipelineOutcome>>,
    done: Condvar,
}

/// A pipeline assembled on a worker once all of its shaders are final
///
/// The queued task owns the shader list and the remapper and drops them
/// right after the completion callback returns.
pub struct AsyncPipeline {
    name: String,
    slot: Arc<PipelineSlot>,
}

impl AsyncPipeline {
    pub fn submit<F>(name: &str, shaders: Vec<Arc<Shader>>, remapper: Arc<BindingRemapper>, device: DeviceType, queue: &dyn TaskQueue, on_complete: F) -> AsyncPipeline
    where
        F: FnOnce(&PipelineOutcome) + Send + 'static,
    {
        let slot = Arc::new(PipelineSlot::default());
        let task_slot = Arc::clone(&slot);
        let task_name = name.to_string();

        queue.submit(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| Self::assemble(&task_name, &shaders, &remapper, device)))
                .unwrap_or_else(|payload| Err(ShaderError::from_panic(&task_name, "pipeline assembly", payload)));
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| on_complete(&outcome))) {
                tracing::warn!("{}", ShaderError::from_panic(&task_name, "completion callback", payload));
            }

            *task_slot.outcome.lock() = Some(outcome);
            task_slot.done.notify_all();
        }));

        AsyncPipeline { name: name.to_string(), slot }
    }

    fn assemble(name: &str, shaders: &[Arc<Shader>], remapper: &BindingRemapper, device: DeviceType) -> PipelineOutcome {
        let compiled = shaders.iter().map(|shader| shader.wait()).collect::<Result<Vec<_>, _>>()?;
        let stages: Vec<&CompiledShader> = compiled.iter().map(Arc::as_ref).collect();
        remap_pipeline(name, &stages, remapper, device).map(Arc::new)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_complete(&self) -> bool {
        self.slot.outcome.lock().is_some()
    }

    pub fn wait(&self) -> PipelineOutcome {
        let mut outcome = self.slot.outcome.lock();
        loop {
            if let Some(outcome) = outcome.as_ref() {
                return outcome.clone();
            }
            self.slot.done.wait(&mut outcome);
        }
    }
}
