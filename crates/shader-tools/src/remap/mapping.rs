//! Target resource layout: the `name -> (group, binding, array size)` table
//! a pipeline's shaders must be remapped to.

use crate::{arrays::parse_emulated_array_element, error::ShaderError, types::ShaderStage, types::ShaderStages};
use bitflags::bitflags;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Layout flags that refine the WebGPU binding type
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct LayoutFlags: u32 {
        const NON_FILTERING_SAMPLER = 1 << 0;
        const UNFILTERABLE_FLOAT_TEXTURE = 1 << 1;
    }
}

/// One flag as written in a layout file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutFlag {
    NonFilteringSampler,
    UnfilterableFloatTexture,
}

impl From<LayoutFlag> for LayoutFlags {
    fn from(flag: LayoutFlag) -> Self {
        match flag {
            LayoutFlag::NonFilteringSampler => LayoutFlags::NON_FILTERING_SAMPLER,
            LayoutFlag::UnfilterableFloatTexture => LayoutFlags::UNFILTERABLE_FLOAT_TEXTURE,
        }
    }
}

fn default_array_size() -> u32 {
    1
}

/// Resource entry of a layout file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLayoutSpec {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    #[serde(default = "default_array_size")]
    pub array_size: u32,
    /// Stages the resource is visible to, every stage when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<ShaderStage>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<LayoutFlag>,
}

/// A complete pipeline resource layout file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineLayoutSpec {
    pub resources: Vec<ResourceLayoutSpec>,
}

impl PipelineLayoutSpec {
    pub fn from_yaml(yaml_content: &str) -> Result<Self, serde_norway::Error> {
        serde_norway::from_str(yaml_content)
    }
}

/// Required coordinates of one named resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedResource {
    pub group: u32,
    pub binding: u32,
    pub array_size: u32,
    pub stages: ShaderStages,
    pub flags: LayoutFlags,
}

/// Successful lookup of a resource in a [`ResourceMapping`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBinding<'a> {
    /// Mapping key that matched
    pub key: &'a str,
    pub entry: &'a MappedResource,
    /// Element index when the resource matched as an element of a mapped array
    pub element: Option<u32>,
}

impl ResolvedBinding<'_> {
    /// Coordinates of the matched declaration
    pub fn coordinates(&self) -> (u32, u32) {
        (self.entry.group, self.entry.binding + self.element.unwrap_or(0))
    }
}

/// `name -> {group, binding, array size}` lookup built from a target layout
#[derive(Debug, Clone, Default)]
pub struct ResourceMapping {
    entries: FxHashMap<String, MappedResource>,
    /// Insertion order, for deterministic iteration
    order: Vec<String>,
}

impl ResourceMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, resource: MappedResource) -> Result<(), ShaderError> {
        if resource.array_size == 0 {
            return Err(ShaderError::Layout(format!("resource '{name}' has an array size of 0")));
        }
        if resource.binding.checked_add(resource.array_size - 1).is_none() {
            return Err(ShaderError::Layout(format!(
                "resource '{name}' at binding {} with {} elements runs past the last binding index",
                resource.binding, resource.array_size
            )));
        }
        if self.entries.insert(name.to_string(), resource).is_some() {
            return Err(ShaderError::Layout(format!("resource '{name}' is declared more than once")));
        }
        self.order.push(name.to_string());
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert) for a resource visible to every stage
    pub fn with(mut self, name: &str, group: u32, binding: u32, array_size: u32) -> Result<Self, ShaderError> {
        self.insert(
            name,
            MappedResource {
                group,
                binding,
                array_size,
                stages: ShaderStages::all(),
                flags: LayoutFlags::empty(),
            },
        )?;
        Ok(self)
    }

    pub fn from_spec(spec: &PipelineLayoutSpec) -> Result<Self, ShaderError> {
        let mut mapping = Self::new();
        for res in &spec.resources {
            let stages = match &res.stages {
                Some(stages) => stages.iter().fold(ShaderStages::empty(), |mask, stage| mask | stage.mask()),
                None => ShaderStages::all(),
            };
            let flags = res.flags.iter().fold(LayoutFlags::empty(), |flags, flag| flags | LayoutFlags::from(*flag));
            mapping.insert(
                &res.name,
                MappedResource {
                    group: res.group,
                    binding: res.binding,
                    array_size: res.array_size,
                    stages,
                    flags,
                },
            )?;
        }
        Ok(mapping)
    }

    pub fn from_yaml(yaml_content: &str) -> Result<Self, ShaderError> {
        let spec = PipelineLayoutSpec::from_yaml(yaml_content).map_err(|e| ShaderError::Layout(e.to_string()))?;
        Self::from_spec(&spec)
    }

    pub fn get(&self, name: &str) -> Option<&MappedResource> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MappedResource)> {
        self.order.iter().filter_map(|name| self.entries.get_key_value(name).map(|(k, v)| (k.as_str(), v)))
    }

    /// Finds the layout entry of a resource
    ///
    /// The emitted name is tried first, directly and then as an element of
    /// an emulated array; then the de-mangled name the same two ways. An
    /// element whose index exceeds the mapped array size does not match, but
    /// is reported if nothing else does.
    pub fn resolve(&self, shader: &str, name: &str, alt_name: Option<&str>, array_suffix: Option<&str>) -> Result<ResolvedBinding<'_>, ShaderError> {
        let mut out_of_range = None;

        for candidate in std::iter::once(name).chain(alt_name) {
            if let Some((key, entry)) = self.entries.get_key_value(candidate) {
                return Ok(ResolvedBinding { key, entry, element: None });
            }

            let Some(suffix) = array_suffix.filter(|s| !s.is_empty()) else {
                continue;
            };
            let element = parse_emulated_array_element(candidate, suffix);
            if !element.is_valid() {
                continue;
            }
            let Some((key, entry)) = self.entries.get_key_value(element.base_name) else {
                continue;
            };
            let index = element.index as u32;
            if index < entry.array_size {
                return Ok(ResolvedBinding { key, entry, element: Some(index) });
            }
            out_of_range.get_or_insert_with(|| ShaderError::ArrayIndexOutOfRange {
                shader: shader.to_string(),
                resource: candidate.to_string(),
                array: key.clone(),
                index,
                array_size: entry.array_size,
            });
        }

        Err(out_of_range.unwrap_or_else(|| ShaderError::UnresolvedResource {
            shader: shader.to_string(),
            resource: name.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: &str = r#"
resources:
  - name: cbFrame
    group: 0
    binding: 0
  - name: g_Tex
    group: 0
    binding: 4
    array_size: 10
    stages: [pixel]
  - name: g_Sampler
    group: 1
    binding: 0
    flags: [non_filtering_sampler]
  - name: g_Buff0
    group: 2
    binding: 0
"#;

    #[test]
    fn test_load_yaml() {
        let mapping = ResourceMapping::from_yaml(LAYOUT).unwrap();
        assert_eq!(mapping.len(), 4);
        let names: Vec<&str> = mapping.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["cbFrame", "g_Tex", "g_Sampler", "g_Buff0"]);

        let tex = mapping.get("g_Tex").unwrap();
        assert_eq!(tex.array_size, 10);
        assert_eq!(tex.stages, ShaderStages::PIXEL);
        assert_eq!(mapping.get("cbFrame").unwrap().array_size, 1);
        assert_eq!(mapping.get("cbFrame").unwrap().stages, ShaderStages::all());
        assert_eq!(mapping.get("g_Sampler").unwrap().flags, LayoutFlags::NON_FILTERING_SAMPLER);
    }

    #[test]
    fn test_rejects_invalid_layouts() {
        let err = ResourceMapping::from_yaml("resources:\n  - name: g_Tex\n    group: 0\n    binding: 0\n    array_size: 0\n").unwrap_err();
        assert_eq!(err.to_string(), "Invalid resource layout: resource 'g_Tex' has an array size of 0");

        let err = ResourceMapping::from_yaml("resources:\n  - {name: a, group: 0, binding: 0}\n  - {name: a, group: 0, binding: 1}\n").unwrap_err();
        assert!(err.to_string().contains("more than once"));

        assert!(matches!(ResourceMapping::from_yaml("resources: 5"), Err(ShaderError::Layout(_))));

        let err = ResourceMapping::from_yaml("resources:\n  - {name: g_Tex, group: 0, binding: 4294967295, array_size: 2}\n").unwrap_err();
        assert!(err.to_string().contains("runs past the last binding index"));
        assert!(ResourceMapping::new().with("g_Last", 0, u32::MAX, 1).is_ok());
    }

    #[test]
    fn test_resolution_order() {
        let mapping = ResourceMapping::from_yaml(LAYOUT).unwrap();

        let direct = mapping.resolve("S", "cbFrame", None, Some("_")).unwrap();
        assert_eq!((direct.key, direct.element), ("cbFrame", None));

        let element = mapping.resolve("S", "g_Tex_3", None, Some("_")).unwrap();
        assert_eq!((element.key, element.element), ("g_Tex", Some(3)));
        assert_eq!(element.coordinates(), (0, 7));

        // g_Buff0_1 parses as element 1 of a one-element array before the alt name hits
        let alt = mapping.resolve("S", "g_Buff0_1", Some("g_Buff0"), Some("_")).unwrap();
        assert_eq!((alt.key, alt.element), ("g_Buff0", None));

        let err = mapping.resolve("S", "g_Tex_10", None, Some("_")).unwrap_err();
        assert!(matches!(err, ShaderError::ArrayIndexOutOfRange { index: 10, array_size: 10, .. }));

        let err = mapping.resolve("S", "g_Normal", None, Some("_")).unwrap_err();
        assert_eq!(err.to_string(), "Shader 'S': resource 'g_Normal' is not found in the resource mapping");

        assert!(mapping.resolve("S", "g_Tex_3", None, None).is_err());
    }
}
