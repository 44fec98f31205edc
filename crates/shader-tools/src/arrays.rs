//! Emulated resource arrays
//!
//! Languages without arrays of resource bindings declare `N` separate
//! resources named `Base<suffix><index>`. These helpers recognise such names
//! and fold the elements back into one logical array.

use crate::{
    error::ShaderError,
    reflect::{ArrayElementBinding, ResourceAttribs, ResourceList},
};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// `(base_name, index)` parsed from a declared name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulatedArrayElement<'a> {
    pub base_name: &'a str,
    /// Negative when the name is not an array element
    pub index: i32,
}

impl EmulatedArrayElement<'_> {
    pub fn is_valid(&self) -> bool {
        self.index >= 0
    }
}

/// Splits `name` into a base name and an element index
///
/// The rightmost occurrence of `suffix` that is followed only by decimal
/// digits wins, so a suffix that overlaps itself (`"xx"` in `"Texxx3"`) is
/// resolved against the trailing index.
pub fn parse_emulated_array_element<'a>(name: &'a str, suffix: &str) -> EmulatedArrayElement<'a> {
    let invalid = EmulatedArrayElement { base_name: name, index: -1 };
    if suffix.is_empty() {
        return invalid;
    }

    let mut search_end = name.len();
    while let Some(pos) = name[..search_end].rfind(suffix) {
        let digits = &name[pos + suffix.len()..];
        if pos > 0 && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = digits.parse::<i32>() {
                return EmulatedArrayElement {
                    base_name: &name[..pos],
                    index,
                };
            }
        }
        // Next candidate may overlap the one just rejected
        let mut next_end = pos + suffix.len() - 1;
        while !name.is_char_boundary(next_end) {
            next_end -= 1;
        }
        search_end = next_end;
    }
    invalid
}

/// Folds the emulated-array elements of a list into single array resources
///
/// Elements sharing a base name must agree on category, dimension, sample
/// type and texel format. The merged array takes the coordinates of its
/// lowest element and `max index + 1` as its size; gaps are allowed.
pub fn merge_emulated_arrays(list: ResourceList, suffix: &str) -> Result<ResourceList, ShaderError> {
    if suffix.is_empty() {
        return Ok(list);
    }

    let shader = list.shader_name().to_string();
    let stage = list.stage();
    let language = list.source_language();
    let combined_sampler_suffix = list.combined_sampler_suffix().map(str::to_string);

    let mut merged: Vec<ResourceAttribs> = Vec::with_capacity(list.len());
    let mut arrays: FxHashMap<String, usize> = FxHashMap::default();

    for res in list.into_resources() {
        let semantic_name = res.semantic_name().to_string();
        let element = parse_emulated_array_element(&semantic_name, suffix);
        if !element.is_valid() || res.array_size > 1 || !res.elements.is_empty() {
            merged.push(res);
            continue;
        }
        let index = element.index as u32;
        let binding = ArrayElementBinding {
            name: res.name.clone(),
            index,
            bind_group: res.bind_group,
            bind_index: res.bind_index,
        };

        match arrays.get(element.base_name) {
            Some(&slot) => {
                let array = &mut merged[slot];
                if let Some((property, value_a, value_b)) = array.first_incompatibility(&res, false) {
                    return Err(ShaderError::IncompatibleResource {
                        shader,
                        resource: element.base_name.to_string(),
                        stage_a: stage,
                        stage_b: stage,
                        property,
                        value_a,
                        value_b,
                    });
                }
                if array.elements.iter().any(|el| el.index == index) {
                    return Err(ShaderError::Unsupported {
                        shader,
                        message: format!("array element {index} of '{}' is declared twice", element.base_name),
                    });
                }
                array.array_size = array.array_size.max(index + 1);
                if index < array.elements[0].index {
                    array.bind_group = binding.bind_group;
                    array.bind_index = binding.bind_index;
                }
                array.elements.push(binding);
                array.elements.sort_by_key(|el| el.index);
            }
            None => {
                let base_name = element.base_name.to_string();
                let mut array = res;
                array.name = Arc::from(base_name.as_str());
                array.alt_name = None;
                array.array_size = index + 1;
                array.elements.push(binding);
                arrays.insert(base_name, merged.len());
                merged.push(array);
            }
        }
    }

    for (base_name, slot) in &arrays {
        let array = &merged[*slot];
        tracing::debug!("merged {} elements of emulated array '{base_name}[{}]' in shader '{shader}'", array.elements.len(), array.array_size);
    }

    Ok(ResourceList::new(&shader, stage, language, merged)?
        .with_combined_sampler_suffix(combined_sampler_suffix.as_deref())
        .with_emulated_array_suffix(Some(suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ResourceProperty,
        reflect::{ResourceCategory, ResourceDimension, SampleType},
        types::{ShaderStage, SourceLanguage},
    };

    fn texture(name: &str, binding: u32) -> ResourceAttribs {
        ResourceAttribs::new(name, ResourceCategory::SampledTexture, 0, binding)
            .with_dimension(ResourceDimension::Tex2D)
            .with_sample_type(SampleType::Float)
    }

    fn list(resources: Vec<ResourceAttribs>) -> ResourceList {
        ResourceList::new("Material", ShaderStage::Pixel, SourceLanguage::Hlsl, resources).unwrap()
    }

    #[test]
    fn test_parse_element() {
        assert_eq!(
            parse_emulated_array_element("g_Tex_3", "_"),
            EmulatedArrayElement { base_name: "g_Tex", index: 3 }
        );
        assert_eq!(parse_emulated_array_element("g_Tex_12", "_").index, 12);
        assert!(!parse_emulated_array_element("g_Tex", "_").is_valid());
        assert!(!parse_emulated_array_element("g_Tex_", "_").is_valid());
        assert!(!parse_emulated_array_element("_3", "_").is_valid());
        assert!(!parse_emulated_array_element("g_Tex_3a", "_").is_valid());
        assert!(!parse_emulated_array_element("g_Tex3", "").is_valid());
    }

    #[test]
    fn test_parse_self_overlapping_suffix() {
        let element = parse_emulated_array_element("Texxx3", "xx");
        assert_eq!(element.base_name, "Tex");
        assert_eq!(element.index, 3);

        let element = parse_emulated_array_element("g_Texxx_xx7", "xx");
        assert_eq!(element.base_name, "g_Texxx_");
        assert_eq!(element.index, 7);
    }

    #[test]
    fn test_merge_with_gaps() {
        let merged = merge_emulated_arrays(list(vec![texture("g_Tex_0", 4), texture("g_Tex_2", 6), texture("g_Tex_5", 9)]), "_").unwrap();
        assert_eq!(merged.len(), 1);
        let array = merged.find("g_Tex").unwrap();
        assert_eq!(array.array_size, 6);
        assert_eq!((array.bind_group, array.bind_index), (0, 4));
        let indices: Vec<u32> = array.elements.iter().map(|el| el.index).collect();
        assert_eq!(indices, vec![0, 2, 5]);
        assert_eq!(merged.emulated_array_suffix(), Some("_"));
    }

    #[test]
    fn test_merge_ten_textures() {
        let resources = (0..10).rev().map(|i| texture(&format!("g_Tex_{i}"), 10 + i)).collect();
        let merged = merge_emulated_arrays(list(resources), "_").unwrap();
        let array = merged.find("g_Tex").unwrap();
        assert_eq!(array.array_size, 10);
        assert_eq!(array.bind_index, 10);
        assert_eq!(&*array.elements[9].name, "g_Tex_9");
    }

    #[test]
    fn test_merge_keeps_unrelated_resources() {
        let resources = vec![
            texture("g_Tex_0", 0),
            texture("g_Tex_1", 1),
            texture("g_Normal", 2),
            ResourceAttribs::new("cbFrame_0", ResourceCategory::UniformBuffer, 0, 3),
        ];
        let merged = merge_emulated_arrays(list(resources), "_").unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.find("g_Normal").unwrap().array_size, 1);
        assert_eq!(merged.find("cbFrame").unwrap().array_size, 1);
    }

    #[test]
    fn test_incompatible_elements() {
        let resources = vec![texture("g_Tex_0", 0), texture("g_Tex_1", 1).with_dimension(ResourceDimension::Cube)];
        let err = merge_emulated_arrays(list(resources), "_").unwrap_err();
        match err {
            ShaderError::IncompatibleResource {
                shader,
                resource,
                property,
                value_a,
                value_b,
                ..
            } => {
                assert_eq!(shader, "Material");
                assert_eq!(resource, "g_Tex");
                assert_eq!(property, ResourceProperty::Dimension);
                assert_eq!((value_a.as_str(), value_b.as_str()), ("2D", "cube"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let resources = vec![texture("g_Tex_0", 0), texture("g_Tex_1", 1).with_sample_type(SampleType::UInt)];
        assert!(matches!(
            merge_emulated_arrays(list(resources), "_"),
            Err(ShaderError::IncompatibleResource {
                property: ResourceProperty::SampleType,
                ..
            })
        ));
    }
}
