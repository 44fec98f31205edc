use crate::types::SourceLanguage;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum VariableClass {
    #[default]
    Unknown,
    Scalar,
    Vector,
    MatrixRows,
    MatrixColumns,
    Struct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum BasicType {
    #[default]
    Unknown,
    Bool,
    Float,
    Float16,
    Double,
    Int,
    Int64,
    Uint,
    Uint64,
}

/// One member of a reflected buffer, possibly a nested struct
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct VariableDesc {
    pub name: String,
    pub type_name: String,
    pub offset: u32,
    pub class: VariableClass,
    pub basic_type: BasicType,
    pub num_rows: u8,
    pub num_columns: u8,
    /// Zero when the member is not an array
    pub array_size: u32,
    pub members: Vec<VariableDesc>,
}

impl VariableDesc {
    pub fn member(&self, name: &str) -> Option<&VariableDesc> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// Full layout of a uniform buffer
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BufferLayoutDesc {
    pub size: u32,
    pub variables: Vec<VariableDesc>,
}

impl BufferLayoutDesc {
    pub fn variable(&self, name: &str) -> Option<&VariableDesc> {
        self.variables.iter().find(|v| v.name == name)
    }
}

fn basic_type(scalar: naga::Scalar) -> BasicType {
    match (scalar.kind, scalar.width) {
        (naga::ScalarKind::Float, 2) => BasicType::Float16,
        (naga::ScalarKind::Float, 8) => BasicType::Double,
        (naga::ScalarKind::Float, _) => BasicType::Float,
        (naga::ScalarKind::Sint, 8) => BasicType::Int64,
        (naga::ScalarKind::Sint, _) => BasicType::Int,
        (naga::ScalarKind::Uint, 8) => BasicType::Uint64,
        (naga::ScalarKind::Uint, _) => BasicType::Uint,
        (naga::ScalarKind::Bool, _) => BasicType::Bool,
        _ => BasicType::Unknown,
    }
}

fn wgsl_scalar_name(basic_type: BasicType) -> &'static str {
    match basic_type {
        BasicType::Bool => "bool",
        BasicType::Float => "f32",
        BasicType::Float16 => "f16",
        BasicType::Double => "f64",
        BasicType::Int => "i32",
        BasicType::Int64 => "i64",
        BasicType::Uint => "u32",
        BasicType::Uint64 => "u64",
        BasicType::Unknown => "unknown",
    }
}

fn wgsl_type_name(module: &naga::Module, ty: naga::Handle<naga::Type>) -> String {
    let ty = &module.types[ty];
    if let Some(name) = ty.name.as_ref().filter(|name| !name.is_empty()) {
        return name.clone();
    }
    match &ty.inner {
        naga::TypeInner::Scalar(scalar) | naga::TypeInner::Atomic(scalar) => wgsl_scalar_name(basic_type(*scalar)).to_string(),
        naga::TypeInner::Vector { size, scalar } => format!("vec{}<{}>", *size as u8, wgsl_scalar_name(basic_type(*scalar))),
        naga::TypeInner::Matrix { columns, rows, scalar } => {
            format!("mat{}x{}<{}>", *columns as u8, *rows as u8, wgsl_scalar_name(basic_type(*scalar)))
        }
        naga::TypeInner::Array { base, size, .. } => match size {
            naga::ArraySize::Constant(count) => format!("array<{}, {}>", wgsl_type_name(module, *base), count.get()),
            _ => format!("array<{}>", wgsl_type_name(module, *base)),
        },
        _ => String::new(),
    }
}

/// Type name in the conventions of the original source language
fn default_type_name(desc: &VariableDesc, language: SourceLanguage) -> String {
    let glsl = matches!(language, SourceLanguage::Glsl | SourceLanguage::GlslVerbatim);
    let scalar = match (desc.basic_type, glsl) {
        (BasicType::Bool, _) => "bool",
        (BasicType::Float, _) => "float",
        (BasicType::Float16, false) => "half",
        (BasicType::Float16, true) => "float16_t",
        (BasicType::Double, _) => "double",
        (BasicType::Int, _) => "int",
        (BasicType::Int64, false) => "int64_t",
        (BasicType::Int64, true) => "int64_t",
        (BasicType::Uint, _) => "uint",
        (BasicType::Uint64, _) => "uint64_t",
        (BasicType::Unknown, _) => return String::new(),
    };
    match desc.class {
        VariableClass::Scalar => scalar.to_string(),
        VariableClass::Vector if glsl => {
            let prefix = match desc.basic_type {
                BasicType::Float => "",
                BasicType::Double => "d",
                BasicType::Int => "i",
                BasicType::Uint => "u",
                BasicType::Bool => "b",
                _ => "f16",
            };
            format!("{prefix}vec{}", desc.num_rows.max(desc.num_columns))
        }
        VariableClass::Vector => format!("{scalar}{}", desc.num_rows.max(desc.num_columns)),
        VariableClass::MatrixRows | VariableClass::MatrixColumns if glsl => {
            let prefix = if desc.basic_type == BasicType::Double { "d" } else { "" };
            if desc.num_rows == desc.num_columns {
                format!("{prefix}mat{}", desc.num_rows)
            } else {
                format!("{prefix}mat{}x{}", desc.num_columns, desc.num_rows)
            }
        }
        VariableClass::MatrixRows | VariableClass::MatrixColumns => format!("{scalar}{}x{}", desc.num_rows, desc.num_columns),
        _ => String::new(),
    }
}

fn array_size(size: &naga::ArraySize) -> u32 {
    match size {
        naga::ArraySize::Constant(count) => count.get(),
        _ => 0,
    }
}

fn load_variable_desc(module: &naga::Module, ty: naga::Handle<naga::Type>, language: SourceLanguage, desc: &mut VariableDesc) {
    let hlsl = language == SourceLanguage::Hlsl;

    match &module.types[ty].inner {
        naga::TypeInner::Array { base, size, .. } => {
            let element = &module.types[*base];
            // HLSL matrices with a non-default stride arrive as arrays of a single-vector struct
            let strided_matrix = match &element.inner {
                naga::TypeInner::Struct { members, .. } if hlsl && element.name.as_deref() == Some("strided_arr") => {
                    members.first().and_then(|m| match module.types[m.ty].inner {
                        naga::TypeInner::Vector { size, scalar } => Some((size, scalar)),
                        _ => None,
                    })
                }
                _ => None,
            };
            if let Some((width, scalar)) = strided_matrix {
                desc.class = VariableClass::MatrixRows;
                desc.basic_type = basic_type(scalar);
                desc.num_columns = width as u8;
                desc.num_rows = array_size(size) as u8;
            } else {
                load_variable_desc(module, *base, language, desc);
                desc.array_size = array_size(size);
            }
        }
        naga::TypeInner::Struct { members, .. } => {
            desc.class = VariableClass::Struct;
            for member in members {
                let mut member_desc = VariableDesc {
                    name: member.name.clone().unwrap_or_default(),
                    offset: member.offset,
                    ..Default::default()
                };
                load_variable_desc(module, member.ty, language, &mut member_desc);
                desc.members.push(member_desc);
            }
            desc.type_name = module.types[ty].name.clone().unwrap_or_default();
        }
        inner => {
            match inner {
                naga::TypeInner::Scalar(scalar) | naga::TypeInner::Atomic(scalar) => {
                    desc.class = VariableClass::Scalar;
                    desc.basic_type = basic_type(*scalar);
                    desc.num_rows = 1;
                    desc.num_columns = 1;
                }
                naga::TypeInner::Vector { size, scalar } => {
                    desc.class = VariableClass::Vector;
                    desc.basic_type = basic_type(*scalar);
                    desc.num_rows = *size as u8;
                    desc.num_columns = 1;
                }
                naga::TypeInner::Matrix { columns, rows, scalar } => {
                    desc.class = VariableClass::MatrixRows;
                    desc.basic_type = basic_type(*scalar);
                    desc.num_rows = *rows as u8;
                    desc.num_columns = *columns as u8;
                }
                _ => {}
            }
            if hlsl {
                std::mem::swap(&mut desc.num_rows, &mut desc.num_columns);
            }
        }
    }

    if desc.type_name.is_empty() {
        desc.type_name = if language.is_wgsl_like() {
            wgsl_type_name(module, ty)
        } else {
            default_type_name(desc, language)
        };
    }
}

/// Reflects the member layout of a buffer type
///
/// Member offsets are the ones the module declares; row and column counts
/// are swapped for HLSL-origin sources so they read in HLSL terms.
pub fn load_buffer_layout(module: &naga::Module, ty: naga::Handle<naga::Type>, language: SourceLanguage) -> BufferLayoutDesc {
    let size = module.types[ty].inner.size(module.to_ctx());
    let variables = match &module.types[ty].inner {
        naga::TypeInner::Struct { members, .. } => members
            .iter()
            .map(|member| {
                let mut desc = VariableDesc {
                    name: member.name.clone().unwrap_or_default(),
                    offset: member.offset,
                    ..Default::default()
                };
                load_variable_desc(module, member.ty, language, &mut desc);
                desc
            })
            .collect(),
        _ => {
            let mut desc = VariableDesc::default();
            load_variable_desc(module, ty, language, &mut desc);
            vec![desc]
        }
    };
    BufferLayoutDesc { size, variables }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_type(module: &naga::Module, name: &str) -> naga::Handle<naga::Type> {
        module
            .global_variables
            .iter()
            .find(|(_, var)| var.name.as_deref() == Some(name))
            .map(|(_, var)| var.ty)
            .unwrap()
    }

    const FRAME_WGSL: &str = r#"
struct Light {
    direction: vec3<f32>,
    intensity: f32,
    color: vec4<f32>,
}

struct Frame {
    view_proj: mat4x4<f32>,
    light: Light,
    time: f32,
    shadow_cascades: array<vec4<f32>, 4>,
    tangent_frame: mat4x3<f32>,
}

@group(0) @binding(0) var<uniform> frame: Frame;

@fragment
fn main() -> @location(0) vec4<f32> {
    return frame.light.color * frame.time;
}
"#;

    #[test]
    fn test_nested_struct_offsets() {
        let module = naga::front::wgsl::parse_str(FRAME_WGSL).unwrap();
        let layout = load_buffer_layout(&module, uniform_type(&module, "frame"), SourceLanguage::Wgsl);

        let view_proj = layout.variable("view_proj").unwrap();
        assert_eq!(view_proj.offset, 0);
        assert_eq!(view_proj.class, VariableClass::MatrixRows);
        assert_eq!((view_proj.num_rows, view_proj.num_columns), (4, 4));
        assert_eq!(view_proj.type_name, "mat4x4<f32>");

        let light = layout.variable("light").unwrap();
        assert_eq!(light.offset, 64);
        assert_eq!(light.class, VariableClass::Struct);
        assert_eq!(light.type_name, "Light");
        assert_eq!(light.member("direction").unwrap().offset, 0);
        assert_eq!(light.member("intensity").unwrap().offset, 12);
        assert_eq!(light.member("color").unwrap().offset, 16);
        assert_eq!(light.member("color").unwrap().type_name, "vec4<f32>");

        assert_eq!(layout.variable("time").unwrap().offset, 96);
        let cascades = layout.variable("shadow_cascades").unwrap();
        assert_eq!(cascades.offset, 112);
        assert_eq!(cascades.array_size, 4);
        assert_eq!(cascades.class, VariableClass::Vector);

        let tangent_frame = layout.variable("tangent_frame").unwrap();
        assert_eq!(tangent_frame.offset, 176);
        assert_eq!((tangent_frame.num_rows, tangent_frame.num_columns), (3, 4));
        assert_eq!(layout.size, 240);
    }

    #[test]
    fn test_hlsl_swaps_rows_and_columns() {
        let module = naga::front::wgsl::parse_str(FRAME_WGSL).unwrap();
        let layout = load_buffer_layout(&module, uniform_type(&module, "frame"), SourceLanguage::Hlsl);

        let tangent_frame = layout.variable("tangent_frame").unwrap();
        assert_eq!((tangent_frame.num_rows, tangent_frame.num_columns), (4, 3));
        assert_eq!(tangent_frame.type_name, "float4x3");

        let intensity = layout.variable("light").unwrap().member("intensity").unwrap();
        assert_eq!(intensity.type_name, "float");
        assert_eq!(intensity.basic_type, BasicType::Float);

        let direction = layout.variable("light").unwrap().member("direction").unwrap();
        assert_eq!((direction.num_rows, direction.num_columns), (1, 3));
        assert_eq!(direction.type_name, "float3");
    }

    #[test]
    fn test_hlsl_strided_matrix() {
        let source = r#"
struct strided_arr {
    el: vec4<f32>,
}

struct Constants {
    world: array<strided_arr, 3>,
}

@group(0) @binding(0) var<uniform> constants: Constants;

@fragment
fn main() -> @location(0) vec4<f32> {
    return constants.world[0].el;
}
"#;
        let module = naga::front::wgsl::parse_str(source).unwrap();
        let layout = load_buffer_layout(&module, uniform_type(&module, "constants"), SourceLanguage::Hlsl);
        let world = layout.variable("world").unwrap();
        assert_eq!(world.class, VariableClass::MatrixRows);
        assert_eq!((world.num_rows, world.num_columns), (3, 4));
        assert_eq!(world.array_size, 0);
    }

    #[test]
    fn test_glsl_default_type_names() {
        let module = naga::front::wgsl::parse_str(FRAME_WGSL).unwrap();
        let layout = load_buffer_layout(&module, uniform_type(&module, "frame"), SourceLanguage::Glsl);
        assert_eq!(layout.variable("view_proj").unwrap().type_name, "mat4");
        assert_eq!(layout.variable("tangent_frame").unwrap().type_name, "mat4x3");
        assert_eq!(layout.variable("light").unwrap().member("color").unwrap().type_name, "vec4");
    }
}
