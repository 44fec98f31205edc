//! In-place patching of SPIR-V resource decorations

use rustc_hash::{FxHashMap, FxHashSet};

pub const SPV_MAGIC: u32 = 0x0723_0203;

// SPIR-V opcodes
const OP_NAME: u32 = 5;
const OP_DECORATE: u32 = 71;
const OP_FUNCTION: u32 = 54;

// SPIR-V decorations
const DEC_BINDING: u32 = 33;
const DEC_DESCRIPTOR_SET: u32 = 34;

/// Descriptor decorations of one variable, with the word index of each literal
#[derive(Debug, Clone, Copy, Default)]
struct Decorations {
    set: Option<(usize, u32)>,
    binding: Option<(usize, u32)>,
}

/// Walks the instructions before the first function
fn collect_decorations(words: &[u32]) -> Result<FxHashMap<u32, Decorations>, String> {
    if words.len() < 5 || words[0] != SPV_MAGIC {
        return Err("invalid SPIR-V header".to_string());
    }

    let mut decorations: FxHashMap<u32, Decorations> = FxHashMap::default();
    let mut i = 5usize;
    while i < words.len() {
        let wc = (words[i] >> 16) as usize;
        let op = words[i] & 0xFFFF;
        if wc == 0 || i + wc > words.len() {
            return Err(format!("malformed instruction at word {i}"));
        }

        match op {
            OP_DECORATE if wc >= 4 => {
                let target = words[i + 1];
                let value = (i + 3, words[i + 3]);
                match words[i + 2] {
                    DEC_DESCRIPTOR_SET => decorations.entry(target).or_default().set = Some(value),
                    DEC_BINDING => decorations.entry(target).or_default().binding = Some(value),
                    _ => {}
                }
            }
            OP_FUNCTION => break,
            _ => {}
        }
        i += wc;
    }
    Ok(decorations)
}

/// `(id, set, binding)` of every variable with a Binding decoration, sorted by id
pub fn read_spirv_bindings(words: &[u32]) -> Result<Vec<(u32, u32, u32)>, String> {
    let mut bindings: Vec<(u32, u32, u32)> = collect_decorations(words)?
        .into_iter()
        .filter_map(|(id, dec)| dec.binding.map(|(_, binding)| (id, dec.set.map_or(0, |(_, set)| set), binding)))
        .collect();
    bindings.sort_unstable();
    Ok(bindings)
}

/// Debug name of an id, when the module carries one
pub fn spirv_debug_name(words: &[u32], id: u32) -> Option<String> {
    let mut i = 5usize;
    while i < words.len() {
        let wc = (words[i] >> 16) as usize;
        if wc == 0 || i + wc > words.len() {
            return None;
        }
        if words[i] & 0xFFFF == OP_NAME && wc >= 3 && words[i + 1] == id {
            let bytes: Vec<u8> = words[i + 2..i + wc].iter().flat_map(|word| word.to_le_bytes()).take_while(|b| *b != 0).collect();
            return String::from_utf8(bytes).ok();
        }
        i += wc;
    }
    None
}

/// Rewrites descriptor set and binding literals, matched by their current value
///
/// All moves apply at once, so chains such as `0 -> 1, 1 -> 2` are safe.
///
/// # Returns
/// The pre-remap coordinates that were found and patched
pub fn patch_spirv_bindings(words: &mut [u32], moves: &FxHashMap<(u32, u32), (u32, u32)>) -> Result<FxHashSet<(u32, u32)>, String> {
    let decorations = collect_decorations(words)?;
    let mut patched = FxHashSet::default();

    for (id, dec) in decorations {
        let Some((binding_at, binding)) = dec.binding else {
            continue;
        };
        let set = dec.set.map_or(0, |(_, set)| set);
        let Some(&(new_set, new_binding)) = moves.get(&(set, binding)) else {
            continue;
        };

        words[binding_at] = new_binding;
        match dec.set {
            Some((set_at, _)) => words[set_at] = new_set,
            None if new_set != 0 => return Err(format!("variable %{id} has no DescriptorSet decoration to move to set {new_set}")),
            None => {}
        }
        patched.insert((set, binding));
    }
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_words(s: &str) -> Vec<u32> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes.chunks(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
    }

    fn module() -> Vec<u32> {
        let mut words = vec![SPV_MAGIC, 0x0001_0000, 0, 20, 0];
        let name = string_words("g_Tex");
        words.push(((2 + name.len() as u32) << 16) | OP_NAME);
        words.push(10);
        words.extend(name);
        words.extend([(4 << 16) | OP_DECORATE, 10, DEC_DESCRIPTOR_SET, 0]);
        words.extend([(4 << 16) | OP_DECORATE, 10, DEC_BINDING, 0]);
        words.extend([(4 << 16) | OP_DECORATE, 11, DEC_DESCRIPTOR_SET, 0]);
        words.extend([(4 << 16) | OP_DECORATE, 11, DEC_BINDING, 1]);
        words.extend([(4 << 16) | OP_DECORATE, 12, DEC_BINDING, 5]);
        words
    }

    #[test]
    fn test_read_bindings() {
        let words = module();
        assert_eq!(read_spirv_bindings(&words).unwrap(), vec![(10, 0, 0), (11, 0, 1), (12, 0, 5)]);
        assert_eq!(spirv_debug_name(&words, 10).as_deref(), Some("g_Tex"));
        assert_eq!(spirv_debug_name(&words, 11), None);
    }

    #[test]
    fn test_chained_moves() {
        let mut words = module();
        let moves: FxHashMap<(u32, u32), (u32, u32)> = [((0, 0), (0, 1)), ((0, 1), (2, 7))].into_iter().collect();
        let patched = patch_spirv_bindings(&mut words, &moves).unwrap();
        assert_eq!(patched.len(), 2);
        assert_eq!(read_spirv_bindings(&words).unwrap(), vec![(10, 0, 1), (11, 2, 7), (12, 0, 5)]);
    }

    #[test]
    fn test_missing_set_decoration() {
        let mut words = module();
        let moves: FxHashMap<(u32, u32), (u32, u32)> = [((0, 5), (0, 6))].into_iter().collect();
        patch_spirv_bindings(&mut words, &moves).unwrap();
        assert_eq!(read_spirv_bindings(&words).unwrap()[2], (12, 0, 6));

        let moves: FxHashMap<(u32, u32), (u32, u32)> = [((0, 6), (1, 0))].into_iter().collect();
        assert!(patch_spirv_bindings(&mut words, &moves).is_err());
    }

    #[test]
    fn test_rejects_bad_header() {
        let mut words = module();
        words[0] = 0;
        assert_eq!(read_spirv_bindings(&words).unwrap_err(), "invalid SPIR-V header");
        assert!(patch_spirv_bindings(&mut words, &FxHashMap::default()).is_err());
    }
}
