//! `#include` discovery and unrolling

use super::ShaderSourceFactory;
use crate::error::ShaderError;
use rustc_hash::FxHashSet;

/// Nesting bound for include unrolling; content served indefinitely by a factory stops here
pub const MAX_INCLUDE_DEPTH: usize = 64;

/// One `#include` directive found in a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    /// Path between the quotes or angle brackets
    pub path: String,
    /// Byte offset of the `#`
    pub start: usize,
    /// Byte offset one past the closing quote or bracket
    pub end: usize,
    /// 1-based line of the directive
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeSyntaxError {
    pub line: usize,
    pub offset: usize,
    pub message: &'static str,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    AfterHash,
    AfterInclude,
    InsideQuotes,
    InsideAngleBrackets,
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Finds all include directives, skipping `//` and `/* */` comments
pub fn find_includes(source: &str) -> Result<Vec<IncludeDirective>, IncludeSyntaxError> {
    let bytes = source.as_bytes();
    let mut includes = Vec::new();

    let mut state = ScanState::Code;
    let mut pos = 0;
    let mut line = 1;
    let mut line_start = 0;
    let mut directive_start = 0;
    let mut path_start = 0;

    let error = |message: &'static str, at: usize, line: usize, line_start: usize| IncludeSyntaxError {
        line,
        offset: at - line_start + 1,
        message,
    };

    while pos < bytes.len() {
        let c = bytes[pos];
        match state {
            ScanState::Code => {
                if c == b'/' && bytes.get(pos + 1) == Some(&b'/') {
                    while pos < bytes.len() && bytes[pos] != b'\n' {
                        pos += 1;
                    }
                    continue;
                }
                if c == b'/' && bytes.get(pos + 1) == Some(&b'*') {
                    let comment_start = pos;
                    pos += 2;
                    loop {
                        if pos + 1 >= bytes.len() {
                            return Err(error("missing end comment.", comment_start, line, line_start));
                        }
                        if bytes[pos] == b'*' && bytes[pos + 1] == b'/' {
                            pos += 2;
                            break;
                        }
                        if bytes[pos] == b'\n' {
                            line += 1;
                            line_start = pos + 1;
                        }
                        pos += 1;
                    }
                    continue;
                }
                if c == b'#' {
                    directive_start = pos;
                    state = ScanState::AfterHash;
                }
            }
            ScanState::AfterHash => {
                if c == b' ' || c == b'\t' {
                    pos += 1;
                    continue;
                }
                let keyword = b"include";
                let is_include = bytes[pos..].starts_with(keyword) && bytes.get(pos + keyword.len()).is_none_or(|&next| !is_identifier_byte(next));
                if is_include {
                    pos += keyword.len();
                    state = ScanState::AfterInclude;
                    continue;
                }
                state = ScanState::Code;
                continue;
            }
            ScanState::AfterInclude => match c {
                b' ' | b'\t' => {}
                b'"' => {
                    path_start = pos + 1;
                    state = ScanState::InsideQuotes;
                }
                b'<' => {
                    path_start = pos + 1;
                    state = ScanState::InsideAngleBrackets;
                }
                _ => {
                    return Err(error(
                        "missing opening quote or angle bracket after the include directive.",
                        pos,
                        line,
                        line_start,
                    ));
                }
            },
            ScanState::InsideQuotes | ScanState::InsideAngleBrackets => {
                let (closing, message) = if state == ScanState::InsideQuotes {
                    (b'"', "missing closing quote in the include directive.")
                } else {
                    (b'>', "missing closing angle bracket in the include directive.")
                };
                if c == b'\n' {
                    return Err(error(message, pos, line, line_start));
                }
                if c == closing {
                    includes.push(IncludeDirective {
                        path: source[path_start..pos].to_string(),
                        start: directive_start,
                        end: pos + 1,
                        line,
                    });
                    state = ScanState::Code;
                }
            }
        }

        if bytes[pos] == b'\n' {
            line += 1;
            line_start = pos + 1;
        }
        pos += 1;
    }

    match state {
        ScanState::AfterInclude => Err(error(
            "missing opening quote or angle bracket after the include directive.",
            pos,
            line,
            line_start,
        )),
        ScanState::InsideQuotes => Err(error("missing closing quote in the include directive.", pos, line, line_start)),
        ScanState::InsideAngleBrackets => Err(error("missing closing angle bracket in the include directive.", pos, line, line_start)),
        _ => Ok(includes),
    }
}

/// Canonical form of an include path used as the "seen" key
pub fn normalize_include_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." if parts.last().is_some_and(|last| *last != "..") => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    let joined = parts.join("/");
    if absolute { format!("/{joined}") } else { joined }
}

/// Recursively inlines include directives, each distinct path at most once
pub struct IncludeUnroller<'a> {
    shader: &'a str,
    factory: Option<&'a dyn ShaderSourceFactory>,
    seen: FxHashSet<String>,
    line_markers: bool,
}

impl<'a> IncludeUnroller<'a> {
    pub fn new(shader: &'a str, factory: Option<&'a dyn ShaderSourceFactory>) -> Self {
        Self {
            shader,
            factory,
            seen: FxHashSet::default(),
            line_markers: true,
        }
    }

    /// Enables or disables `#line` markers around inlined files
    ///
    /// Languages without a preprocessor must disable them.
    pub fn line_markers(mut self, enabled: bool) -> Self {
        self.line_markers = enabled;
        self
    }

    /// Unrolls `source`, whose own path (if any) counts as already seen
    pub fn unroll(mut self, source: &str, top_level_path: Option<&str>) -> Result<String, ShaderError> {
        let file = match top_level_path {
            Some(path) => {
                let path = normalize_include_path(path);
                self.seen.insert(path.clone());
                path
            }
            None => "<source>".to_string(),
        };
        self.unroll_file(source, &file, 0)
    }

    fn unroll_file(&mut self, source: &str, file: &str, depth: usize) -> Result<String, ShaderError> {
        let directives = find_includes(source).map_err(|e| ShaderError::IncludeSyntax {
            shader: self.shader.to_string(),
            file: file.to_string(),
            line: e.line,
            offset: e.offset,
            message: e.message,
        })?;
        if directives.is_empty() {
            return Ok(source.to_string());
        }
        let factory = self.factory.ok_or_else(|| ShaderError::MissingStreamFactory { shader: self.shader.to_string() })?;

        let mut output = String::with_capacity(source.len());
        let mut last = 0;
        for directive in directives {
            output.push_str(&source[last..directive.start]);
            last = directive.end;

            let path = normalize_include_path(&directive.path);
            if !self.seen.insert(path.clone()) {
                tracing::debug!("'{path}' is already included in shader '{}'", self.shader);
                continue;
            }
            if depth + 1 > MAX_INCLUDE_DEPTH {
                return Err(ShaderError::IncludeDepth {
                    shader: self.shader.to_string(),
                    path,
                    limit: MAX_INCLUDE_DEPTH,
                });
            }

            let included = factory.open(&directive.path).map_err(|_| ShaderError::SourceNotFound {
                shader: self.shader.to_string(),
                path: directive.path.clone(),
            })?;
            tracing::debug!("unrolling '{path}' into shader '{}'", self.shader);
            let unrolled = self.unroll_file(&included, &path, depth + 1)?;

            if self.line_markers {
                output.push_str("\n#line 1\n");
            }
            output.push_str(&unrolled);
            if self.line_markers {
                if !unrolled.ends_with('\n') {
                    output.push('\n');
                }
                output.push_str(&format!("#line {}\n", directive.line));
            }
        }
        output.push_str(&source[last..]);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySourceFactory;

    #[test]
    fn test_find_includes_quotes_and_angles() {
        let source = "#include \"common.fxh\"\n  #  include <lights/point.fxh>\nvoid main() {}\n";
        let includes = find_includes(source).unwrap();
        assert_eq!(includes.len(), 2);
        assert_eq!(includes[0].path, "common.fxh");
        assert_eq!(includes[0].line, 1);
        assert_eq!(&source[includes[0].start..includes[0].end], "#include \"common.fxh\"");
        assert_eq!(includes[1].path, "lights/point.fxh");
        assert_eq!(includes[1].line, 2);
    }

    #[test]
    fn test_find_includes_skips_comments() {
        let source = "// #include \"a.h\"\n/* #include \"b.h\"\n */\n#include \"c.h\"\n#define INCLUDE_ME 1\n";
        let includes = find_includes(source).unwrap();
        assert_eq!(includes.len(), 1);
        assert_eq!(includes[0].path, "c.h");
        assert_eq!(includes[0].line, 4);
    }

    #[test]
    fn test_find_includes_ignores_similar_directives() {
        let includes = find_includes("#includes \"x.h\"\n#define A 1\n").unwrap();
        assert!(includes.is_empty());
    }

    #[test]
    fn test_find_includes_errors() {
        let err = find_includes("int a;\n/* unterminated").unwrap_err();
        assert_eq!(err.message, "missing end comment.");
        assert_eq!((err.line, err.offset), (2, 1));

        let err = find_includes("#include common.h\n").unwrap_err();
        assert_eq!(err.message, "missing opening quote or angle bracket after the include directive.");
        assert_eq!((err.line, err.offset), (1, 10));

        let err = find_includes("#include \"common.h\n").unwrap_err();
        assert_eq!(err.message, "missing closing quote in the include directive.");

        let err = find_includes("#include <common.h").unwrap_err();
        assert_eq!(err.message, "missing closing angle bracket in the include directive.");
    }

    #[test]
    fn test_normalize_include_path() {
        assert_eq!(normalize_include_path("./shaders\\common.h"), "shaders/common.h");
        assert_eq!(normalize_include_path("shaders/lights/../common.h"), "shaders/common.h");
        assert_eq!(normalize_include_path("/abs//path.h"), "/abs/path.h");
        assert_eq!(normalize_include_path("../up.h"), "../up.h");
    }

    #[test]
    fn test_unroll_each_path_once() {
        let factory = MemorySourceFactory::new()
            .with_file("common.h", "#define COMMON 1\n")
            .with_file("lights.h", "#include \"common.h\"\nfloat light;\n");
        let source = "#include \"common.h\"\n#include \"lights.h\"\nvoid main() {}\n";
        let unrolled = IncludeUnroller::new("Test", Some(&factory)).line_markers(false).unroll(source, Some("main.glsl")).unwrap();
        assert_eq!(unrolled.matches("#define COMMON 1").count(), 1);
        assert!(unrolled.contains("float light;"));
        assert!(unrolled.ends_with("void main() {}\n"));
        assert!(!unrolled.contains("#include"));
    }

    #[test]
    fn test_unroll_skips_self_include() {
        let factory = MemorySourceFactory::new().with_file("main.glsl", "should not be inlined");
        let unrolled = IncludeUnroller::new("Test", Some(&factory))
            .line_markers(false)
            .unroll("#include \"main.glsl\"\nvoid main() {}\n", Some("main.glsl"))
            .unwrap();
        assert_eq!(unrolled, "\nvoid main() {}\n");
    }

    #[test]
    fn test_unroll_line_markers() {
        let factory = MemorySourceFactory::new().with_file("common.h", "#define COMMON 1");
        let unrolled = IncludeUnroller::new("Test", Some(&factory))
            .unroll("int a;\n#include \"common.h\"\nint b;\n", None)
            .unwrap();
        assert_eq!(unrolled, "int a;\n\n#line 1\n#define COMMON 1\n#line 2\n\nint b;\n");
    }

    #[test]
    fn test_unroll_requires_factory() {
        let result = IncludeUnroller::new("Test", None).unroll("#include \"common.h\"\n", None);
        assert!(matches!(result, Err(ShaderError::MissingStreamFactory { .. })));
    }

    #[test]
    fn test_unroll_reports_missing_include() {
        let factory = MemorySourceFactory::new();
        let result = IncludeUnroller::new("Test", Some(&factory)).unroll("#include \"nope.h\"\n", None);
        match result {
            Err(ShaderError::SourceNotFound { path, shader }) => {
                assert_eq!(path, "nope.h");
                assert_eq!(shader, "Test");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_unroll_depth_limit() {
        // Every path is distinct, so only the depth bound stops the recursion
        let factory = |path: &str| -> std::io::Result<String> {
            let depth: usize = path.trim_end_matches(".h").parse().unwrap_or(0);
            Ok(format!("#include \"{}.h\"\n", depth + 1))
        };
        let result = IncludeUnroller::new("Test", Some(&factory)).unroll("#include \"0.h\"\n", None);
        assert!(matches!(result, Err(ShaderError::IncludeDepth { .. })));
    }
}
