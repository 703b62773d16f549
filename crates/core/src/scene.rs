//! Scene code extraction, normalization and composition.
//!
//! A workspace's animation is stored as an ordered list of increments. The
//! first increment is a complete scene file; every later increment is a run
//! of statements appended to the end of the scene's `construct` method. The
//! functions here turn a raw model response into an increment and turn a list
//! of increments into one executable scene file.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

/// Marker the model is told to put in front of continuation code.
pub const SECTION_MARKER: &str = "# <<SECTION_BREAK>>";

/// Statement inserted between increments so each turn renders as a section.
pub const NEXT_SECTION_CALL: &str = "self.next_section()";

pub const MANIM_IMPORT: &str = "from manim import *";

static SCENE_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"class\s+(\w+)\s*\(\s*Scene\s*\)").expect("valid regex")
});

static CONSTRUCT_DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)def\s+construct\s*\(\s*self\s*\)").expect("valid regex")
});

/* --------------------------------------------------------------------------
Extraction
-------------------------------------------------------------------------- */

/// Return the contents of the first fenced code block in `response`.
///
/// The opening fence may carry a language tag. A block without a closing
/// fence is not considered delimited and yields `None`.
pub fn extract_code_block(response: &str) -> Option<String> {
    let mut lines = response.lines();
    lines.by_ref().find(|line| line.trim_start().starts_with("```"))?;

    let mut body = Vec::new();
    for line in lines {
        if line.trim_start().starts_with("```") {
            return Some(body.join("\n"));
        }
        body.push(line);
    }
    None
}

/// Name of the first `Scene` subclass declared in `code`.
pub fn find_scene_class(code: &str) -> Option<&str> {
    SCENE_CLASS_RE
        .captures(code)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/* --------------------------------------------------------------------------
Normalization
-------------------------------------------------------------------------- */

/// Normalize the code of a workspace's first turn.
///
/// Section markers and explicit `self.next_section()` calls are dropped, the
/// manim import is added when missing, and the result ends with exactly one
/// newline. Returns an empty string when nothing is left.
pub fn normalize_initial(code: &str) -> String {
    let kept: Vec<&str> = code
        .lines()
        .filter(|line| !line.contains(SECTION_MARKER) && !line.contains(NEXT_SECTION_CALL))
        .collect();
    let body = kept.join("\n");
    let body = body.trim();
    if body.is_empty() {
        return String::new();
    }
    if body.contains("from manim import") {
        with_trailing_newline(body)
    } else {
        with_trailing_newline(&format!("{MANIM_IMPORT}\n\n{body}"))
    }
}

/// Normalize the code of a continuation turn.
///
/// Only the text after the first section marker is kept when a marker is
/// present. Leading import lines are removed and the common indentation is
/// stripped, so the increment can be re-indented into `construct`.
pub fn normalize_continuation(code: &str) -> String {
    let after_marker = match code.split_once(SECTION_MARKER) {
        Some((_, rest)) => rest,
        None => code,
    };

    let lines: Vec<&str> = after_marker
        .lines()
        .filter(|line| !line.contains(SECTION_MARKER) && line.trim() != NEXT_SECTION_CALL)
        .skip_while(|line| {
            let t = line.trim();
            t.is_empty() || t.starts_with("import ") || t.starts_with("from ")
        })
        .collect();

    let body = dedent(&lines.join("\n"));
    let body = body.trim_end();
    if body.trim().is_empty() {
        return String::new();
    }
    with_trailing_newline(body)
}

/// Remove the indentation shared by every non-blank line.
pub fn dedent(code: &str) -> String {
    let indent = code
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(leading_whitespace_len)
        .min()
        .unwrap_or(0);

    code.lines()
        .map(|line| {
            if line.trim().is_empty() {
                ""
            } else {
                line.get(indent..).unwrap_or_else(|| line.trim_start())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn leading_whitespace_len(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn with_trailing_newline(code: &str) -> String {
    let mut out = code.trim_end_matches('\n').to_string();
    out.push('\n');
    out
}

/* --------------------------------------------------------------------------
Composition
-------------------------------------------------------------------------- */

/// Compose increments into one executable scene file.
///
/// The first increment is used verbatim. Each later increment is indented to
/// the body level of `construct` and inserted after the last statement of
/// that method, preceded by `self.next_section()`.
pub fn compose_scene<S: AsRef<str>>(increments: &[S]) -> Result<String, CoreError> {
    let (base, rest) = increments
        .split_first()
        .ok_or_else(|| CoreError::Validation("No scene code to compose".to_string()))?;

    let base = base.as_ref();
    if rest.is_empty() {
        return Ok(with_trailing_newline(base));
    }

    let mut lines: Vec<String> = base.lines().map(str::to_string).collect();
    let (insert_at, indent) = construct_insert_point(&lines)?;

    let mut addition = Vec::new();
    for increment in rest {
        addition.push(String::new());
        addition.push(format!("{indent}{NEXT_SECTION_CALL}"));
        for line in increment.as_ref().lines() {
            if line.trim().is_empty() {
                addition.push(String::new());
            } else {
                addition.push(format!("{indent}{line}"));
            }
        }
    }

    lines.splice(insert_at..insert_at, addition);
    Ok(with_trailing_newline(&lines.join("\n")))
}

/// Index after the last statement of `construct` and the body indentation.
fn construct_insert_point(lines: &[String]) -> Result<(usize, String), CoreError> {
    let (def_idx, def_indent) = lines
        .iter()
        .enumerate()
        .find_map(|(i, line)| {
            CONSTRUCT_DEF_RE
                .captures(line)
                .map(|caps| (i, caps.get(1).map_or(0, |m| m.as_str().len())))
        })
        .ok_or_else(|| {
            CoreError::Validation("Scene code has no construct(self) method".to_string())
        })?;

    let mut last_body_line = None;
    let mut body_indent = None;
    let mut scanner = LineScanner::default();
    for (i, line) in lines.iter().enumerate().skip(def_idx + 1) {
        // Continuation lines belong to the statement that opened them,
        // whatever their indentation.
        let continuation = scanner.in_continuation();
        scanner.feed(line);
        if continuation {
            last_body_line = Some(i);
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let indent = leading_whitespace_len(line);
        if indent <= def_indent {
            break;
        }
        if body_indent.is_none() {
            body_indent = Some(line[..indent].to_string());
        }
        last_body_line = Some(i);
    }

    // An empty construct body gets one level deeper than the def.
    let indent = body_indent.unwrap_or_else(|| format!("{}    ", &lines[def_idx][..def_indent]));
    Ok((last_body_line.unwrap_or(def_idx) + 1, indent))
}

/// Tracks the lexical state that lets a Python statement span lines.
#[derive(Debug, Default)]
struct LineScanner {
    open_triple: Option<&'static [u8]>,
    depth: usize,
    backslash: bool,
}

impl LineScanner {
    fn in_continuation(&self) -> bool {
        self.open_triple.is_some() || self.depth > 0 || self.backslash
    }

    fn feed(&mut self, line: &str) {
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if let Some(quote) = self.open_triple {
                if bytes[i..].starts_with(quote) {
                    self.open_triple = None;
                    i += quote.len();
                } else {
                    i += if bytes[i] == b'\\' { 2 } else { 1 };
                }
                continue;
            }
            match bytes[i] {
                b'#' => {
                    self.backslash = false;
                    return;
                }
                b'(' | b'[' | b'{' => self.depth += 1,
                b')' | b']' | b'}' => self.depth = self.depth.saturating_sub(1),
                q @ (b'"' | b'\'') => {
                    let triple: &'static [u8] = if q == b'"' { b"\"\"\"" } else { b"'''" };
                    if bytes[i..].starts_with(triple) {
                        self.open_triple = Some(triple);
                        i += triple.len();
                        continue;
                    }
                    i += 1;
                    while i < bytes.len() && bytes[i] != q {
                        i += if bytes[i] == b'\\' { 2 } else { 1 };
                    }
                }
                _ => {}
            }
            i += 1;
        }
        self.backslash = self.open_triple.is_none() && line.trim_end().ends_with('\\');
    }
}

/* --------------------------------------------------------------------------
Tests
-------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "from manim import *\n\nclass Demo(Scene):\n    def construct(self):\n        c = Circle()\n        self.play(Create(c))\n";

    // -- extract_code_block --

    #[test]
    fn extracts_tagged_block() {
        let response = "Here you go:\n```python\nc = Circle()\n```\nEnjoy";
        assert_eq!(extract_code_block(response).as_deref(), Some("c = Circle()"));
    }

    #[test]
    fn extracts_untagged_block_and_takes_first() {
        let response = "```\na = 1\n```\n```python\nb = 2\n```";
        assert_eq!(extract_code_block(response).as_deref(), Some("a = 1"));
    }

    #[test]
    fn missing_or_unterminated_fence_is_none() {
        assert_eq!(extract_code_block("c = Circle()"), None);
        assert_eq!(extract_code_block("```python\nc = Circle()"), None);
    }

    // -- find_scene_class --

    #[test]
    fn finds_scene_class_name() {
        assert_eq!(find_scene_class(BASE), Some("Demo"));
        assert_eq!(find_scene_class("class Foo ( Scene ):\n    pass"), Some("Foo"));
        assert_eq!(find_scene_class("class Foo(MovingCameraScene):"), None);
    }

    // -- normalize_initial --

    #[test]
    fn initial_adds_import_and_strips_markers() {
        let code = format!(
            "class A(Scene):\n    def construct(self):\n        {SECTION_MARKER}\n        self.next_section()\n        self.wait()\n\n\n"
        );
        let normalized = normalize_initial(&code);
        assert!(normalized.starts_with("from manim import *\n\nclass A(Scene):"));
        assert!(!normalized.contains(SECTION_MARKER));
        assert!(!normalized.contains("next_section"));
        assert!(normalized.ends_with("self.wait()\n"));
        assert!(!normalized.ends_with("\n\n"));
    }

    #[test]
    fn initial_keeps_existing_import() {
        let normalized = normalize_initial(BASE);
        assert_eq!(normalized.matches("from manim import").count(), 1);
    }

    #[test]
    fn initial_blank_is_empty() {
        assert_eq!(normalize_initial("  \n"), "");
    }

    // -- normalize_continuation --

    #[test]
    fn continuation_keeps_text_after_marker_and_dedents() {
        let code = format!(
            "from manim import *\n{SECTION_MARKER}\n        s = Square()\n        self.play(Create(s))\n"
        );
        assert_eq!(
            normalize_continuation(&code),
            "s = Square()\nself.play(Create(s))\n"
        );
    }

    #[test]
    fn continuation_drops_leading_imports_without_marker() {
        let code = "import numpy as np\nfrom manim import *\n\nself.wait(1)";
        assert_eq!(normalize_continuation(code), "self.wait(1)\n");
    }

    #[test]
    fn continuation_preserves_relative_indentation() {
        let code = "    for i in range(3):\n        self.wait(0.1)\n";
        assert_eq!(
            normalize_continuation(code),
            "for i in range(3):\n    self.wait(0.1)\n"
        );
    }

    #[test]
    fn continuation_of_only_marker_is_empty() {
        assert_eq!(normalize_continuation(SECTION_MARKER), "");
    }

    // -- compose_scene --

    #[test]
    fn single_increment_is_returned_as_is() {
        assert_eq!(compose_scene(&[BASE]).unwrap(), BASE);
    }

    #[test]
    fn empty_increments_rejected() {
        let none: [&str; 0] = [];
        assert!(compose_scene(&none).is_err());
    }

    #[test]
    fn later_increments_land_at_end_of_construct() {
        let composed = compose_scene(&[BASE, "s = Square()\nself.play(Create(s))\n"]).unwrap();
        let expected = "from manim import *\n\nclass Demo(Scene):\n    def construct(self):\n        c = Circle()\n        self.play(Create(c))\n\n        self.next_section()\n        s = Square()\n        self.play(Create(s))\n";
        assert_eq!(composed, expected);
    }

    #[test]
    fn increments_are_appended_in_order() {
        let composed = compose_scene(&[BASE, "a = 1\n", "b = 2\n"]).unwrap();
        let a = composed.find("a = 1").unwrap();
        let b = composed.find("b = 2").unwrap();
        assert!(a < b);
        assert_eq!(composed.matches("self.next_section()").count(), 2);
    }

    #[test]
    fn insertion_stops_before_following_method() {
        let base = "class Demo(Scene):\n    def construct(self):\n        self.wait()\n\n    def helper(self):\n        return 1\n";
        let composed = compose_scene(&[base, "x = 1\n"]).unwrap();
        let x = composed.find("        x = 1").unwrap();
        let helper = composed.find("def helper").unwrap();
        assert!(x < helper);
    }

    #[test]
    fn column_zero_string_lines_stay_inside_construct() {
        let base = "from manim import *\n\nclass Demo(Scene):\n    def construct(self):\n        t = Text(\"\"\"first\nsecond\"\"\")\n        self.play(Write(t))\n";
        let composed = compose_scene(&[base, "self.play(FadeOut(t))\n"]).unwrap();
        let write = composed.find("self.play(Write(t))").unwrap();
        let fade = composed.find("        self.play(FadeOut(t))").unwrap();
        assert!(write < fade);
        assert!(composed.contains("second\"\"\")\n        self.play(Write(t))\n"));
    }

    #[test]
    fn bracket_and_backslash_continuations_stay_inside_construct() {
        let base = "class Demo(Scene):\n    def construct(self):\n        g = VGroup(\nCircle(),\n)\n        x = 1 + \\\n2\n        self.add(g)\n\n    def helper(self):\n        return 1\n";
        let composed = compose_scene(&[base, "y = 2\n"]).unwrap();
        let add = composed.find("self.add(g)").unwrap();
        let y = composed.find("        y = 2").unwrap();
        let helper = composed.find("def helper").unwrap();
        assert!(add < y && y < helper);
    }

    #[test]
    fn quotes_and_hashes_inside_strings_are_not_misread() {
        let base = "class Demo(Scene):\n    def construct(self):\n        a = Text(\"it's # not (a comment\")\n        b = Text('say \"\"\"hi')\n        self.add(a, b)\n";
        let composed = compose_scene(&[base, "z = 3\n"]).unwrap();
        assert!(composed.ends_with("        self.add(a, b)\n\n        self.next_section()\n        z = 3\n"));
    }

    #[test]
    fn base_without_construct_is_rejected() {
        let base = "class Demo(Scene):\n    pass\n";
        assert!(compose_scene(&[base, "x = 1\n"]).is_err());
    }
}
