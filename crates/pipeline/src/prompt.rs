//! Prompt text sent to the language model.

use manimai_core::scene::SECTION_MARKER;

/// Instructions shared by every request.
pub fn system_prompt() -> String {
    format!(
        "You are a professional Manim animation engineer who builds continuous animated scenes.\n\
         Output runnable Python code that renders one manim Scene.\n\
         Rules:\n\
         1) The code must contain: from manim import *\n\
         2) Define exactly one Scene subclass.\n\
         3) Output only code inside a single ```python fenced block, with no explanations.\n\
         4) The code must run as-is and contain no syntax errors.\n\
         5) When continuing a scene, put the line {SECTION_MARKER} before the new code and never write self.next_section().\n\
         5.1) When continuing a scene, output only the new statements. Do not repeat existing code or the class definition.\n\
         6) Keep each animation between 1 and 3 seconds.\n\
         7) Keep the scene continuous. Do not clear the frame with FadeOut.\n\
         8) Make sure the scene ends visible and centered."
    )
}

/// Request for one turn.
///
/// `current_scene` is the composed scene file of the workspace, empty on the
/// first turn.
pub fn user_prompt(prompt: &str, current_scene: &str) -> String {
    let current_scene = current_scene.trim();
    if current_scene.is_empty() {
        return format!(
            "Create a new manim scene that implements: {prompt}\n\
             (Do not include {SECTION_MARKER} or self.next_section().)"
        );
    }

    format!(
        "This is the complete code of the current scene:\n\n\
         ```python\n{current_scene}\n```\n\n\
         Request: {prompt}\n\n\
         Continue the code at the end of the `construct` method to implement the request.\n\
         Follow these rules strictly:\n\
         1. Return only the new code. Do not repeat existing code.\n\
         2. The new code must start with `{SECTION_MARKER}`.\n\
         3. Do not include a `class` definition or `def construct`.\n\
         4. Keep variable names and scene state consistent.\n\
         5. Do not use `self.next_section()`; use the marker instead."
    )
}
