//! Prompt templates for script planning, code generation and repair.
//!
//! Builders only interpolate; they never trim or rewrite caller text. Optional
//! context is appended verbatim after the request.

/// System prompt for the script planning call.
pub const SCRIPT_SYSTEM_PROMPT: &str = r"You write scripts for short educational math and science animations.

Plan a 30-60 second animation that builds one clear insight step by step.

Use this format:

TITLE: <title>

HOOK (5-10 sec):
<opening question or problem>

SECTION <n>: <name> (<seconds> sec)
- Visual: <what is on screen>
- Narration: <on-screen text or voice-over>
- Animation: <movements and transitions>

INSIGHT (<seconds> sec):
<the moment where it clicks>

CONCLUSION (5-10 sec):
<wrap-up>

Be accurate. Prefer concrete visual metaphors over bare equations. Say which
elements appear, move, transform and disappear in every section.";

/// Fix instructions appended after the renderer diagnostic.
const FIX_HINTS: &str = "Common causes:
- Methods that do not exist in Manim Community Edition
- Wrong constructor arguments (for example Circle does not accept `point=`; use `.move_to()`)
- LaTeX environments that fail to compile (avoid align*, use several MathTex objects)";

/// System prompt for the code generation call.
pub fn code_system_prompt(scene_class: &str) -> String {
    format!(
        r#"You are an expert Manim Community Edition animator. Turn the request into working Python code.

Rules:
1. Output ONLY Python source. No prose, no markdown.
2. Start with `from manim import *`.
3. Define exactly one scene class named `{scene_class}`.
4. Inherit from `ThreeDScene` for 3D content, otherwise from `Scene`.

Scene hygiene:
- Remove or transform old text before placing new text in the same spot
  (`ReplacementTransform(old, new)` or `FadeOut(old), FadeIn(new)`).
- Group related mobjects in a `VGroup`.
- Call `self.wait()` between beats.

LaTeX:
- Keep expressions simple: `MathTex(r"E = mc^2")`.
- No align*, cases or other multi-line environments; stack several MathTex in a VGroup.

Positioning:
- Create first, then position: `Circle(radius=1).move_to(RIGHT * 3)`.
- Only `Dot` accepts `point=` in its constructor.

3D:
- Use `ThreeDAxes` and `self.set_camera_orientation(phi=..., theta=...)`."#
    )
}

/// User prompt for single-phase code generation.
pub fn build_user_prompt(user_request: &str, context: Option<&str>) -> String {
    let prompt = format!(
        "Create a Manim animation for:

{user_request}

Requirements:
- No overlapping text (FadeOut or ReplacementTransform old content)
- Use ThreeDScene with a camera setup when 3D is needed
- Be scientifically and mathematically accurate
- Smooth transitions between sections
- Total duration 30-60 seconds, with short self.wait() pauses
- Simple LaTeX only; one MathTex per equation"
    );
    with_context(prompt, context)
}

/// User prompt for the script planning call.
pub fn build_script_prompt(user_request: &str, context: Option<&str>) -> String {
    let prompt = format!(
        "Write an educational animation script for:

{user_request}

Think about:
1. The core insight to convey
2. Visual metaphors that make it intuitive
3. How understanding builds step by step
4. The moment where it clicks

Follow the format from your instructions."
    );
    with_context(prompt, context)
}

/// User prompt turning a planned script into code.
pub fn build_code_prompt(script: &str) -> String {
    format!(
        "Convert this animation script into Manim code:

---
{script}
---

Requirements:
- Follow the script's structure and timing
- No overlapping text (FadeOut or ReplacementTransform)
- ThreeDScene with a camera setup if 3D is needed
- Simple LaTeX only; a VGroup of MathTex for several equations

Output ONLY the Python code."
    )
}

/// User prompt asking for a corrected version after a failed render.
pub fn build_fix_prompt(diagnostic: &str) -> String {
    format!(
        "The code you generated failed with this error:

```
{diagnostic}
```

Please fix the code. {FIX_HINTS}

Output ONLY the corrected Python code, nothing else."
    )
}

fn with_context(mut prompt: String, context: Option<&str>) -> String {
    if let Some(context) = context {
        prompt.push_str("\n\nAdditional context to incorporate:\n");
        prompt.push_str(context);
    }
    prompt
}
