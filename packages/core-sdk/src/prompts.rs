//! 嵌入到各后端请求体中的指令文本。
//!
//! 字数与语气要求只写进指令，不在本地校验。

use crate::models::{FinalComposeRequest, GenerationRequest, MotionRequest, SubjectSceneRequest};

pub const VARIATION_TEMPERATURE: f32 = 0.8;
pub const VARIATION_TEMPERATURE_NSFW: f32 = 0.9;
pub const CAPTION_TEMPERATURE: f32 = 0.7;
pub const DECOMPOSE_TEMPERATURE: f32 = 0.1;
pub const STAGE_TEMPERATURE: f32 = 0.8;

pub fn variation_temperature(is_nsfw: bool) -> f32 {
    if is_nsfw {
        VARIATION_TEMPERATURE_NSFW
    } else {
        VARIATION_TEMPERATURE
    }
}

const SFW_SYSTEM: &str = "You are a master visual storyteller and cinematographer. Your task is to generate 3 distinct and highly descriptive video prompts suitable for advanced AI video generation models like Sora, Runway, or Pika.";

const NSFW_SYSTEM: &str = "You are a master visual storyteller and cinematographer with expertise in adult, 18+ themes. Your task is to generate 3 distinct and highly descriptive video prompts for an adult audience. The prompts may be sensual or explore mature themes.\n\nYou must adhere to safety guidelines. Do not generate content that is illegal, hateful, depicts non-consensual acts, involves minors, or contains graphic violence. Keep descriptions artistic, cinematic and suggestive rather than explicit.";

const WORD_COUNT_RULE: &str = "IMPORTANT: Each generated prompt description must be between 80 and 120 words. Do not exceed 140 words under any circumstances.";

const JSON_ONLY: &str = "Output JSON only.";

const EXAMPLES: &str = r#"**Example 1 (Narrative with Camera Action):** "A little girl, lost in Times Square and separated from her parents, looks up. The camera tilts up, following her gaze, slowly revealing the massive, glittering skyscrapers and billboards and emphasizing how small she is in a vast world."

**Example 2 (Stylized Shot Description):** "Fashion magazine, motion blur, handheld camera, a close-up of a group of friends at a warehouse party, horror movie style, cinematic, hyper-realistic."

**Example 3 (Juxtaposition with Camera Movement):** "A display window on a bustling commercial street. The camera pans left across a luxury store window full of glamorous mannequins, then keeps moving to reveal a man in ragged clothes shivering in the adjacent alley.""#;

/**
 * \brief 变体生成的系统指令；`json_only` 为需要在文本中强调 JSON 输出的后端追加要求。
 */
pub fn variation_system(is_nsfw: bool, json_only: bool) -> String {
    let base = if is_nsfw { NSFW_SYSTEM } else { SFW_SYSTEM };
    if json_only {
        format!("{} {}", base, JSON_ONLY)
    } else {
        base.to_string()
    }
}

/**
 * \brief 变体生成的用户指令：规则、示例与调用方给出的全部条件。
 */
pub fn variation_prompt(req: &GenerationRequest) -> String {
    format!(
        r#"{rule}

Follow the style of these examples, where camera work is woven into a narrative description:

{examples}

Generate 3 new video prompt variations as a JSON array. Each item has {{"title": string, "prompt": string}}. For each variation:
1. Write a detailed, paragraph-long prompt built around the Main Scene; it is the foundation, use every detail from it.
2. Weave the camera angle and movement directly into the narrative: describe what the camera does as part of the action.
3. Combine all elements into a cohesive and evocative scene.
4. Provide a short, creative title that captures the essence of the shot.

**Criteria for Generation:**
- **Main Scene:** "{scene}"
- **Visual Style:** "{style}"
- **Protagonist Action:** "{action}"
- **Camera Angle:** "{angle}"
- **Camera Movement:** "{movement}"
- **Camera/Device:** "{device}"
- **Lighting:** "{lighting}""#,
        rule = WORD_COUNT_RULE,
        examples = EXAMPLES,
        scene = req.scene,
        style = req.style,
        action = req.protagonist_action,
        angle = req.camera_angle,
        movement = req.camera_movement,
        device = req.camera_device.as_deref().unwrap_or(""),
        lighting = req.lighting,
    )
}

pub const CAPTION_SYSTEM: &str = "You analyze an image and return exactly 3 rich, distinct captions as a JSON array of strings. Output JSON only.";

pub const CAPTION_PROMPT: &str = r#"Analyze this image and return exactly 3 detailed, distinct caption options (each 80-120 words) describing the objects, attributes, relationships and overall composition.

When a person is the main subject, lead with their appearance (hair, build, clothing, notable features), then their action or pose with sensory details, then the emotional atmosphere, lighting quality and setting.

Return exactly 3 captions as a JSON array of strings. No prose."#;

pub const DECOMPOSE_SYSTEM: &str =
    "Return a strict JSON object matching the requested fields. Output JSON only.";

pub fn decompose_prompt(prompt_text: &str) -> String {
    format!(
        "Analyze this video prompt and return a JSON object with these keys: scene_description, visual_style, protagonist_action, camera_angle, camera_movement, lighting_details, additional_keywords (array of strings).\n\nVideo Prompt: \"{}\"",
        prompt_text
    )
}

pub fn subject_scene_system(is_nsfw: bool) -> &'static str {
    if is_nsfw {
        "You write video prompts for mature, adult-oriented scenes. Be precise and evocative about the subject and setting while staying tasteful and within safety guidelines: nothing illegal, non-consensual or involving minors."
    } else {
        "You create WAN 2.2 video prompts. Focus on precise subject and scene descriptions."
    }
}

pub fn subject_scene_prompt(req: &SubjectSceneRequest) -> String {
    format!(
        r#"Create a detailed subject and scene description (60-80 words) following WAN 2.2 structure.

Scene: "{}"
Visual Style: "{}"

Structure your description:
1. **Subject Description**: the main subject or character in detail (who they are, appearance, clothing)
2. **Scene Setting**: the environment and background (where this takes place, atmosphere)

Example: "A young woman in a red dress holding a glowing umbrella, in a bustling neon-lit city street at night"

Return ONLY the description as plain text (no JSON, no labels)."#,
        req.scene, req.style
    )
}

pub fn motion_system(is_nsfw: bool) -> &'static str {
    if is_nsfw {
        "You write video prompts for mature, adult-oriented scenes. The action is the most important element: describe movement, positions and interaction clearly while staying tasteful and within safety guidelines."
    } else {
        "You create WAN 2.2 video prompts. Focus on motion and character movement."
    }
}

pub fn motion_prompt(req: &MotionRequest) -> String {
    format!(
        r#"Add motion details to this scene (50-70 words) following WAN 2.2 structure.

Scene: "{}"
Action: "{}"

Describe how the character or subject moves and what they are doing. Keep it dynamic and specific.

Example: "slowly walking forward while looking over her shoulder, hair flowing in the wind"

Return ONLY the motion description as plain text (no JSON, no labels)."#,
        req.refined_scene, req.protagonist_action
    )
}

pub fn final_system(is_nsfw: bool) -> &'static str {
    if is_nsfw {
        "You are a cinematographer writing complete video prompts for mature audiences. Prioritize the action and keep it tasteful and within safety guidelines. Output JSON only."
    } else {
        "You create WAN 2.2 video prompts. Combine subject, scene, motion, camera work, and visual style. Output JSON only."
    }
}

pub fn final_prompt(req: &FinalComposeRequest) -> String {
    format!(
        r#"Generate 3 complete WAN 2.2 video prompt variations as a JSON array. Each item has {{"title": string, "prompt": string}}.

Scene & Action: "{}"
Camera Angle: "{}"
Camera Movement: "{}"
Camera/Device: "{}"
Lighting: "{}"

WAN 2.2 Structure (80-120 words each):
[Subject] + [Scene] + [Motion] + [Camera Work] + [Visual Style/Lighting]

Example: "A lone cowboy riding through a desert canyon, sunset lighting, drone tracking shot, cinematic grading"

Integrate camera angle and movement naturally into the narrative. Each variation should be complete and cinematic.

Return ONLY a JSON array of 3 prompts."#,
        req.action_description,
        req.camera_angle,
        req.camera_movement,
        req.camera_device.as_deref().unwrap_or("cinematic camera"),
        req.lighting
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variation_prompt_embeds_all_criteria() {
        let req = GenerationRequest {
            scene: "A robot walks through rain".into(),
            style: "Cyberpunk".into(),
            protagonist_action: "Walking".into(),
            camera_angle: "Low angle".into(),
            camera_movement: "Tracking".into(),
            camera_device: Some("Anamorphic".into()),
            lighting: "Neon, Rim light".into(),
            is_nsfw: false,
        };
        let text = variation_prompt(&req);
        for needle in ["A robot walks through rain", "Cyberpunk", "Anamorphic", "Neon, Rim light", "80 and 120"] {
            assert!(text.contains(needle), "missing {needle}");
        }
    }

    #[test]
    fn adult_mode_switches_system_tone() {
        assert!(variation_system(true, false).contains("safety guidelines"));
        assert!(!variation_system(false, false).contains("adult"));
        assert!(variation_system(false, true).ends_with("Output JSON only."));
        assert_eq!(variation_temperature(true), VARIATION_TEMPERATURE_NSFW);
    }

    #[test]
    fn final_prompt_defaults_camera_device() {
        let req = FinalComposeRequest {
            action_description: "x".into(),
            camera_angle: "y".into(),
            camera_movement: "z".into(),
            lighting: "w".into(),
            camera_device: None,
            is_nsfw: false,
        };
        assert!(final_prompt(&req).contains("cinematic camera"));
    }
}
