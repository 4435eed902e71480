use crate::identity::IdentityProfile;
use crate::manifest::{ManifestSlot, TaskType};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Wardrobe policy, expressed downstream only as natural-language style
/// rules. The raw flag never travels past this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WardrobePolicy {
    #[serde(rename = "sfw")]
    Modest,
    #[serde(rename = "nsfw")]
    FormAccentuating,
}

impl Default for WardrobePolicy {
    fn default() -> Self {
        WardrobePolicy::Modest
    }
}

/// Chosen look for UGC batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UgcAesthetic {
    Candid,
    Polished,
}

#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub mime_type: String,
    /// Raw base64 payload, without the data-URL prefix.
    pub data: String,
}

impl ReferenceImage {
    /// Accepts a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(data_url: &str) -> Result<Self> {
        let rest = data_url
            .strip_prefix("data:")
            .ok_or_else(|| anyhow!("Invalid image data format"))?;
        let (mime_type, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| anyhow!("Invalid image data format"))?;
        if mime_type.is_empty() || payload.is_empty() {
            return Err(anyhow!("Invalid image data format"));
        }
        Ok(Self {
            mime_type: mime_type.to_string(),
            data: payload.to_string(),
        })
    }
}

/// One part of the outbound multimodal request.
#[derive(Debug, Clone)]
pub enum RequestPart {
    Text(String),
    InlineImage(ReferenceImage),
}

/// Fully assembled outbound payload for one batch.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub parts: Vec<RequestPart>,
    pub response_schema: Value,
    pub temperature: f32,
}

/// Everything the assembler needs for one batch. `manifest` must be
/// non-empty; callers are responsible for the remaining-count bounds check.
pub struct AssembleParams<'a> {
    pub task_type: TaskType,
    pub manifest: &'a [ManifestSlot],
    pub profile: &'a IdentityProfile,
    pub wardrobe: WardrobePolicy,
    pub aesthetic: Option<UgcAesthetic>,
    pub product_images: &'a [ReferenceImage],
    /// Trailing repetition window, already truncated by the tracker.
    pub previous_settings: &'a [String],
    pub temperature: f32,
}

const DEFAULT_REALISM_STACK: &str = "subsurface scattering, detailed skin texture, visible pores, \
faint skin sheen, peach fuzz, natural lip texture, unretouched, natural film grain";

const DEFAULT_ARCHETYPE: &str = "young woman";

const IDENTITY_COMPILER_DIRECTIVE: &str = "\
IDENTITY:
You are a High-Fidelity Prompt Architect generating training-ready synthetic data.

CORE LOGIC: SILENT FACE / LOUD BODY
1. SILENT FACE: NEVER describe facial features (eyes, nose, jaw, hair color) in the text. \
Facial geometry comes exclusively from the user's reference image.
2. LOUD BODY: ALWAYS describe body morphology in high-density detail.
3. REALISM INJECTION: ALWAYS inject specific camera-physics tags to prevent the plastic/smooth look.

PROMPT COMPILATION:
Assemble each final text string in this token-density order:
[Framing] + [Archetype] + [Action/Pose] + [Environment/Lighting] + [Body_Stack] + [Wardrobe] + [Realism_Stack] + [Tech_Specs]

COMPONENT BREAKDOWN:
- Framing: \"Hyper-realistic [Shot Type]...\"
- Archetype: \"[Broad Aesthetic]...\"
- Action/Pose: \"[Specific Action]...\"
- Environment: \"[Setting details]...\"
- Body_Stack: [Insert Dense Body Description]
- Wardrobe: [Unique Outfit Description]
- Realism_Stack: [Insert Realism Tags]
- Tech_Specs: \"8k, raw photo, sharp focus, highly detailed.\"

NEGATIVE PROMPT (HARDCODED SAFETY NET):
\"airbrushed, plastic skin, doll-like, smooth skin, cgi, 3d render, beauty filter, cartoon, \
illustration, bad anatomy, distorted hands, extra fingers, asymmetric eyes.\"

OPERATIONAL RULES:
- No conversational filler.
- No facial adjectives. If you catch yourself writing \"hazel eyes\" or \"small nose\", DELETE IT.
- Realism is mandatory.";

const UGC_CANDID_RULESET: &str = "\
MODE: UGC LIFESTYLE (CANDID / AUTHENTIC).
Every scene must read like an unplanned phone photo taken by a friend.
MANDATORY CUES: slight motion blur, direct on-camera flash or uneven ambient light, imperfect \
framing, visible sensor noise, mid-action posture, cluttered real-world surroundings.
FORBIDDEN TERMS: \"studio lighting\", \"bokeh\", \"editorial\", \"professionally lit\", \
\"flawless\", \"8k render\".
Describe the scene as a structured record, not a compiled tag string.";

const UGC_POLISHED_RULESET: &str = "\
MODE: UGC LIFESTYLE (POLISHED / STUDIO).
Every scene must read like a planned creator shoot with controlled light.
MANDATORY CUES: soft key light, intentional composition, coordinated wardrobe and set palette, \
shallow depth of field, clean background separation.
FORBIDDEN TERMS: \"blurry\", \"grainy\", \"accidental\", \"low quality\".
Describe the scene as a structured record, not a compiled tag string.";

const PRODUCT_DIRECTIVE: &str =
    "MODE: PRODUCT AD. Integrate the product naturally. Invent branding if generic.";

/// JSON schema for the compiled-string modes: an array of wrapped
/// `generation_data` objects. No field in this shape can carry facial
/// structure; likeness is delegated to the reference images.
pub fn flat_prompt_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "generation_data": {
                    "type": "OBJECT",
                    "properties": {
                        "reference_logic": {
                            "type": "OBJECT",
                            "properties": {
                                "primary_ref": { "type": "STRING" },
                                "secondary_ref": { "type": "STRING" }
                            }
                        },
                        "final_prompt_string": { "type": "STRING" }
                    }
                },
                "tags": { "type": "ARRAY", "items": { "type": "STRING" } }
            },
            "required": ["generation_data"]
        }
    })
}

/// JSON schema for UGC batches: one rich scene record per item.
pub fn scene_record_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "subject": {
                    "type": "OBJECT",
                    "properties": {
                        "styling": { "type": "STRING" },
                        "posture": { "type": "STRING" },
                        "action": { "type": "STRING" }
                    }
                },
                "wardrobe": {
                    "type": "OBJECT",
                    "properties": {
                        "garments": { "type": "STRING" },
                        "fit_and_physics": { "type": "STRING" }
                    }
                },
                "background": {
                    "type": "OBJECT",
                    "properties": {
                        "setting": { "type": "STRING" },
                        "props": { "type": "STRING" }
                    }
                },
                "camera": {
                    "type": "OBJECT",
                    "properties": {
                        "angle": { "type": "STRING" },
                        "lighting_source": { "type": "STRING" },
                        "characteristics": { "type": "STRING" }
                    }
                },
                "image_texture": {
                    "type": "OBJECT",
                    "properties": {
                        "quality_defects": { "type": "STRING" }
                    }
                },
                "tags": { "type": "ARRAY", "items": { "type": "STRING" } }
            },
            "required": ["subject", "background", "camera"]
        }
    })
}

fn style_ruleset(task_type: TaskType, aesthetic: Option<UgcAesthetic>) -> &'static str {
    match task_type {
        TaskType::Lora | TaskType::Product => IDENTITY_COMPILER_DIRECTIVE,
        TaskType::Ugc => match aesthetic.unwrap_or(UgcAesthetic::Candid) {
            UgcAesthetic::Candid => UGC_CANDID_RULESET,
            UgcAesthetic::Polished => UGC_POLISHED_RULESET,
        },
    }
}

fn clothing_directive(wardrobe: WardrobePolicy, task_type: TaskType) -> &'static str {
    if wardrobe == WardrobePolicy::FormAccentuating && task_type != TaskType::Ugc {
        "WARDROBE: ANATOMICAL/FIGURE-FORMING. Use technical terms: \"second-skin fit\", \
         \"anatomical seaming\", \"compressive\", \"sculpted\", \"bias-cut\". \
         Clothing must trace the body."
    } else {
        "WARDROBE: SFW/MODEST. Casual, standard, non-revealing."
    }
}

fn manifest_block(manifest: &[ManifestSlot]) -> String {
    manifest
        .iter()
        .map(|slot| {
            format!(
                "Item {}: {} ({}). Metadata: {}/{}",
                slot.sequence_index + 1,
                slot.meta.shot.as_str(),
                slot.meta.label,
                slot.meta.index,
                slot.meta.total
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn repetition_clause(previous_settings: &[String]) -> String {
    if previous_settings.is_empty() {
        String::new()
    } else {
        format!(
            "AVOID SETTINGS: [{}]. Invent NEW locations.",
            previous_settings.join(", ")
        )
    }
}

fn ordering_contract(count: usize) -> String {
    format!(
        "ORDERING CONTRACT: return a JSON array of exactly {} objects. \
         Response item N corresponds to manifest Item N by position alone. \
         Do not reorder, merge, skip, or add items.",
        count
    )
}

/// Builds the outbound instruction payload for one batch.
pub fn assemble_directive(params: &AssembleParams<'_>) -> GenerationRequest {
    let count = params.manifest.len();
    debug_assert!(count > 0, "assembler invoked with an empty manifest");

    let body_stack = params.profile.body_description.as_str();
    let realism_stack = if params.profile.backstory.is_empty() {
        DEFAULT_REALISM_STACK
    } else {
        params.profile.backstory.as_str()
    };
    let archetype = if params.profile.archetype.is_empty() {
        DEFAULT_ARCHETYPE
    } else {
        params.profile.archetype.as_str()
    };

    let product_directive = if params.task_type == TaskType::Product {
        PRODUCT_DIRECTIVE
    } else {
        ""
    };

    let output_template = match params.task_type {
        TaskType::Ugc => {
            "OUTPUT TEMPLATE PER ITEM: a scene record object with \"subject\", \"wardrobe\", \
             \"background\" (including \"setting\"), \"camera\" and \"image_texture\" sections."
        }
        _ => {
            "OUTPUT TEMPLATE PER ITEM:\n{\n  \"generation_data\": {\n    \"reference_logic\": {\n      \
             \"primary_ref\": \"Headshot (0.8)\",\n      \"secondary_ref\": \"Full Body (0.8)\"\n    },\n    \
             \"final_prompt_string\": \"[THE ASSEMBLED STRING]\"\n  }\n}"
        }
    };

    let prompt_text = format!(
        "INPUT DATA:\n\
         ARCHETYPE: {archetype}\n\
         BODY_STACK: {body_stack}\n\
         REALISM_STACK: {realism_stack}\n\
         \n\
         {clothing}\n\
         {product}\n\
         {repetition}\n\
         \n\
         TASK: Generate exactly {count} JSON items following this MANIFEST:\n\
         {manifest}\n\
         \n\
         {ordering}\n\
         \n\
         {template}\n\
         \n\
         CRITICAL RULES:\n\
         1. NO FACIAL FEATURES in any generated text.\n\
         2. USE DENSE TOKEN format.\n\
         3. UNIQUE OUTFITS per item.\n\
         \n\
         Return a JSON array of these objects.",
        archetype = archetype,
        body_stack = body_stack,
        realism_stack = realism_stack,
        clothing = clothing_directive(params.wardrobe, params.task_type),
        product = product_directive,
        repetition = repetition_clause(params.previous_settings),
        count = count,
        manifest = manifest_block(params.manifest),
        ordering = ordering_contract(count),
        template = output_template,
    );

    let mut parts: Vec<RequestPart> = params
        .product_images
        .iter()
        .cloned()
        .map(RequestPart::InlineImage)
        .collect();
    parts.push(RequestPart::Text(prompt_text));

    let response_schema = match params.task_type {
        TaskType::Ugc => scene_record_schema(),
        _ => flat_prompt_schema(),
    };

    GenerationRequest {
        system_instruction: style_ruleset(params.task_type, params.aesthetic).to_string(),
        parts,
        response_schema,
        temperature: params.temperature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::generate_manifest;

    fn profile() -> IdentityProfile {
        IdentityProfile {
            name: "Ava".to_string(),
            age_estimate: "25yo".to_string(),
            archetype: "commercial model aesthetic".to_string(),
            backstory: "visible pores, film grain".to_string(),
            body_description: "athletic build, long limbs".to_string(),
        }
    }

    fn params<'a>(
        task_type: TaskType,
        manifest: &'a [ManifestSlot],
        profile: &'a IdentityProfile,
        previous: &'a [String],
    ) -> AssembleParams<'a> {
        AssembleParams {
            task_type,
            manifest,
            profile,
            wardrobe: WardrobePolicy::Modest,
            aesthetic: None,
            product_images: &[],
            previous_settings: previous,
            temperature: 1.0,
        }
    }

    fn text_of(request: &GenerationRequest) -> String {
        request
            .parts
            .iter()
            .filter_map(|p| match p {
                RequestPart::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_manifest_block_and_ordering_contract() {
        let manifest = generate_manifest(TaskType::Lora, 50, 0, 3);
        let profile = profile();
        let request = assemble_directive(&params(TaskType::Lora, &manifest, &profile, &[]));
        let text = text_of(&request);

        assert!(text.contains("Item 1: HEADSHOT (Left 1/4 View). Metadata: 1/17"));
        assert!(text.contains("Item 3: HEADSHOT (Right 1/4 View). Metadata: 3/17"));
        assert!(text.contains("Generate exactly 3 JSON items"));
        assert!(text.contains("ORDERING CONTRACT: return a JSON array of exactly 3 objects"));
        assert!(text.contains("corresponds to manifest Item N by position alone"));
    }

    #[test]
    fn test_wardrobe_policy_is_text_not_flag() {
        let manifest = generate_manifest(TaskType::Lora, 20, 0, 2);
        let profile = profile();

        let mut p = params(TaskType::Lora, &manifest, &profile, &[]);
        p.wardrobe = WardrobePolicy::FormAccentuating;
        let accentuated = text_of(&assemble_directive(&p));
        assert!(accentuated.contains("ANATOMICAL/FIGURE-FORMING"));
        assert!(accentuated.contains("second-skin fit"));
        assert!(!accentuated.contains("nsfw"));

        p.wardrobe = WardrobePolicy::Modest;
        let modest = text_of(&assemble_directive(&p));
        assert!(modest.contains("SFW/MODEST"));

        // UGC never gets the accentuated wardrobe block.
        let ugc_manifest = generate_manifest(TaskType::Ugc, 20, 0, 2);
        let mut p = params(TaskType::Ugc, &ugc_manifest, &profile, &[]);
        p.wardrobe = WardrobePolicy::FormAccentuating;
        assert!(text_of(&assemble_directive(&p)).contains("SFW/MODEST"));
    }

    #[test]
    fn test_repetition_clause_embedded() {
        let manifest = generate_manifest(TaskType::Lora, 20, 0, 2);
        let profile = profile();
        let previous = vec!["rooftop bar".to_string(), "beach at dusk".to_string()];
        let request = assemble_directive(&params(TaskType::Lora, &manifest, &profile, &previous));
        let text = text_of(&request);
        assert!(text.contains("AVOID SETTINGS: [rooftop bar, beach at dusk]"));
        assert!(text.contains("Invent NEW locations."));

        let request = assemble_directive(&params(TaskType::Lora, &manifest, &profile, &[]));
        assert!(!text_of(&request).contains("AVOID SETTINGS"));
    }

    #[test]
    fn test_identity_schema_has_no_facial_fields() {
        let schema = serde_json::to_string(&flat_prompt_schema()).unwrap();
        assert!(!schema.contains("face"));
        assert!(!schema.contains("facial"));
        assert!(schema.contains("final_prompt_string"));
    }

    #[test]
    fn test_silent_face_directive_for_identity_mode() {
        let manifest = generate_manifest(TaskType::Lora, 20, 0, 2);
        let profile = profile();
        let request = assemble_directive(&params(TaskType::Lora, &manifest, &profile, &[]));
        assert!(request.system_instruction.contains("SILENT FACE"));
        assert!(request.system_instruction.contains("NEVER describe facial features"));
    }

    #[test]
    fn test_ugc_aesthetics_differ() {
        let manifest = generate_manifest(TaskType::Ugc, 20, 0, 2);
        let profile = profile();

        let mut p = params(TaskType::Ugc, &manifest, &profile, &[]);
        p.aesthetic = Some(UgcAesthetic::Candid);
        let candid = assemble_directive(&p);
        assert!(candid.system_instruction.contains("CANDID / AUTHENTIC"));
        assert!(candid.system_instruction.contains("motion blur"));

        p.aesthetic = Some(UgcAesthetic::Polished);
        let polished = assemble_directive(&p);
        assert!(polished.system_instruction.contains("POLISHED / STUDIO"));
        assert_ne!(candid.system_instruction, polished.system_instruction);

        // UGC batches request the rich scene-record shape.
        let schema = serde_json::to_string(&candid.response_schema).unwrap();
        assert!(schema.contains("setting"));
        assert!(schema.contains("background"));
    }

    #[test]
    fn test_product_images_attached_before_text() {
        let manifest = generate_manifest(TaskType::Product, 25, 0, 2);
        let profile = profile();
        let images = vec![
            ReferenceImage {
                mime_type: "image/png".to_string(),
                data: "aGVsbG8=".to_string(),
            },
            ReferenceImage {
                mime_type: "image/jpeg".to_string(),
                data: "d29ybGQ=".to_string(),
            },
        ];
        let mut p = params(TaskType::Product, &manifest, &profile, &[]);
        p.product_images = &images;
        let request = assemble_directive(&p);

        assert_eq!(request.parts.len(), 3);
        assert!(matches!(request.parts[0], RequestPart::InlineImage(_)));
        assert!(matches!(request.parts[1], RequestPart::InlineImage(_)));
        assert!(matches!(request.parts[2], RequestPart::Text(_)));
        assert!(text_of(&request).contains("MODE: PRODUCT AD"));
    }

    #[test]
    fn test_profile_fallbacks() {
        let manifest = generate_manifest(TaskType::Lora, 20, 0, 1);
        let empty = IdentityProfile::default();
        let request = assemble_directive(&params(TaskType::Lora, &manifest, &empty, &[]));
        let text = text_of(&request);
        assert!(text.contains("ARCHETYPE: young woman"));
        assert!(text.contains("subsurface scattering"));
    }

    #[test]
    fn test_data_url_parsing() {
        let image = ReferenceImage::from_data_url("data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, "iVBORw0KGgo=");

        assert!(ReferenceImage::from_data_url("not a data url").is_err());
        assert!(ReferenceImage::from_data_url("data:image/png;base64,").is_err());
    }
}
