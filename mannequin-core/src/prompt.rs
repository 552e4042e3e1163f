use crate::view::View;

/// Positive/negative prompt pair fed to the diffusion pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptPair {
    pub positive: String,
    pub negative: String,
}

/// Negative prompt applied to raw generation requests that do not carry one.
pub const DEFAULT_NEGATIVE_PROMPT: &str = "(worst quality, low quality:1.2), overexposed, underexposed, blurry, text, watermark, duplicate bodies, extra limbs, distorted fingers, disfigured, motion blur";

pub const AVATAR_NEGATIVE_PROMPT: &str = "(worst quality, low quality:1.2), text, logo, watermark, extra limbs, distorted fingers, duplicate body, disfigured, motion blur, overexposed, underexposed";

/// Multi-view batches additionally suppress crowd artifacts.
pub const MULTIVIEW_NEGATIVE_PROMPT: &str = "(worst quality, low quality:1.2), text, logo, watermark, extra limbs, distorted fingers, duplicate body, disfigured, motion blur, overexposed, underexposed, multiple people, crowd, group";

/// Clothed renders additionally suppress nudity and broken garments.
pub const FASHION_NEGATIVE_PROMPT: &str = "(worst quality, low quality:1.2), text, logo, watermark, extra limbs, distorted fingers, duplicate body, disfigured, motion blur, overexposed, underexposed, multiple people, crowd, group, naked, nude, underwear, bra, deformed clothing, floating clothes, disconnected clothing, unrealistic fabric, bad proportions, weird clothing physics, inside-out clothes, backwards clothes";

/// Maps a frontend skin tone code to its prompt phrasing. Unknown codes pass
/// through unchanged.
pub fn skin_tone_phrase(code: &str) -> &str {
    match code {
        "fair-cool" => "fair cool undertone",
        "light-neutral" => "light neutral undertone",
        "medium-warm" => "medium warm golden undertone",
        "tan-golden" => "tan golden undertone",
        "brown-neutral" => "brown neutral undertone",
        "deep-cool" => "deep cool undertone",
        other => other,
    }
}

fn frame_view(view: View, base: &str) -> String {
    match view {
        View::Front => format!(
            "full body front view portrait, {base}, looking directly at camera, arms at sides, centered composition"
        ),
        View::Side => format!(
            "full body side profile view, {base}, perfect side angle profile, looking to the side, arms at sides, centered composition"
        ),
        View::Back => format!(
            "full body back view portrait, {base}, facing away from camera, showing back and shoulders, arms at sides, centered composition"
        ),
        View::ThreeQuarter => format!(
            "full body three-quarter view portrait, {base}, turned 45 degrees, looking slightly to the side, arms at sides, centered composition"
        ),
    }
}

/// Single-view studio portrait used by the legacy avatar endpoint.
pub fn avatar_prompt(gender: &str, skin_tone: &str) -> PromptPair {
    let tone = skin_tone_phrase(skin_tone);
    PromptPair {
        positive: format!(
            "full body portrait, {gender} adult, {tone} skin, neutral expression, standing, plain studio seamless gray backdrop, fashion lookbook, highly photorealistic, 85mm DSLR, soft key light, crisp detail"
        ),
        negative: AVATAR_NEGATIVE_PROMPT.to_string(),
    }
}

/// Per-view prompt for an unclothed multi-view batch.
pub fn multiview_prompt(gender: &str, skin_tone: &str, view: View) -> PromptPair {
    let tone = skin_tone_phrase(skin_tone);
    let base = format!(
        "{gender} adult, {tone} skin, neutral expression, standing, plain studio seamless gray backdrop, highly photorealistic, 85mm DSLR, soft key light, crisp detail"
    );
    PromptPair {
        positive: frame_view(view, &base),
        negative: MULTIVIEW_NEGATIVE_PROMPT.to_string(),
    }
}

/// Per-view prompt with the clothing description embedded verbatim, lowercased.
/// Used whenever the enrichment service cannot provide one.
pub fn fashion_prompt(gender: &str, skin_tone: &str, clothing_request: &str, view: View) -> PromptPair {
    let tone = skin_tone_phrase(skin_tone);
    let clothing = clothing_request.to_lowercase();
    let base = format!(
        "{gender} adult, {tone} skin, wearing {clothing}, neutral expression, standing, plain studio seamless gray backdrop, highly photorealistic, 85mm DSLR, soft key light, crisp detail, fashion photography"
    );
    PromptPair {
        positive: frame_view(view, &base),
        negative: FASHION_NEGATIVE_PROMPT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_are_deterministic() {
        for view in View::ALL {
            let first = multiview_prompt("female", "fair-cool", view);
            let second = multiview_prompt("female", "fair-cool", view);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_known_tone_is_mapped() {
        let pair = avatar_prompt("female", "fair-cool");
        assert!(pair.positive.contains("female adult, fair cool undertone skin"));
        assert!(pair.positive.starts_with("full body portrait"));
        assert_eq!(pair.negative, AVATAR_NEGATIVE_PROMPT);
    }

    #[test]
    fn test_unknown_tone_passes_through() {
        assert_eq!(skin_tone_phrase("olive-custom"), "olive-custom");
        let pair = multiview_prompt("male", "olive-custom", View::Front);
        assert!(pair.positive.contains("male adult, olive-custom skin"));
    }

    #[test]
    fn test_each_view_has_distinct_framing() {
        let prompts: Vec<String> = View::ALL
            .iter()
            .map(|view| multiview_prompt("female", "deep-cool", *view).positive)
            .collect();
        assert!(prompts.iter().all(|p| p.contains("deep cool undertone")));
        for (i, a) in prompts.iter().enumerate() {
            for b in prompts.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_unknown_view_token_uses_front_framing() {
        let fallback = multiview_prompt("female", "tan-golden", View::from_token("diagonal"));
        let front = multiview_prompt("female", "tan-golden", View::Front);
        assert_eq!(fallback, front);
    }

    #[test]
    fn test_fashion_prompt_embeds_lowercased_clothing() {
        let pair = fashion_prompt("male", "medium-warm", "Red Leather Jacket", View::Side);
        assert!(pair.positive.contains("wearing red leather jacket"));
        assert!(pair.positive.contains("fashion photography"));
        assert!(pair.negative.contains("deformed clothing"));
    }

    #[test]
    fn test_three_quarter_framing_mentions_angle() {
        let pair = multiview_prompt("female", "brown-neutral", View::ThreeQuarter);
        assert!(pair.positive.contains("turned 45 degrees"));
    }

    #[test]
    fn test_batch_negatives_extend_avatar_negative() {
        assert!(MULTIVIEW_NEGATIVE_PROMPT.starts_with(AVATAR_NEGATIVE_PROMPT));
        assert!(FASHION_NEGATIVE_PROMPT.starts_with(MULTIVIEW_NEGATIVE_PROMPT));
        assert!(MULTIVIEW_NEGATIVE_PROMPT.contains("multiple people"));
    }
}
