/// Phrases that only show up on captcha / robot-check interstitials.
const CHALLENGE_PHRASES: &[&str] = &[
    "enter the characters you see below",
    "sorry, we just need to make sure you're not a robot",
    "to discuss automated access to amazon data",
    "type the characters you see in this image",
    "/errors/validatecaptcha",
];

/// First challenge phrase found in the page, case-insensitive.
pub fn challenge_phrase(html: &str) -> Option<&'static str> {
    let lower = html.to_ascii_lowercase();
    CHALLENGE_PHRASES.iter().copied().find(|p| lower.contains(p))
}
