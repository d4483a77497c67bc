use regex::Regex;

/// Matches short casual greetings in English and Spanish so the pipeline can
/// answer them without a model call. Whole-message match only: a greeting
/// followed by an actual question is not a greeting.
pub struct GreetingDetector {
    pattern: Regex,
}

impl GreetingDetector {
    pub fn new() -> Self {
        let pattern = Regex::new(
            r"(?i)^\s*(hi|hello|hey|hiya|yo|hola|buenas(\s+(tardes|noches|d[ií]as))?|buenos\s+d[ií]as|good\s+(morning|afternoon|evening)|qu[eé]\s+tal|saludos)\s*[!.?]*\s*$",
        )
        .unwrap();
        Self { pattern }
    }

    pub fn is_greeting(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

impl Default for GreetingDetector {
    fn default() -> Self {
        Self::new()
    }
}
