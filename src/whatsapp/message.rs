use crate::pipeline::state::QueryOutcome;
use regex::Regex;
use serde::Serialize;

/// Outbound message body for the Graph API messages endpoint.
#[derive(Debug, Serialize)]
pub struct OutboundMessage {
    pub messaging_product: &'static str,
    pub recipient_type: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: TextBody,
}

#[derive(Debug, Serialize)]
pub struct TextBody {
    pub preview_url: bool,
    pub body: String,
}

impl OutboundMessage {
    pub fn text(to: &str, body: &str) -> Self {
        Self {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to: to.to_string(),
            kind: "text",
            text: TextBody {
                preview_url: false,
                body: body.to_string(),
            },
        }
    }
}

/// Builds the reply text from a pipeline outcome: the answer, then the
/// recommendation block, then the ranked list when present.
pub fn format_reply(outcome: &QueryOutcome) -> String {
    let mut parts = Vec::new();

    if !outcome.answer.is_empty() {
        parts.push(outcome.answer.clone());
    }

    if !outcome.recommendation.is_none() {
        parts.push(format!(
            "Recommendation: {}\nReason: {}",
            outcome.recommendation.recommendation, outcome.recommendation.reason
        ));

        if !outcome.recommendation.top_choices.is_empty() {
            let mut listing = vec!["Top restaurants:".to_string()];
            for (i, place) in outcome.recommendation.top_choices.iter().enumerate() {
                let mut details = vec![format!("{}. {}", i + 1, place.name)];
                if !place.url.is_empty() {
                    details.push(format!("URL: {}", place.url));
                }
                if !place.description.is_empty() {
                    details.push(format!("Description: {}", place.description));
                }
                listing.push(details.join("\n"));
            }
            parts.push(listing.join("\n"));
        }
    }

    parts.join("\n\n")
}

/// Normalizes text for WhatsApp conventions: strips bracketed citation
/// markers, converts markdown bold to WhatsApp bold, and forces URLs onto
/// their own line.
pub fn process_text_for_whatsapp(text: &str) -> String {
    // Remove brackets
    let citation = Regex::new(r"【.*?】").unwrap();
    let text = citation.replace_all(text, "");

    // Convert markdown-style bold to WhatsApp-style bold
    let bold = Regex::new(r"\*\*(.*?)\*\*").unwrap();
    let text = bold.replace_all(&text, "*$1*");

    // Ensure URLs are on their own line
    let url = Regex::new(r"([^\n])(https?://\S+)").unwrap();
    let text = url.replace_all(&text, "$1\n$2");

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::{Recommendation, RecommendedPlace};

    fn outcome_with(answer: &str, recommendation: Recommendation) -> QueryOutcome {
        QueryOutcome {
            sql: None,
            sql_valid: false,
            sql_issues: None,
            rows: None,
            answer: answer.to_string(),
            recommendation,
            error: None,
        }
    }

    #[test]
    fn strips_citation_markers() {
        assert_eq!(
            process_text_for_whatsapp("Casa Mono is great【4:2†source】."),
            "Casa Mono is great."
        );
    }

    #[test]
    fn converts_markdown_bold_to_whatsapp_bold() {
        assert_eq!(
            process_text_for_whatsapp("the **best** tapas in **town**"),
            "the *best* tapas in *town*"
        );
    }

    #[test]
    fn pushes_urls_onto_their_own_line() {
        assert_eq!(
            process_text_for_whatsapp("See https://example.com/casa-mono for menus"),
            "See \nhttps://example.com/casa-mono for menus"
        );
        // Already on its own line: unchanged.
        assert_eq!(
            process_text_for_whatsapp("See\nhttps://example.com"),
            "See\nhttps://example.com"
        );
    }

    #[test]
    fn reply_without_recommendation_is_just_the_answer() {
        let outcome = outcome_with("Casa Mono tops the list.", Recommendation::none());
        assert_eq!(format_reply(&outcome), "Casa Mono tops the list.");
    }

    #[test]
    fn reply_includes_recommendation_and_ranked_list() {
        let outcome = outcome_with(
            "Casa Mono tops the list.",
            Recommendation {
                recommendation: "Casa Mono".to_string(),
                reason: "Highest rating".to_string(),
                top_choices: vec![
                    RecommendedPlace {
                        name: "Casa Mono".to_string(),
                        url: "https://example.com/casa-mono".to_string(),
                        description: "Tapas bar".to_string(),
                    },
                    RecommendedPlace {
                        name: "El Rincon".to_string(),
                        url: String::new(),
                        description: String::new(),
                    },
                ],
            },
        );

        let reply = format_reply(&outcome);
        assert!(reply.starts_with("Casa Mono tops the list."));
        assert!(reply.contains("Recommendation: Casa Mono"));
        assert!(reply.contains("Reason: Highest rating"));
        assert!(reply.contains("Top restaurants:"));
        assert!(reply.contains("1. Casa Mono"));
        assert!(reply.contains("URL: https://example.com/casa-mono"));
        assert!(reply.contains("2. El Rincon"));
    }

    #[test]
    fn outbound_message_matches_the_wire_shape() {
        let message = OutboundMessage::text("34600111222", "hello");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": "34600111222",
                "type": "text",
                "text": {"preview_url": false, "body": "hello"}
            })
        );
    }
}
